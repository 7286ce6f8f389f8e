//! Delivery thread draining the queue into a [`Transmit`] target.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::debug;

use super::Transmit;

/// Flags the delivery thread polls between sends.
#[derive(Debug, Default)]
pub(super) struct DeliveryFlags {
    pub(super) shutdown: AtomicBool,
    pub(super) reconnect: AtomicBool,
}

pub(super) fn spawn_worker<T: Transmit>(
    rx: Receiver<Vec<u8>>,
    flags: Arc<DeliveryFlags>,
    mut target: T,
    poll_interval: Duration,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("metricpub-delivery".into())
        .spawn(move || {
            while !flags.shutdown.load(Ordering::Acquire) {
                match rx.recv_timeout(poll_interval) {
                    Ok(payload) => {
                        target.transmit(&payload);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if flags.reconnect.swap(false, Ordering::AcqRel) {
                    debug!("delivery thread reconnecting its target");
                    target.reconnect();
                }
            }
            target.close();
            debug!("delivery thread exiting with {} messages undelivered", rx.len());
        })
}
