//! Background reconnection loop and the handle used to force reconnects.

use std::{
    fmt, io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use log::debug;

use crate::transport::Session;

use super::PoolInner;

pub(crate) trait Reconnect: Send + Sync {
    fn force_reconnect_all(&self);
}

impl<S: Session> Reconnect for PoolInner<S> {
    fn force_reconnect_all(&self) {
        self.request_reconnect_all();
    }
}

/// Handle that marks every pooled session for reconnection.
///
/// Sessions are not closed synchronously: a session in the middle of a send
/// finishes it, and the flag is honoured at its next checkout or the next
/// reconnection pass.
#[derive(Clone)]
pub struct ReconnectHandle {
    target: Arc<dyn Reconnect>,
}

impl ReconnectHandle {
    pub(crate) fn new(target: Arc<dyn Reconnect>) -> Self {
        Self { target }
    }

    pub fn force_reconnect_all(&self) {
        debug!("forcing every pooled session to reconnect");
        self.target.force_reconnect_all();
    }
}

impl fmt::Debug for ReconnectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectHandle").finish_non_exhaustive()
    }
}

pub(crate) fn spawn_reconnector<S: Session>(
    inner: Arc<PoolInner<S>>,
    interval: Duration,
) -> io::Result<(Sender<()>, JoinHandle<()>)> {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let handle = thread::Builder::new()
        .name("metricpub-reconnect".into())
        .spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                if inner.is_stopped() {
                    break;
                }
                inner.reconnect_pass();
            }
            debug!("session pool reconnect loop exiting");
        })?;
    Ok((stop_tx, handle))
}
