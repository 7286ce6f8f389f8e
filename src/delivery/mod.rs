//! Asynchronous delivery queue.
//!
//! Producers hand pre-serialised payloads to a bounded queue and return
//! immediately; a dedicated thread pops them and performs the network I/O.
//! The queue never grows past its capacity: when full, the configured
//! [`OverflowPolicy`] decides which message is dropped, and every dropped
//! payload is mirrored to the diagnostic stream. Shutdown is lossy; queued
//! messages are not drained.

mod policy;
mod worker;

#[cfg(test)]
mod tests;

use std::{
    fmt,
    sync::{Arc, atomic::Ordering},
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded};
use log::{debug, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    diagnostics::DiagnosticStream, error::BuildError, pool::SessionPool,
    rate_limited_warner::RateLimitedWarner, transport::Session,
};

pub use policy::OverflowPolicy;
use worker::{DeliveryFlags, spawn_worker};

/// Default bounded queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;
/// Default time the delivery thread waits on an empty queue before
/// re-checking its flags.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors returned when a payload cannot be queued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is at capacity and the policy dropped the message.
    #[error("delivery queue full")]
    QueueFull,
    /// The queue has been shut down.
    #[error("delivery queue closed")]
    Closed,
}

/// Sizing and overflow behaviour of an [`AsyncDeliveryQueue`].
#[derive(Clone, Copy, Debug)]
pub struct DeliveryConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub poll_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Destination the delivery thread writes to.
pub trait Transmit: Send + 'static {
    /// Deliver one payload, returning whether it was accepted.
    fn transmit(&mut self, payload: &[u8]) -> bool;

    /// Close and reopen the underlying connection(s).
    fn reconnect(&mut self);

    /// Release resources when the delivery thread exits.
    fn close(&mut self) {}
}

impl<S: Session> Transmit for Arc<SessionPool<S>> {
    fn transmit(&mut self, payload: &[u8]) -> bool {
        self.send(payload)
    }

    fn reconnect(&mut self) {
        self.force_reconnect_all();
    }
}

/// A single session owned by the delivery thread.
#[derive(Debug)]
pub struct SessionSender<S> {
    session: S,
    diagnostics: DiagnosticStream,
}

impl<S: Session> SessionSender<S> {
    pub fn new(session: S, diagnostics: DiagnosticStream) -> Self {
        Self {
            session,
            diagnostics,
        }
    }
}

impl<S: Session> Transmit for SessionSender<S> {
    fn transmit(&mut self, payload: &[u8]) -> bool {
        match self.session.send(payload) {
            Ok(()) => true,
            Err(err) => {
                debug!("delivery session send failed: {err}");
                self.diagnostics.emit(payload);
                false
            }
        }
    }

    fn reconnect(&mut self) {
        self.session.disconnect();
        if let Err(err) = self.session.connect() {
            debug!("delivery session reconnect failed: {err}");
        }
    }

    fn close(&mut self) {
        self.session.close();
    }
}

/// Cloneable handle asking the delivery thread to reconnect its target.
#[derive(Clone, Debug)]
pub struct ReconnectFlag {
    flags: Arc<DeliveryFlags>,
}

impl ReconnectFlag {
    pub fn request(&self) {
        self.flags.reconnect.store(true, Ordering::Release);
    }
}

/// Bounded queue plus the thread that drains it.
pub struct AsyncDeliveryQueue {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    capacity: usize,
    overflow: OverflowPolicy,
    flags: Arc<DeliveryFlags>,
    handle: Mutex<Option<JoinHandle<()>>>,
    warner: RateLimitedWarner,
    diagnostics: DiagnosticStream,
}

impl AsyncDeliveryQueue {
    /// Start a delivery thread writing to `target`.
    pub fn spawn<T: Transmit>(
        target: T,
        config: DeliveryConfig,
        diagnostics: DiagnosticStream,
    ) -> Result<Self, BuildError> {
        if config.capacity == 0 {
            return Err(BuildError::InvalidConfig(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        let (tx, rx) = bounded(config.capacity);
        let flags = Arc::new(DeliveryFlags::default());
        let handle = spawn_worker(rx.clone(), Arc::clone(&flags), target, config.poll_interval)?;
        Ok(Self {
            tx,
            rx,
            capacity: config.capacity,
            overflow: config.overflow,
            flags,
            handle: Mutex::new(Some(handle)),
            warner: RateLimitedWarner::default(),
            diagnostics,
        })
    }

    /// Queue `payload` for delivery without waiting on the network.
    ///
    /// With [`OverflowPolicy::DropOldest`] the new payload is accepted and
    /// the oldest queued one is dropped instead.
    pub fn enqueue(&self, payload: Vec<u8>) -> Result<(), EnqueueError> {
        if self.is_shut_down() {
            return Err(self.reject(&payload, EnqueueError::Closed));
        }
        match self.overflow {
            OverflowPolicy::DropNewest => match self.tx.try_send(payload) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(p)) => Err(self.reject(&p, EnqueueError::QueueFull)),
                Err(TrySendError::Disconnected(p)) => Err(self.reject(&p, EnqueueError::Closed)),
            },
            OverflowPolicy::Timeout(timeout) => match self.tx.send_timeout(payload, timeout) {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(p)) => Err(self.reject(&p, EnqueueError::QueueFull)),
                Err(SendTimeoutError::Disconnected(p)) => {
                    Err(self.reject(&p, EnqueueError::Closed))
                }
            },
            OverflowPolicy::DropOldest => self.evict_and_send(payload),
        }
    }

    fn evict_and_send(&self, mut payload: Vec<u8>) -> Result<(), EnqueueError> {
        // The delivery thread may race us for the freed slot; a few attempts
        // are enough because every failed attempt evicts another message.
        for _ in 0..3 {
            match self.tx.try_send(payload) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(p)) => {
                    payload = p;
                    if let Ok(oldest) = self.rx.try_recv() {
                        self.reject(&oldest, EnqueueError::QueueFull);
                    }
                }
                Err(TrySendError::Disconnected(p)) => {
                    return Err(self.reject(&p, EnqueueError::Closed));
                }
            }
        }
        Err(self.reject(&payload, EnqueueError::QueueFull))
    }

    fn reject(&self, payload: &[u8], err: EnqueueError) -> EnqueueError {
        self.diagnostics.emit(payload);
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            warn!("{err}; dropped {count} messages");
        });
        err
    }

    /// Messages waiting for the delivery thread.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Maximum number of messages the queue holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages dropped by overflow or after shutdown.
    pub fn dropped(&self) -> u64 {
        self.warner.total_dropped()
    }

    /// Ask the delivery thread to reconnect between sends.
    pub fn request_reconnect(&self) {
        self.flags.reconnect.store(true, Ordering::Release);
    }

    /// Handle other threads can use to request a reconnect.
    pub fn reconnect_flag(&self) -> ReconnectFlag {
        ReconnectFlag {
            flags: Arc::clone(&self.flags),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.flags.shutdown.load(Ordering::Acquire)
    }

    /// Stop the delivery thread after its current send. Queued messages are
    /// discarded.
    pub fn shutdown(&self) {
        self.flags.shutdown.store(true, Ordering::Release);
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("delivery thread panicked");
        }
        self.warner.flush(|count| {
            warn!("delivery queue dropped {count} messages before shutdown");
        });
    }
}

impl Drop for AsyncDeliveryQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for AsyncDeliveryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDeliveryQueue")
            .field("capacity", &self.capacity)
            .field("pending", &self.pending())
            .field("overflow", &self.overflow)
            .finish()
    }
}
