//! The publisher facade.
//!
//! [`Publisher`] is the only type application code needs. It encodes each
//! message once and hands the bytes either straight to the session pool or to
//! the asynchronous delivery queue. Transport failures are absorbed below
//! this layer; `send_message` only fails when the message cannot be encoded.

mod builder;
mod instrumentation;


use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    delivery::{AsyncDeliveryQueue, DeliveryConfig},
    diagnostics::DiagnosticStream,
    encoding::{EncodeError, Encoding},
    error::BuildError,
    liveness::{LivenessProber, ProberConfig},
    pool::SessionPool,
    transport::{Session, TransportSession},
};

pub use builder::PublisherBuilder;
pub use instrumentation::Instrumentation;

/// Optional layers wrapped around a pool by [`Publisher::new`].
#[derive(Clone, Debug, Default)]
pub struct PublisherOptions {
    pub encoding: Encoding,
    /// Mirror every encoded payload to the diagnostic stream.
    pub debug_stderr: bool,
    /// Deliver through an [`AsyncDeliveryQueue`] instead of on the caller's
    /// thread.
    pub delivery: Option<DeliveryConfig>,
    /// Probe a control endpoint and force reconnects when it goes silent.
    pub prober: Option<ProberConfig>,
    pub diagnostics: DiagnosticStream,
}

/// Serialises messages and ships them to the collector.
pub struct Publisher<S: Session = TransportSession> {
    encoding: Encoding,
    debug_stderr: bool,
    pool: Arc<SessionPool<S>>,
    queue: Option<AsyncDeliveryQueue>,
    prober: Mutex<Option<LivenessProber>>,
    diagnostics: DiagnosticStream,
    closed: AtomicBool,
}

impl Publisher<TransportSession> {
    /// Start configuring a publisher over the framed transport.
    pub fn builder() -> PublisherBuilder {
        PublisherBuilder::new()
    }
}

impl<S: Session> Publisher<S> {
    /// Wrap an existing pool, starting the delivery thread and prober the
    /// options ask for.
    pub fn new(pool: SessionPool<S>, options: PublisherOptions) -> Result<Self, BuildError> {
        let pool = Arc::new(pool);
        let queue = options
            .delivery
            .map(|config| {
                AsyncDeliveryQueue::spawn(Arc::clone(&pool), config, options.diagnostics.clone())
            })
            .transpose()?;

        let prober = match options.prober {
            Some(config) => {
                let sessions = pool.reconnect_handle();
                let delivery = queue.as_ref().map(AsyncDeliveryQueue::reconnect_flag);
                Some(LivenessProber::spawn(config, move || {
                    sessions.force_reconnect_all();
                    if let Some(flag) = &delivery {
                        flag.request();
                    }
                })?)
            }
            None => None,
        };

        Ok(Self {
            encoding: options.encoding,
            debug_stderr: options.debug_stderr,
            pool,
            queue,
            prober: Mutex::new(prober),
            diagnostics: options.diagnostics,
            closed: AtomicBool::new(false),
        })
    }

    /// Encode `message` and publish it.
    ///
    /// Delivery is best effort: a message that cannot be delivered is written
    /// to the diagnostic stream and dropped. Only encoding failures are
    /// reported.
    pub fn send_message<T>(&self, message: &T) -> Result<(), EncodeError>
    where
        T: Serialize + ?Sized,
    {
        let payload = self.encoding.encode(message)?;
        self.send_encoded(payload);
        Ok(())
    }

    /// Publish bytes that are already encoded.
    pub fn send_encoded(&self, payload: Vec<u8>) {
        if self.debug_stderr {
            self.diagnostics.emit(&payload);
        }
        if self.is_closed() {
            if !self.debug_stderr {
                self.diagnostics.emit(&payload);
            }
            return;
        }
        match &self.queue {
            // Rejections are already reported by the queue.
            Some(queue) => {
                let _ = queue.enqueue(payload);
            }
            None => {
                self.pool.send(&payload);
            }
        }
    }

    /// Ask every pooled session (and the delivery thread) to re-handshake.
    pub fn force_reconnect_all(&self) {
        self.pool.force_reconnect_all();
        if let Some(queue) = &self.queue {
            queue.request_reconnect();
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn pool(&self) -> &SessionPool<S> {
        &self.pool
    }

    /// Whether messages go through the asynchronous delivery queue.
    pub fn is_async(&self) -> bool {
        self.queue.is_some()
    }

    /// Messages waiting in the delivery queue; always zero when synchronous.
    pub fn pending(&self) -> usize {
        self.queue.as_ref().map_or(0, AsyncDeliveryQueue::pending)
    }

    /// Whether a liveness prober is running.
    pub fn is_probing(&self) -> bool {
        self.prober.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the prober, the delivery thread and the reconnection loop.
    ///
    /// Queued messages are discarded. Later messages go to the diagnostic
    /// stream. Calling this more than once is harmless.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut prober) = self.prober.lock().take() {
            prober.stop();
        }
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
        self.pool.stop();
        log::debug!("publisher closed");
    }
}

impl<S: Session> Drop for Publisher<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: Session> fmt::Debug for Publisher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("encoding", &self.encoding)
            .field("debug_stderr", &self.debug_stderr)
            .field("pool", &self.pool)
            .field("queue", &self.queue)
            .field("closed", &self.is_closed())
            .finish()
    }
}
