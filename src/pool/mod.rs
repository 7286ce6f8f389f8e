//! Fixed-size pool of transport sessions.
//!
//! Sessions live in an arena of slots; the idle container is a bounded
//! channel of slot indices. Checking a session out pops an index and locks
//! that slot, so at most `capacity` sessions are ever in use and a blocked
//! checkout resumes exactly when another caller returns a session. The
//! returned [`SessionGuard`] hands the index back on drop, including during
//! unwinding.
//!
//! A background thread periodically calls `connect` on every idle session.
//! Because `connect` is idempotent this only touches sessions that dropped
//! their connection, which is how the pool heals after a network blip or a
//! [`ReconnectHandle::force_reconnect_all`] request. The same pass flushes
//! frames that connected sessions accepted but could not yet write.

mod reconnect;


use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    diagnostics::DiagnosticStream, error::BuildError, rate_limited_warner::RateLimitedWarner,
    transport::Session,
};

pub use reconnect::ReconnectHandle;

/// Default number of sessions in a pool.
pub const DEFAULT_POOL_SIZE: usize = 10;
/// Default delay between reconnection passes.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Pool sizing and healing cadence.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub capacity: usize,
    pub reconnect_interval: Duration,
    pub warn_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_SIZE,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            warn_interval: crate::rate_limited_warner::DEFAULT_WARN_INTERVAL,
        }
    }
}

struct SessionSlot<S> {
    session: Mutex<S>,
    reconnect_requested: AtomicBool,
}

pub(crate) struct PoolInner<S> {
    slots: Vec<SessionSlot<S>>,
    idle_tx: Sender<usize>,
    idle_rx: Receiver<usize>,
    stopped: AtomicBool,
    diagnostics: DiagnosticStream,
    warner: RateLimitedWarner,
}

impl<S: Session> PoolInner<S> {
    fn guard(&self, index: usize) -> SessionGuard<'_, S> {
        let slot = &self.slots[index];
        let mut session = slot.session.lock();
        if slot.reconnect_requested.swap(false, Ordering::AcqRel) {
            session.disconnect();
        }
        SessionGuard {
            idle_tx: &self.idle_tx,
            index,
            session,
        }
    }

    pub(crate) fn request_reconnect_all(&self) {
        for slot in &self.slots {
            slot.reconnect_requested.store(true, Ordering::Release);
        }
    }

    /// Reconnect and flush every session not currently checked out.
    pub(crate) fn reconnect_pass(&self) {
        for (index, slot) in self.slots.iter().enumerate() {
            if self.is_stopped() {
                return;
            }
            let Some(mut session) = slot.session.try_lock() else {
                continue;
            };
            if slot.reconnect_requested.swap(false, Ordering::AcqRel) {
                session.disconnect();
            }
            if let Err(err) = session.connect() {
                debug!("session {index} reconnect attempt failed: {err}");
                continue;
            }
            if let Err(err) = session.flush() {
                debug!("session {index} flush failed: {err}");
            }
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Thread-safe pool of sessions with checkout/return semantics.
pub struct SessionPool<S: Session> {
    inner: Arc<PoolInner<S>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    reconnector: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Session> SessionPool<S> {
    /// Eagerly create `config.capacity` sessions with `factory` and start the
    /// reconnection thread. Sessions start disconnected; startup never waits
    /// on the network.
    pub fn new<F>(
        mut factory: F,
        config: PoolConfig,
        diagnostics: DiagnosticStream,
    ) -> Result<Self, BuildError>
    where
        F: FnMut() -> S,
    {
        if config.capacity == 0 {
            return Err(BuildError::InvalidConfig(
                "pool_size must be greater than zero".into(),
            ));
        }
        let (idle_tx, idle_rx) = bounded(config.capacity);
        let mut slots = Vec::with_capacity(config.capacity);
        for index in 0..config.capacity {
            slots.push(SessionSlot {
                session: Mutex::new(factory()),
                reconnect_requested: AtomicBool::new(false),
            });
            idle_tx
                .try_send(index)
                .map_err(|_| BuildError::InvalidConfig("idle queue rejected a session".into()))?;
        }
        let inner = Arc::new(PoolInner {
            slots,
            idle_tx,
            idle_rx,
            stopped: AtomicBool::new(false),
            diagnostics,
            warner: RateLimitedWarner::new(config.warn_interval),
        });
        let (stop_tx, handle) = reconnect::spawn_reconnector(Arc::clone(&inner), config.reconnect_interval)?;
        Ok(Self {
            inner,
            stop_tx: Mutex::new(Some(stop_tx)),
            reconnector: Mutex::new(Some(handle)),
        })
    }

    /// Borrow an idle session, blocking until one is returned if necessary.
    ///
    /// Returns `None` only if the idle queue has disconnected, which cannot
    /// happen while the pool holds its own sender.
    pub fn checkout(&self) -> Option<SessionGuard<'_, S>> {
        let index = self.inner.idle_rx.recv().ok()?;
        Some(self.inner.guard(index))
    }

    /// Borrow an idle session if one is immediately available.
    pub fn try_checkout(&self) -> Option<SessionGuard<'_, S>> {
        match self.inner.idle_rx.try_recv() {
            Ok(index) => Some(self.inner.guard(index)),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Send `payload` through a checked-out session.
    ///
    /// Returns `true` when the session accepted the payload. Failures are
    /// never propagated: the payload is written to the diagnostic stream and
    /// the session is returned so the reconnection loop can heal it.
    pub fn send(&self, payload: &[u8]) -> bool {
        let Some(mut session) = self.checkout() else {
            self.reject(payload, &"idle queue disconnected");
            return false;
        };
        match session.send(payload) {
            Ok(()) => true,
            Err(err) => {
                drop(session);
                self.reject(payload, &err);
                false
            }
        }
    }

    fn reject(&self, payload: &[u8], cause: &dyn fmt::Display) {
        self.inner.diagnostics.emit(payload);
        self.inner.warner.record_drop();
        self.inner.warner.warn_if_due(|count| {
            warn!("session pool dropped {count} messages; last failure: {cause}");
        });
    }

    /// Ask every session to re-handshake at its next checkout or
    /// reconnection pass.
    pub fn force_reconnect_all(&self) {
        self.inner.request_reconnect_all();
    }

    /// Cloneable handle other threads can use to force reconnects.
    pub fn reconnect_handle(&self) -> ReconnectHandle {
        ReconnectHandle::new(Arc::clone(&self.inner) as Arc<dyn reconnect::Reconnect>)
    }

    /// Number of sessions in the pool.
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of sessions currently idle.
    pub fn idle_count(&self) -> usize {
        self.inner.idle_rx.len()
    }

    /// Total payloads this pool failed to deliver.
    pub fn dropped(&self) -> u64 {
        self.inner.warner.total_dropped()
    }

    /// Stop the reconnection thread. Checked-out sessions are unaffected.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.stop_tx.lock().take();
        let Some(handle) = self.reconnector.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("session pool: reconnect thread panicked");
        }
        self.inner.warner.flush(|count| {
            warn!("session pool dropped {count} messages before stopping");
        });
    }

    /// Whether [`SessionPool::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}

impl<S: Session> Drop for SessionPool<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S: Session> fmt::Debug for SessionPool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("capacity", &self.capacity())
            .field("idle", &self.idle_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Exclusive access to one pooled session; returns it to the pool on drop.
pub struct SessionGuard<'a, S> {
    idle_tx: &'a Sender<usize>,
    index: usize,
    session: MutexGuard<'a, S>,
}

impl<S> SessionGuard<'_, S> {
    /// Arena index of the checked-out session.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<S> Deref for SessionGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S> DerefMut for SessionGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S> Drop for SessionGuard<'_, S> {
    fn drop(&mut self) {
        // The idle queue holds exactly `capacity` slots, so this never fails.
        let _ = self.idle_tx.try_send(self.index);
    }
}
