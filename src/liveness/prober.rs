//! Background prober thread.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use log::{debug, warn};

use crate::{
    error::BuildError,
    transport::{
        Connection, Endpoint,
        connection::{is_timeout, read_frame, write_frame},
    },
};

/// Default time to wait for each probe reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2500);
/// Default number of unanswered probes tolerated before escalating.
pub const DEFAULT_REQUEST_RETRIES: u32 = 3;
/// Default pause between successful probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

const MAX_PROBE_FRAME: usize = 64;

/// Control endpoint and timing for a [`LivenessProber`].
#[derive(Clone, Debug)]
pub struct ProberConfig {
    pub endpoint: Endpoint,
    pub request_timeout: Duration,
    pub retries: u32,
    pub interval: Duration,
}

impl ProberConfig {
    /// Probe `endpoint` with the default timeout, retry budget and interval.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retries: DEFAULT_REQUEST_RETRIES,
            interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// Handle to the running prober thread. Dropping it stops the thread.
pub struct LivenessProber {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    sequence: Arc<AtomicU64>,
}

impl LivenessProber {
    /// Start probing. `on_failure` runs on the prober thread each time the
    /// retry budget is exhausted.
    pub fn spawn<F>(config: ProberConfig, on_failure: F) -> Result<Self, BuildError>
    where
        F: Fn() + Send + 'static,
    {
        if config.retries == 0 {
            return Err(BuildError::InvalidConfig(
                "probe_retries must be greater than zero".into(),
            ));
        }
        if config.request_timeout.is_zero() {
            return Err(BuildError::InvalidConfig(
                "probe_timeout_ms must be greater than zero".into(),
            ));
        }
        if config.interval.is_zero() {
            return Err(BuildError::InvalidConfig(
                "probe_interval_ms must be greater than zero".into(),
            ));
        }
        let (stop_tx, stop_rx) = bounded(1);
        let sequence = Arc::new(AtomicU64::new(0));
        let probe_loop = ProbeLoop {
            config,
            on_failure,
            stop_rx,
            sequence: Arc::clone(&sequence),
        };
        let handle = thread::Builder::new()
            .name("metricpub-liveness".into())
            .spawn(move || probe_loop.run())?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            sequence,
        })
    }

    /// Sequence number of the most recent probe request.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Stop probing and wait for the thread to exit. At most one in-flight
    /// poll is waited out.
    pub fn stop(&mut self) {
        self.stop_tx.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("liveness prober thread panicked");
        }
    }
}

impl Drop for LivenessProber {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LivenessProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessProber")
            .field("last_sequence", &self.last_sequence())
            .field("running", &self.handle.is_some())
            .finish()
    }
}

enum Probe {
    Answered,
    Unanswered,
    Stopped,
}

struct ProbeLoop<F> {
    config: ProberConfig,
    on_failure: F,
    stop_rx: Receiver<()>,
    sequence: Arc<AtomicU64>,
}

impl<F: Fn()> ProbeLoop<F> {
    fn run(self) {
        while !self.stop_requested() {
            if !self.probe_until_exhausted() {
                break;
            }
            warn!(
                "collector control endpoint {} missed {} probes; forcing reconnect",
                self.config.endpoint, self.config.retries
            );
            (self.on_failure)();
        }
        debug!("liveness prober exiting");
    }

    /// Probe until the retry budget runs out. Returns `false` when stopped.
    fn probe_until_exhausted(&self) -> bool {
        let mut retries_left = self.config.retries;
        let mut connection = self.open();
        while retries_left > 0 {
            let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
            loop {
                match self.exchange(&mut connection, sequence) {
                    Probe::Stopped => return false,
                    Probe::Answered => {
                        retries_left = self.config.retries;
                        if self.pause(self.config.interval) {
                            return false;
                        }
                        break;
                    }
                    Probe::Unanswered => {
                        if let Some(stale) = connection.take() {
                            stale.shutdown();
                        }
                        retries_left -= 1;
                        if retries_left == 0 {
                            break;
                        }
                        debug!("no reply to probe {sequence}; reconnecting and resending");
                        connection = self.open();
                    }
                }
            }
        }
        true
    }

    fn exchange(&self, connection: &mut Option<Connection>, sequence: u64) -> Probe {
        let deadline = Instant::now() + self.config.request_timeout;
        let Some(conn) = connection.as_mut() else {
            return self.wait_out(deadline);
        };
        if let Err(err) = write_frame(conn, sequence.to_string().as_bytes(), MAX_PROBE_FRAME) {
            debug!("probe {sequence} could not be sent: {err}");
            return self.wait_out(deadline);
        }
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || conn.set_read_timeout(Some(remaining)).is_err() {
                return Probe::Unanswered;
            }
            match read_frame(conn, MAX_PROBE_FRAME) {
                Ok(reply) if parse_sequence(&reply) == Some(sequence) => return Probe::Answered,
                Ok(reply) => {
                    debug!(
                        "ignoring malformed probe reply {:?}",
                        String::from_utf8_lossy(&reply)
                    );
                }
                Err(err) if is_timeout(&err) => return Probe::Unanswered,
                Err(err) => {
                    debug!("probe {sequence} reply failed: {err}");
                    return self.wait_out(deadline);
                }
            }
        }
    }

    fn open(&self) -> Option<Connection> {
        match Connection::open(&self.config.endpoint, self.config.request_timeout) {
            Ok(conn) => Some(conn),
            Err(err) => {
                debug!(
                    "liveness prober cannot reach {}: {err}",
                    self.config.endpoint
                );
                None
            }
        }
    }

    /// Treat the rest of the poll window as silence.
    fn wait_out(&self, deadline: Instant) -> Probe {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if self.pause(remaining) {
            Probe::Stopped
        } else {
            Probe::Unanswered
        }
    }

    /// Sleep for `duration`; returns `true` if a stop was requested.
    fn pause(&self, duration: Duration) -> bool {
        !matches!(
            self.stop_rx.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }
}

fn parse_sequence(reply: &[u8]) -> Option<u64> {
    std::str::from_utf8(reply).ok()?.trim().parse().ok()
}
