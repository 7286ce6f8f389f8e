//! Transport sessions: the publish socket(s) plus the slow-joiner handshake.

use std::{
    io::{self, Read},
    sync::Arc,
    time::{Duration, Instant},
};

use log::debug;

use crate::error::TransportError;

use super::{
    Connection, Endpoint, PublishSocket,
    connection::{FRAME_HEADER_LEN, frame_payload, is_timeout, write_frame},
    publish::PublishOutcome,
};

/// Default per-socket high-water mark.
pub const DEFAULT_HIGH_WATER_MARK: usize = 200;
/// Default time allowed for the handshake endpoint to acknowledge.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default maximum payload size (in bytes) accepted by a session.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1 << 20; // 1 MiB

/// Largest handshake reply a session is prepared to read.
const MAX_HANDSHAKE_REPLY: usize = 4096;

/// Behaviour the [`SessionPool`](crate::SessionPool) needs from a session.
///
/// Implementations are used by one thread at a time; exclusive access is
/// enforced by the pool's checkout/return cycle.
pub trait Session: Send + 'static {
    /// Establish the session. Must return immediately when already connected.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Deliver one payload, connecting inline first if needed.
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Drop the connection so the next `connect` performs a fresh handshake.
    fn disconnect(&mut self);

    /// Whether the last `connect` succeeded and nothing has failed since.
    fn is_connected(&self) -> bool;

    /// Push out anything accepted by `send` but not yet written. A hard
    /// write error disconnects the session.
    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Release every socket. Safe to call repeatedly.
    fn close(&mut self) {
        self.disconnect();
    }
}

/// Configuration shared by every session a pool creates.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Data endpoints; each frame is published to all of them.
    pub data_endpoints: Vec<Endpoint>,
    /// Request/acknowledge endpoint proving a subscriber is live. `None`
    /// publishes without any liveness check.
    pub handshake_endpoint: Option<Endpoint>,
    pub high_water_mark: usize,
    pub handshake_timeout: Duration,
    pub max_frame_size: usize,
}

impl SessionConfig {
    /// Configuration publishing to `data_endpoints` with default limits and no handshake.
    pub fn new(data_endpoints: Vec<Endpoint>) -> Self {
        Self {
            data_endpoints,
            handshake_endpoint: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Require a handshake against `endpoint` before publishing.
    pub fn with_handshake(mut self, endpoint: Endpoint) -> Self {
        self.handshake_endpoint = Some(endpoint);
        self
    }
}

/// One logical connection to the collector.
///
/// State machine: `Disconnected -> Connected` on a successful `connect`;
/// `Connected -> Disconnected` on a write failure or a forced reconnect.
#[derive(Debug)]
pub struct TransportSession {
    config: Arc<SessionConfig>,
    publishers: Vec<PublishSocket>,
    connected: bool,
}

impl TransportSession {
    /// Create a disconnected session. No sockets are opened until `connect`.
    pub fn new(config: Arc<SessionConfig>) -> Self {
        Self {
            config,
            publishers: Vec::new(),
            connected: false,
        }
    }

    /// Frames currently waiting in the publish sockets' pending queues.
    pub fn pending(&self) -> usize {
        self.publishers.iter().map(PublishSocket::pending).sum()
    }

    fn open_publishers(&self) -> Result<Vec<PublishSocket>, TransportError> {
        let mut publishers = Vec::with_capacity(self.config.data_endpoints.len());
        for endpoint in &self.config.data_endpoints {
            let opened = Connection::open(endpoint, self.config.handshake_timeout).and_then(|conn| {
                PublishSocket::new(endpoint.clone(), conn, self.config.high_water_mark)
            });
            match opened {
                Ok(socket) => publishers.push(socket),
                Err(source) => {
                    publishers.into_iter().for_each(PublishSocket::close);
                    return Err(TransportError::Connect {
                        endpoint: endpoint.clone(),
                        source,
                    });
                }
            }
        }
        Ok(publishers)
    }

    fn release_publishers(&mut self) {
        self.publishers.drain(..).for_each(PublishSocket::close);
    }
}

/// Send an empty probe and wait until `deadline` for any reply frame.
fn await_ack(handshake: &mut Connection, deadline: Instant) -> io::Result<()> {
    write_frame(handshake, &[], 0)?;
    let mut header = [0u8; FRAME_HEADER_LEN];
    read_until(handshake, &mut header, deadline)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_HANDSHAKE_REPLY {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("handshake reply of {len} bytes exceeds {MAX_HANDSHAKE_REPLY}"),
        ));
    }
    let mut reply = vec![0u8; len];
    read_until(handshake, &mut reply, deadline)
}

/// Fill `buf`, re-arming the read timeout from `deadline` before every read.
fn read_until(conn: &mut Connection, buf: &mut [u8], deadline: Instant) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::ErrorKind::TimedOut.into());
        }
        conn.set_read_timeout(Some(remaining))?;
        match conn.read(&mut buf[filled..]) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

impl Session for TransportSession {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Ok(());
        }
        if self.config.data_endpoints.is_empty() {
            return Err(TransportError::NoDataEndpoints);
        }
        let timeout = self.config.handshake_timeout;
        let deadline = Instant::now() + timeout;

        let mut handshake = match &self.config.handshake_endpoint {
            Some(endpoint) => Some(
                Connection::open(endpoint, timeout)
                    .map(|conn| (endpoint, conn))
                    .map_err(|source| TransportError::Connect {
                        endpoint: endpoint.clone(),
                        source,
                    })?,
            ),
            None => None,
        };

        let publishers = match self.open_publishers() {
            Ok(publishers) => publishers,
            Err(err) => {
                if let Some((_, conn)) = &handshake {
                    conn.shutdown();
                }
                return Err(err);
            }
        };

        if let Some((endpoint, conn)) = handshake.as_mut() {
            let acked = await_ack(conn, deadline);
            conn.shutdown();
            if let Err(err) = acked {
                publishers.into_iter().for_each(PublishSocket::close);
                debug!("handshake with {endpoint} failed: {err}");
                return Err(if is_timeout(&err) {
                    TransportError::HandshakeTimeout {
                        endpoint: (*endpoint).clone(),
                        timeout,
                    }
                } else {
                    TransportError::Connect {
                        endpoint: (*endpoint).clone(),
                        source: err,
                    }
                });
            }
        }

        self.publishers = publishers;
        self.connected = true;
        debug!(
            "session connected to {} data endpoint(s)",
            self.publishers.len()
        );
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let limit = self.config.max_frame_size;
        let frame = frame_payload(payload, limit).ok_or(TransportError::FrameTooLarge {
            size: payload.len(),
            limit,
        })?;
        if !self.connected {
            self.connect()?;
        }
        let result = self
            .publishers
            .iter_mut()
            .try_for_each(|socket| socket.publish(&frame).map(|_: PublishOutcome| ()));
        if let Err(err) = result {
            self.disconnect();
            return Err(TransportError::Io(err));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.release_publishers();
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let result = self
            .publishers
            .iter_mut()
            .try_for_each(|socket| socket.flush().map(|_| ()));
        if let Err(err) = result {
            self.disconnect();
            return Err(TransportError::Io(err));
        }
        Ok(())
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}
