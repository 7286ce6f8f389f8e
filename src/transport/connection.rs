//! Stream connections and length-prefixed framing.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use super::Endpoint;

/// Size of the big-endian length prefix preceding every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Active stream connection to an endpoint.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

fn socket_addrs(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    (host, port).to_socket_addrs().map(|iter| iter.collect())
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in socket_addrs(host, port)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{host}:{port} did not resolve to any address"),
        )
    }))
}

impl Connection {
    /// Open a blocking connection to `endpoint`.
    pub fn open(endpoint: &Endpoint, timeout: Duration) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp { host, port } => connect_tcp(host, *port, timeout).map(Connection::Tcp),
            Endpoint::Ipc { path } => {
                #[cfg(unix)]
                {
                    UnixStream::connect(path).map(Connection::Unix)
                }
                #[cfg(not(unix))]
                {
                    let _ = (path, timeout);
                    Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "ipc endpoints are not supported on this platform",
                    ))
                }
            }
        }
    }

    /// Update the read timeout for the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    /// Switch the socket between blocking and nonblocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.set_nonblocking(nonblocking),
        }
    }

    /// Shut down both directions, ignoring already-closed sockets.
    pub fn shutdown(&self) {
        let _ = match self {
            Connection::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.flush(),
        }
    }
}

/// Frame the payload with a big-endian length prefix.
pub fn frame_payload(payload: &[u8], max_size: usize) -> Option<Vec<u8>> {
    if payload.len() > max_size {
        return None;
    }
    let len = u32::try_from(payload.len()).ok()?;
    let capacity = payload.len().checked_add(FRAME_HEADER_LEN)?;
    let mut framed = Vec::with_capacity(capacity);
    framed.extend(len.to_be_bytes());
    framed.extend_from_slice(payload);
    Some(framed)
}

/// Write a single frame to a blocking writer.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8], max_size: usize) -> io::Result<()> {
    let frame = frame_payload(payload, max_size)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&frame)?;
    writer.flush()
}

/// Read a single frame from a blocking reader.
pub fn read_frame<R: Read>(reader: &mut R, max_size: usize) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("incoming frame of {len} bytes exceeds {max_size}"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Whether `err` is how a socket read timeout manifests on this platform.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
