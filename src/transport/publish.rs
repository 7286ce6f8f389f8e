//! Outbound publish socket with a per-socket high-water mark.
//!
//! The socket runs in nonblocking mode. Frames the kernel will not accept
//! immediately wait in a bounded pending queue and are pushed out on the next
//! publish or [`PublishSocket::flush`]. Once `high_water_mark` frames are pending, new frames are dropped
//! by the socket itself; a slow collector therefore never makes the caller
//! block or grow memory without bound.

use std::{
    collections::VecDeque,
    io::{self, Write},
};

use log::debug;

use super::{Connection, Endpoint};

/// Result of handing a frame to a [`PublishSocket`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The frame was written or queued behind earlier frames.
    Accepted,
    /// The pending queue was at its high-water mark; the frame was dropped.
    Dropped,
}

/// One nonblocking outbound connection.
#[derive(Debug)]
pub struct PublishSocket {
    endpoint: Endpoint,
    connection: Connection,
    high_water_mark: usize,
    pending: VecDeque<Vec<u8>>,
    offset: usize,
    dropped: u64,
}

impl PublishSocket {
    /// Wrap an established connection, switching it to nonblocking mode.
    pub fn new(
        endpoint: Endpoint,
        connection: Connection,
        high_water_mark: usize,
    ) -> io::Result<Self> {
        connection.set_nonblocking(true)?;
        Ok(Self {
            endpoint,
            connection,
            high_water_mark,
            pending: VecDeque::new(),
            offset: 0,
            dropped: 0,
        })
    }

    /// Queue `frame` and push out as much pending data as the socket accepts.
    pub fn publish(&mut self, frame: &[u8]) -> io::Result<PublishOutcome> {
        self.pump()?;
        if self.pending.len() >= self.high_water_mark {
            self.dropped += 1;
            debug!(
                "publish socket {} at high-water mark {}; dropped {} frames so far",
                self.endpoint, self.high_water_mark, self.dropped
            );
            return Ok(PublishOutcome::Dropped);
        }
        self.pending.push_back(frame.to_vec());
        self.pump()?;
        Ok(PublishOutcome::Accepted)
    }

    /// Number of frames still waiting for the kernel to accept them.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Frames dropped because the high-water mark was reached.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Push out pending frames without queueing a new one. Returns the number
    /// of frames still waiting.
    pub fn flush(&mut self) -> io::Result<usize> {
        self.pump()?;
        Ok(self.pending.len())
    }

    /// Release the socket. Pending frames are discarded.
    pub fn close(self) {
        if !self.pending.is_empty() {
            debug!(
                "publish socket {} closed with {} pending frames discarded",
                self.endpoint,
                self.pending.len()
            );
        }
        self.connection.shutdown();
    }

    fn pump(&mut self) -> io::Result<()> {
        while let Some(front) = self.pending.front() {
            match self.connection.write(&front[self.offset..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.offset += n;
                    if self.offset == front.len() {
                        self.pending.pop_front();
                        self.offset = 0;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
