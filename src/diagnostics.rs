//! Diagnostic fallback stream.
//!
//! Messages that cannot be delivered are written here, newline-terminated, so
//! nothing is lost silently. The stream defaults to standard error; tests
//! inject their own writer.

use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};

use parking_lot::Mutex;

/// Shared, thread-safe sink for dropped or mirrored payloads.
#[derive(Clone)]
pub struct DiagnosticStream {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl DiagnosticStream {
    /// Stream writing to the process's standard error.
    pub fn stderr() -> Self {
        Self::from_writer(io::stderr())
    }

    /// Stream writing to an arbitrary writer.
    pub fn from_writer<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Write `payload` followed by a newline and flush.
    ///
    /// Write failures are ignored: this is already the last-resort channel.
    pub fn emit(&self, payload: &[u8]) {
        let mut writer = self.writer.lock();
        let _ = writer
            .write_all(payload)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
    }
}

impl Default for DiagnosticStream {
    fn default() -> Self {
        Self::stderr()
    }
}

impl fmt::Debug for DiagnosticStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticStream").finish_non_exhaustive()
    }
}
