//! Shared buffer used as a diagnostic stream in integration tests.

use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
};

/// Thread-safe byte buffer implementing [`Write`].
///
/// The inner buffer is kept private so tests can't bypass the `Write`
/// implementation.
#[derive(Clone, Default)]
pub struct SharedBuf {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuf {
    /// Return the buffer contents as UTF-8 text.
    #[allow(dead_code)]
    pub fn contents(&self) -> String {
        let bytes = self.buffer.lock().expect("SharedBuf mutex poisoned").clone();
        String::from_utf8(bytes).expect("buffer contains invalid UTF-8")
    }

    /// Return the newline-separated lines written so far.
    #[allow(dead_code)]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("SharedBuf mutex poisoned")
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
