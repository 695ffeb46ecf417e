//! Host output routing.
//!
//! Script output (`Сообщить` and friends in the host's standard library) goes
//! through a [`PrintWriter`] installed on the root environment, so embedders
//! can capture or discard it.

use std::sync::{Arc, Mutex, PoisonError};

/// Destination for script print output.
pub trait PrintWriter: Send {
    fn print(&mut self, text: &str);
}

/// Writes print output to the process stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn print(&mut self, text: &str) {
        print!("{text}");
    }
}

/// Collects print output into a shared string, for tests and embedding.
///
/// Clones share the buffer: install one clone on the environment and keep
/// another to read what the script printed.
#[derive(Debug, Clone, Default)]
pub struct CollectStringPrint {
    buf: Arc<Mutex<String>>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected output, leaving the buffer empty.
    pub fn take(&self) -> String {
        std::mem::take(&mut self.buf.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PrintWriter for CollectStringPrint {
    fn print(&mut self, text: &str) {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner).push_str(text);
    }
}

/// Discards all print output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn print(&mut self, _text: &str) {}
}
