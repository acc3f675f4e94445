// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capturing textual output written by tests.
//!
//! Test code reaches the buffer through
//! [`TestContext::output`](crate::context::TestContext::output). The captured text becomes the
//! [`output`](crate::state::TestState::output) of the test's final state.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// The output buffer for a single test.
///
/// Cloning the buffer produces another handle to the same underlying text.
#[derive(Clone, Debug)]
pub struct TestOutputBuffer {
    inner: Arc<Mutex<String>>,
    capture: bool,
}

impl TestOutputBuffer {
    /// Creates a new buffer.
    ///
    /// If `capture` is false, text written to the buffer is forwarded to `tracing` and not
    /// retained.
    pub fn new(capture: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(String::with_capacity(1024))),
            capture,
        }
    }

    /// Returns true if output is being captured.
    pub fn is_capturing(&self) -> bool {
        self.capture
    }

    /// Appends text to the buffer.
    pub fn write(&self, text: &str) {
        if self.capture {
            self.lock().push_str(text);
        } else {
            info!(target: "trial_runner::output", "{text}");
        }
    }

    /// Appends a line of text to the buffer.
    pub fn write_line(&self, line: &str) {
        if self.capture {
            let mut buf = self.lock();
            buf.push_str(line);
            buf.push('\n');
        } else {
            info!(target: "trial_runner::output", "{line}");
        }
    }

    /// Returns a writer that implements [`std::fmt::Write`] and [`std::io::Write`].
    pub fn writer(&self) -> TestOutputWriter<'_> {
        TestOutputWriter { buffer: self }
    }

    /// Returns a copy of everything captured so far.
    pub fn contents(&self) -> String {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        // A panic while holding the lock can't leave a String in an invalid state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Provides [`std::io::Write`] and [`std::fmt::Write`] implementations for a
/// [`TestOutputBuffer`].
#[derive(Debug)]
pub struct TestOutputWriter<'buf> {
    buffer: &'buf TestOutputBuffer,
}

impl std::fmt::Write for TestOutputWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.buffer.write(s);
        Ok(())
    }
}

impl std::io::Write for TestOutputWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // This is the lazy way to do this, but test output is text in almost all cases.
        self.buffer.write(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
