// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for trial-runner.

mod fixtures;
mod invoker;

use std::sync::Once;

/// Installs error reporting and logging. Safe to call from every test.
pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Failing to install either one only affects diagnostics.
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}
