// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for trial-runner.

/// Utilities for pluralizing various words based on count or plurality.
pub(crate) mod plural {
    /// Returns "value" if `count` is 1, otherwise "values".
    pub(crate) fn values_str(count: usize) -> &'static str {
        if count == 1 { "value" } else { "values" }
    }

    /// Returns "was" if `count` is 1, otherwise "were".
    pub(crate) fn was_were_str(count: usize) -> &'static str {
        if count == 1 { "was" } else { "were" }
    }

    /// Returns "failure" if `count` is 1, otherwise "failures".
    pub(crate) fn failures_str(count: usize) -> &'static str {
        if count == 1 { "failure" } else { "failures" }
    }
}

/// Extracts a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}
