// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by trial-runner.
//!
//! Note that failures raised by the code under test are not errors in this sense: they are
//! recorded as [`TestFailure`](crate::failure::TestFailure) values and never escape the
//! invoker.

use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse trial-runner config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }
}

/// An error which indicates that a profile was requested but not known to trial-runner.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }

    /// Returns the profile that was requested.
    pub fn profile(&self) -> &str {
        &self.profile
    }
}

/// Returned by [`TestState::from_result`](crate::state::TestState::from_result) if the message
/// it was given does not describe a passed, failed or skipped test.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "unrecognized test outcome: `{message_kind}` is not a passed, failed or skipped result message"
)]
pub struct UnrecognizedOutcomeError {
    message_kind: &'static str,
}

impl UnrecognizedOutcomeError {
    pub(crate) fn new(message_kind: &'static str) -> Self {
        Self { message_kind }
    }

    /// Returns the kind of message that was not recognized.
    pub fn message_kind(&self) -> &'static str {
        self.message_kind
    }
}

/// Returned by [`ExecutionContext::bind`](crate::context::ExecutionContext::bind) when called
/// outside of an execution flow established by
/// [`ExecutionContext::scope`](crate::context::ExecutionContext::scope).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("cannot bind a test context outside of an execution context scope")]
#[non_exhaustive]
pub struct ContextBindError {}

impl ContextBindError {
    pub(crate) fn new() -> Self {
        Self {}
    }
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);
