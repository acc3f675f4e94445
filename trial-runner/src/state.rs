// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Immutable snapshots of a test's progress through its lifecycle.
//!
//! A [`TestState`] is never mutated: every phase transition creates a new snapshot. Fields
//! other than the status are only populated once the test has reached
//! [`TestStatus::CleaningUp`].

use crate::{
    errors::UnrecognizedOutcomeError,
    failure::{FlattenedFailures, TestFailure},
    message_bus::ExecutionMessage,
};
use serde::Serialize;
use std::time::Duration;

/// The lifecycle phase a test is in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    /// The test class is being constructed and before-test hooks are running.
    Initializing,

    /// The test method is running.
    Running,

    /// After-test hooks and disposal are running.
    CleaningUp,

    /// The test has finished. This is a terminal state.
    Finished,
}

impl TestStatus {
    /// Returns true if results are available in this status.
    pub fn has_result(self) -> bool {
        self >= TestStatus::CleaningUp
    }
}

/// The outcome of a test.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestOutcome {
    /// The test passed.
    Passed,

    /// The test failed.
    Failed,

    /// The test was skipped.
    Skipped,
}

/// Why a test failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCause {
    /// An assertion did not hold.
    Assertion,

    /// Any other failure.
    Exception,

    /// The test timed out.
    Timeout,
}

/// A snapshot of a test's lifecycle progress.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestState {
    status: TestStatus,
    execution_time: Option<Duration>,
    output: Option<String>,
    result: Option<TestOutcome>,
    failure_cause: Option<FailureCause>,
    // The result, cause and flattened failures are always set together.
    failures: Option<FlattenedFailures>,
}

impl TestState {
    /// Returns the state for a test that is initializing.
    pub fn initializing() -> Self {
        Self::without_result(TestStatus::Initializing)
    }

    /// Returns the state for a test that is running.
    pub fn running() -> Self {
        Self::without_result(TestStatus::Running)
    }

    fn without_result(status: TestStatus) -> Self {
        Self {
            status,
            execution_time: None,
            output: None,
            result: None,
            failure_cause: None,
            failures: None,
        }
    }

    /// Builds a state with a result, from the raw execution data.
    ///
    /// `status` is expected to be [`TestStatus::CleaningUp`] or [`TestStatus::Finished`]. If
    /// `failure` is `None`, the test passed; otherwise it failed, and `failure` is flattened
    /// into the exception arrays.
    ///
    /// An `execution_time` of zero means that no test code ran.
    pub fn from_failure(
        execution_time: Duration,
        output: impl Into<String>,
        failure: Option<&TestFailure>,
        status: TestStatus,
    ) -> Self {
        debug_assert!(
            status.has_result(),
            "from_failure called with pre-result status {status:?}"
        );
        let (result, failure_cause, failures) = match failure {
            None => (TestOutcome::Passed, None, None),
            Some(failure) => (
                TestOutcome::Failed,
                Some(failure.cause()),
                Some(failure.flatten()),
            ),
        };
        Self {
            status,
            execution_time: Some(execution_time),
            output: Some(output.into()),
            result: Some(result),
            failure_cause,
            failures,
        }
    }

    /// Builds a finished state from a reported result message.
    ///
    /// Returns an error if `message` is not a [`TestPassed`](ExecutionMessage::TestPassed),
    /// [`TestFailed`](ExecutionMessage::TestFailed) or
    /// [`TestSkipped`](ExecutionMessage::TestSkipped) message.
    pub fn from_result(message: &ExecutionMessage) -> Result<Self, UnrecognizedOutcomeError> {
        let (execution_time, output, result, failure_cause, failures) = match message {
            ExecutionMessage::TestPassed {
                execution_time,
                output,
                ..
            } => (execution_time, output, TestOutcome::Passed, None, None),
            ExecutionMessage::TestFailed {
                execution_time,
                output,
                cause,
                failures,
                ..
            } => (
                execution_time,
                output,
                TestOutcome::Failed,
                Some(*cause),
                Some(failures.clone()),
            ),
            ExecutionMessage::TestSkipped {
                execution_time,
                output,
                ..
            } => (execution_time, output, TestOutcome::Skipped, None, None),
            other => return Err(UnrecognizedOutcomeError::new(other.kind_str())),
        };
        Ok(Self {
            status: TestStatus::Finished,
            execution_time: Some(*execution_time),
            output: Some(output.clone()),
            result: Some(result),
            failure_cause,
            failures,
        })
    }

    /// Returns a copy of this snapshot with the status set to [`TestStatus::Finished`].
    pub(crate) fn into_finished(self) -> Self {
        Self {
            status: TestStatus::Finished,
            ..self
        }
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Returns the time spent running test code, once available.
    pub fn execution_time(&self) -> Option<Duration> {
        self.execution_time
    }

    /// Returns the captured output, once available.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Returns the outcome, once available.
    pub fn result(&self) -> Option<TestOutcome> {
        self.result
    }

    /// Returns why the test failed, if it failed.
    pub fn failure_cause(&self) -> Option<FailureCause> {
        self.failure_cause
    }

    /// Returns all the flattened failures, if the test failed.
    pub fn failures(&self) -> Option<&FlattenedFailures> {
        self.failures.as_ref()
    }

    /// Returns the failure messages, if the test failed.
    pub fn exception_messages(&self) -> Option<&[String]> {
        self.failures.as_ref().map(|f| f.messages.as_slice())
    }

    /// Returns the failure type names, if the test failed.
    pub fn exception_types(&self) -> Option<&[smol_str::SmolStr]> {
        self.failures.as_ref().map(|f| f.types.as_slice())
    }

    /// Returns the failure stack traces, if the test failed.
    pub fn exception_stack_traces(&self) -> Option<&[Option<String>]> {
        self.failures.as_ref().map(|f| f.stack_traces.as_slice())
    }

    /// Returns the parent index of each failure, if the test failed.
    pub fn exception_parent_indices(&self) -> Option<&[isize]> {
        self.failures.as_ref().map(|f| f.parent_indices.as_slice())
    }
}
