// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collecting failures across the phases of a test run.

use crate::failure::{TestFailure, install_panic_hook};
use futures::FutureExt;
use std::{
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// Collects the failures raised while running a test.
///
/// Each test run owns its own aggregator. Phases either [add](Self::add) failures directly, or
/// run user code through [`run`](Self::run) or [`run_async`](Self::run_async), which record
/// both returned failures and panics.
#[derive(Clone, Debug, Default)]
pub struct FailureAggregator {
    failures: Vec<TestFailure>,
}

impl FailureAggregator {
    /// Creates a new, empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure.
    pub fn add(&mut self, failure: TestFailure) {
        self.failures.push(failure);
    }

    /// Records the failure in `result`, if any. Returns the success value otherwise.
    pub fn add_result<T>(&mut self, result: Result<T, TestFailure>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(failure) => {
                self.add(failure);
                None
            }
        }
    }

    /// Moves all failures recorded in `other` into this aggregator.
    pub fn extend(&mut self, other: FailureAggregator) {
        self.failures.extend(other.failures);
    }

    /// Runs `f`, recording a returned failure or a panic.
    ///
    /// Returns the value produced by `f` if it succeeded.
    pub fn run<T>(&mut self, f: impl FnOnce() -> Result<T, TestFailure>) -> Option<T> {
        install_panic_hook();
        let result = catch_unwind(AssertUnwindSafe(f))
            .unwrap_or_else(|payload| Err(TestFailure::from_caught_panic(&*payload)));
        self.add_result(result)
    }

    /// Awaits `fut`, recording a returned failure or a panic.
    ///
    /// Returns the value produced by `fut` if it succeeded.
    pub async fn run_async<T, F>(&mut self, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, TestFailure>>,
    {
        install_panic_hook();
        let result = AssertUnwindSafe(fut)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(TestFailure::from_caught_panic(&*payload)));
        self.add_result(result)
    }

    /// Returns true if at least one failure was recorded.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Returns the number of failures recorded.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns true if no failures were recorded.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Removes all recorded failures.
    pub fn clear(&mut self) {
        self.failures.clear();
    }

    /// Returns the consolidated failure.
    ///
    /// This is `None` if nothing was recorded, the failure itself if exactly one was recorded,
    /// and an [aggregate](TestFailure::aggregate) of all failures in the order they were
    /// recorded otherwise.
    pub fn to_failure(&self) -> Option<TestFailure> {
        match self.failures.as_slice() {
            [] => None,
            [failure] => Some(failure.clone()),
            failures => Some(TestFailure::aggregate(failures.iter().cloned())),
        }
    }
}
