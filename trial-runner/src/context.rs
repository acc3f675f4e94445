// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ambient execution context.
//!
//! Code running inside a test (the test body, hooks, constructors, disposal) can find out which
//! test is running and what state it is in by calling [`ExecutionContext::current`], without
//! that information being passed down explicitly.
//!
//! The binding is stored in a tokio task-local, so it survives suspension points within the
//! flow that established it. Every concurrently running test has its own flow and hence its own
//! binding. Futures handed to `tokio::spawn` run on a different task and don't see the binding
//! unless wrapped with [`ExecutionContext::propagate`].

use crate::{
    cancel::CancellationSignal,
    errors::ContextBindError,
    state::{TestState, TestStatus},
    test_case::TestCase,
    test_output::TestOutputBuffer,
};
use std::{cell::RefCell, future::Future, sync::Arc};

tokio::task_local! {
    static CURRENT: RefCell<Option<TestContext>>;
}

/// The binding for the test running in the current flow.
///
/// This is a cheap-to-clone snapshot: rebinding the context creates a new `TestContext` rather
/// than changing an existing one.
#[derive(Clone, Debug)]
pub struct TestContext {
    test_case: Arc<TestCase>,
    state: Arc<TestState>,
    cancellation: CancellationSignal,
    output: TestOutputBuffer,
}

impl TestContext {
    /// Creates a new binding.
    pub fn new(
        test_case: Arc<TestCase>,
        state: TestState,
        cancellation: CancellationSignal,
        output: TestOutputBuffer,
    ) -> Self {
        Self {
            test_case,
            state: Arc::new(state),
            cancellation,
            output,
        }
    }

    /// Returns a new binding for the same test, with a new state.
    pub fn with_state(&self, state: TestState) -> Self {
        Self {
            test_case: self.test_case.clone(),
            state: Arc::new(state),
            cancellation: self.cancellation.clone(),
            output: self.output.clone(),
        }
    }

    /// Returns the test case.
    pub fn test_case(&self) -> &Arc<TestCase> {
        &self.test_case
    }

    /// Returns the test state at the time of binding.
    pub fn state(&self) -> &TestState {
        &self.state
    }

    /// Shorthand for `self.state().status()`.
    pub fn status(&self) -> TestStatus {
        self.state.status()
    }

    /// Returns the cancellation signal for the run.
    ///
    /// Long-running test code may poll or await this to stop early.
    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }

    /// Returns the buffer that test output should be written to.
    pub fn output(&self) -> &TestOutputBuffer {
        &self.output
    }
}

/// Access to the ambient [`TestContext`].
#[derive(Debug)]
pub enum ExecutionContext {}

impl ExecutionContext {
    /// Runs `fut` in a new flow scope, with no binding.
    ///
    /// Bindings made within `fut` are visible to it, including across suspension points, and
    /// disappear once it completes.
    pub async fn scope<F: Future>(fut: F) -> F::Output {
        CURRENT.scope(RefCell::new(None), fut).await
    }

    /// Returns true if the caller is running inside a flow scope.
    pub fn is_in_scope() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }

    /// Returns the current binding, or `None` if there is none.
    pub fn current() -> Option<TestContext> {
        CURRENT
            .try_with(|current| current.borrow().clone())
            .ok()
            .flatten()
    }

    /// Replaces the binding for the current flow.
    pub fn bind(context: TestContext) -> Result<(), ContextBindError> {
        CURRENT
            .try_with(|current| {
                current.replace(Some(context));
            })
            .map_err(|_| ContextBindError::new())
    }

    /// Removes the binding for the current flow. Returns the binding that was removed, if any.
    pub fn clear() -> Option<TestContext> {
        CURRENT
            .try_with(|current| current.take())
            .ok()
            .flatten()
    }

    /// Wraps `fut` so that it runs in its own flow scope, starting with a copy of the caller's
    /// current binding.
    ///
    /// Use this when handing work to `tokio::spawn` from within a test.
    pub fn propagate<F: Future>(fut: F) -> impl Future<Output = F::Output> {
        CURRENT.scope(RefCell::new(Self::current()), fut)
    }
}
