// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test invocation pipeline.
//!
//! A [`TestInvoker`] runs a single [`TestCase`] through its lifecycle:
//!
//! 1. **Initializing.** The number of supplied arguments is checked against the number of
//!    parameters the method declares. For instance methods, the test class is then constructed,
//!    bracketed by construction messages, and the before-test hooks run.
//! 2. **Running.** The test method runs, subject to the configured timeout.
//! 3. **Cleaning up.** After-test hooks run, followed by disposal of the instance if it
//!    supports it.
//! 4. **Finished.** The final state is built by the [`PostRunStateFactory`].
//!
//! Each transition rebinds the [`ExecutionContext`] to a new [`TestState`]. Failures from any
//! phase are collected rather than propagated: the invoker always runs to completion.
//!
//! Cancellation is cooperative. Once the [`CancellationSignal`] is set (by the caller, or
//! because the message bus asked to stop) no further construction, hook or test code is started,
//! but an instance that was already constructed is always disposed.

use crate::{
    aggregator::FailureAggregator,
    cancel::CancellationSignal,
    config::InvokerConfig,
    context::{ExecutionContext, TestContext},
    failure::{TestFailure, install_panic_hook},
    helpers::plural,
    message_bus::{ExecutionMessage, MessageBus},
    state::{TestState, TestStatus},
    test_case::{TestCase, TestInstance},
    test_output::TestOutputBuffer,
    time::{ExecutionTimer, execution_timer},
};
use debug_ignore::DebugIgnore;
use futures::future::BoxFuture;
use std::{
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, instrument, trace, warn};

/// Code that runs before and after every test method.
///
/// The current test and its state are available through [`ExecutionContext::current`] while
/// either method runs.
pub trait BeforeAfterTestHook: Send + Sync {
    /// Called before the test method runs. Returning a failure skips the test method.
    fn before<'a>(&'a self, test_case: &'a TestCase) -> BoxFuture<'a, Result<(), TestFailure>>;

    /// Called after the test method runs, if [`before`](Self::before) succeeded.
    fn after<'a>(&'a self, test_case: &'a TestCase) -> BoxFuture<'a, Result<(), TestFailure>>;
}

/// Builds the final state of a test from its raw execution data.
///
/// Substituting this changes how timing, output and failures become a reported outcome. The
/// returned state is always marked [`TestStatus::Finished`] by the invoker.
pub trait PostRunStateFactory: Send + Sync {
    /// Creates the final state.
    fn create_state(
        &self,
        execution_time: Duration,
        output: &str,
        failure: Option<&TestFailure>,
    ) -> TestState;
}

/// The standard [`PostRunStateFactory`]: passed if there is no failure, failed otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPostRunState;

impl PostRunStateFactory for DefaultPostRunState {
    fn create_state(
        &self,
        execution_time: Duration,
        output: &str,
        failure: Option<&TestFailure>,
    ) -> TestState {
        TestState::from_failure(execution_time, output, failure, TestStatus::Finished)
    }
}

/// Test invoker options.
#[derive(Debug, Default)]
pub struct TestInvokerBuilder {
    hooks: Vec<DebugIgnore<Arc<dyn BeforeAfterTestHook>>>,
    post_run_state: Option<DebugIgnore<Arc<dyn PostRunStateFactory>>>,
    config: InvokerConfig,
}

impl TestInvokerBuilder {
    /// Adds a before/after hook.
    ///
    /// Before-hooks run in the order they were added, and after-hooks in the reverse order.
    pub fn add_hook(&mut self, hook: Arc<dyn BeforeAfterTestHook>) -> &mut Self {
        self.hooks.push(DebugIgnore(hook));
        self
    }

    /// Sets the strategy used to build the final state. Defaults to [`DefaultPostRunState`].
    pub fn set_post_run_state(&mut self, factory: Arc<dyn PostRunStateFactory>) -> &mut Self {
        self.post_run_state = Some(DebugIgnore(factory));
        self
    }

    /// Sets the timeout and output settings.
    pub fn set_config(&mut self, config: InvokerConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Creates a new test invoker.
    pub fn build(self) -> TestInvoker {
        TestInvoker {
            hooks: self.hooks,
            post_run_state: self
                .post_run_state
                .unwrap_or_else(|| DebugIgnore(Arc::new(DefaultPostRunState))),
            config: self.config,
        }
    }
}

/// Runs test cases through their lifecycle.
///
/// Created using [`TestInvokerBuilder::build`]. A single invoker can run any number of tests,
/// including concurrently.
#[derive(Clone, Debug)]
pub struct TestInvoker {
    hooks: Vec<DebugIgnore<Arc<dyn BeforeAfterTestHook>>>,
    post_run_state: DebugIgnore<Arc<dyn PostRunStateFactory>>,
    config: InvokerConfig,
}

impl Default for TestInvoker {
    fn default() -> Self {
        TestInvokerBuilder::default().build()
    }
}

impl TestInvoker {
    /// Returns the invoker's settings.
    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Runs `test_case`, publishing lifecycle messages on `bus`.
    ///
    /// Returns the time spent running test code. The outcome is available through the
    /// [`ExecutionContext`] (if the caller established a scope) and the
    /// [`PostRunStateFactory`]. Use [`run_with_final_state`](Self::run_with_final_state) to
    /// receive it directly.
    pub async fn run(
        &self,
        test_case: Arc<TestCase>,
        bus: &dyn MessageBus,
        cancellation: &CancellationSignal,
    ) -> Duration {
        self.run_with_final_state(test_case, bus, cancellation)
            .await
            .0
    }

    /// Runs `test_case`, returning the time spent running test code and the final state.
    ///
    /// The run always gets an [`ExecutionContext::scope`] of its own, so runs driven
    /// concurrently from one task never see each other's bindings. If the caller is inside a
    /// scope, the final binding is copied into it once the run completes.
    #[instrument(level = "debug", skip_all, fields(test_id = %test_case.id()))]
    pub async fn run_with_final_state(
        &self,
        test_case: Arc<TestCase>,
        bus: &dyn MessageBus,
        cancellation: &CancellationSignal,
    ) -> (Duration, TestState) {
        let in_caller_scope = ExecutionContext::is_in_scope();
        let run = TestRun::new(self, test_case, bus, cancellation);
        let (outcome, final_context) = ExecutionContext::scope(async move {
            let outcome = run.execute().await;
            (outcome, ExecutionContext::current())
        })
        .await;

        if in_caller_scope
            && let Some(context) = final_context
            && let Err(error) = ExecutionContext::bind(context)
        {
            debug!("{error}");
        }
        outcome
    }
}

/// The state of a single run of a single test.
struct TestRun<'a> {
    invoker: &'a TestInvoker,
    test_case: Arc<TestCase>,
    bus: &'a dyn MessageBus,
    cancellation: &'a CancellationSignal,
    aggregator: FailureAggregator,
    timer: ExecutionTimer,
    output: TestOutputBuffer,
    context: TestContext,
}

impl<'a> TestRun<'a> {
    fn new(
        invoker: &'a TestInvoker,
        test_case: Arc<TestCase>,
        bus: &'a dyn MessageBus,
        cancellation: &'a CancellationSignal,
    ) -> Self {
        let output = TestOutputBuffer::new(invoker.config.capture_output());
        let context = TestContext::new(
            test_case.clone(),
            TestState::initializing(),
            cancellation.clone(),
            output.clone(),
        );
        Self {
            invoker,
            test_case,
            bus,
            cancellation,
            aggregator: FailureAggregator::new(),
            timer: execution_timer(),
            output,
            context,
        }
    }

    async fn execute(mut self) -> (Duration, TestState) {
        self.bind(TestState::initializing());
        self.check_arity();

        let instance = if !self.test_case.method().is_static() && self.can_proceed() {
            self.construct().await
        } else {
            None
        };

        if self.can_proceed() {
            let completed = self.run_before_hooks().await;
            if self.can_proceed() {
                self.bind(TestState::running());
                self.invoke_method(instance.clone()).await;
            }
            self.bind_cleaning_up();
            self.run_after_hooks(completed).await;
        } else {
            debug!(
                test_id = %self.test_case.id(),
                cancelled = self.cancellation.is_cancelled(),
                failures = self.aggregator.len(),
                "skipping hooks and test method",
            );
            self.bind_cleaning_up();
        }

        if let Some(instance) = &instance {
            self.dispose(instance).await;
        }

        self.finish()
    }

    /// Returns true if no failure has been recorded and the run hasn't been cancelled.
    fn can_proceed(&self) -> bool {
        !self.cancellation.is_cancelled() && !self.aggregator.has_failures()
    }

    fn check_arity(&mut self) {
        let expected = self.test_case.method().parameter_count();
        let provided = self.test_case.arguments().len();
        if expected != provided {
            self.aggregator.add(TestFailure::exception(
                "ArgumentCountMismatch",
                format!(
                    "The test method expected {expected} parameter {}, but {provided} parameter \
                     {} {} provided.",
                    plural::values_str(expected),
                    plural::values_str(provided),
                    plural::was_were_str(provided),
                ),
            ));
        }
    }

    async fn construct(&mut self) -> Option<TestInstance> {
        let info = self.test_case.info();
        if !self.publish(ExecutionMessage::TestClassConstructionStarting { test: info.clone() }) {
            return None;
        }

        let test_case = self.test_case.clone();
        // The constructor closure itself is user code, so it's called inside the phase.
        let instance = self
            .run_phase(|| async move {
                match test_case.class().construct() {
                    Some(constructor) => constructor.await,
                    None => Err(TestFailure::exception(
                        "MissingConstructor",
                        format!(
                            "test class `{}` cannot be constructed, but `{}` is an instance method",
                            test_case.class().name(),
                            test_case.method().name(),
                        ),
                    )),
                }
            })
            .await;

        self.publish(ExecutionMessage::TestClassConstructionFinished { test: info });
        instance
    }

    /// Runs before-hooks in order. Returns the number of hooks that completed successfully.
    async fn run_before_hooks(&mut self) -> usize {
        let invoker = self.invoker;
        let test_case = self.test_case.clone();
        let mut completed = 0;
        for hook in &invoker.hooks {
            if !self.can_proceed() {
                break;
            }
            if self.run_phase(|| hook.before(&test_case)).await.is_none() {
                debug!(test_id = %test_case.id(), hook = completed, "before-test hook failed");
                break;
            }
            completed += 1;
        }
        completed
    }

    /// Runs the after-hooks of the first `completed` hooks, in reverse order.
    async fn run_after_hooks(&mut self, completed: usize) {
        let invoker = self.invoker;
        let test_case = self.test_case.clone();
        for hook in invoker.hooks[..completed].iter().rev() {
            self.run_phase(|| hook.after(&test_case)).await;
        }
    }

    async fn invoke_method(&mut self, instance: Option<TestInstance>) {
        let method = self.test_case.method().clone();
        let arguments = self.test_case.arguments().clone();
        let timeout = self.invoker.config.timeout();

        self.run_phase(move || async move {
            let fut = method.invoke(instance.as_ref(), arguments);
            match timeout {
                Some(timeout) => tokio::time::timeout(timeout, fut)
                    .await
                    .unwrap_or_else(|_| Err(TestFailure::timeout(timeout))),
                None => fut.await,
            }
        })
        .await;
    }

    async fn dispose(&mut self, instance: &TestInstance) {
        let fixture = instance.fixture();
        let dispose = fixture.as_dispose();
        let async_dispose = fixture.as_async_dispose();
        if dispose.is_none() && async_dispose.is_none() {
            trace!(type_name = instance.type_name(), "instance is not disposable");
            return;
        }

        let info = self.test_case.info();
        // A stop request here only cancels the rest of the run: disposal always happens.
        self.publish(ExecutionMessage::TestClassDisposeStarting { test: info.clone() });
        if let Some(dispose) = dispose {
            self.run_phase(|| futures::future::ready(dispose.dispose()))
                .await;
        }
        if let Some(async_dispose) = async_dispose {
            self.run_phase(|| async_dispose.dispose_async()).await;
        }
        self.publish(ExecutionMessage::TestClassDisposeFinished { test: info });
    }

    fn finish(mut self) -> (Duration, TestState) {
        debug_assert!(self.timer.is_paused(), "timer paused after all phases");
        let execution_time = self.timer.total();
        let failure = self.aggregator.to_failure();
        let output = self.output.contents();

        self.bind(TestState::from_failure(
            execution_time,
            output.as_str(),
            failure.as_ref(),
            TestStatus::CleaningUp,
        ));

        let factory = &self.invoker.post_run_state;
        install_panic_hook();
        let state = catch_unwind(AssertUnwindSafe(|| {
            factory.create_state(execution_time, &output, failure.as_ref())
        }))
        .unwrap_or_else(|payload| {
            let panic_failure = TestFailure::from_caught_panic(&*payload);
            warn!(
                test_id = %self.test_case.id(),
                "post-run state factory panicked: {panic_failure}"
            );
            let failure = match failure {
                Some(failure) => TestFailure::aggregate([failure, panic_failure]),
                None => panic_failure,
            };
            DefaultPostRunState.create_state(execution_time, &output, Some(&failure))
        })
        .into_finished();

        self.bind(state.clone());
        debug!(
            test_id = %self.test_case.id(),
            result = ?state.result(),
            ?execution_time,
            failures = state.failures().map_or(0, |failures| failures.len()),
            "test finished",
        );
        (execution_time, state)
    }

    fn bind_cleaning_up(&mut self) {
        let failure = self.aggregator.to_failure();
        self.bind(TestState::from_failure(
            self.timer.total(),
            self.output.contents(),
            failure.as_ref(),
            TestStatus::CleaningUp,
        ));
    }

    fn bind(&mut self, state: TestState) {
        let status = state.status();
        self.context = self.context.with_state(state);
        match ExecutionContext::bind(self.context.clone()) {
            Ok(()) => trace!(test_id = %self.test_case.id(), ?status, "bound execution context"),
            Err(error) => debug!(?status, "{error}"),
        }
    }

    fn publish(&self, message: ExecutionMessage) -> bool {
        let kind = message.kind_str();
        let keep_going = self.bus.publish(message);
        if !keep_going {
            debug!(
                test_id = %self.test_case.id(),
                kind,
                "message bus requested stop, cancelling run",
            );
            self.cancellation.cancel();
        }
        keep_going
    }

    /// Runs a phase of user code, timing it and recording any failure or panic.
    ///
    /// `make` is called inside the phase, so panics while creating the future are caught too.
    async fn run_phase<T, F, Fut>(&mut self, make: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TestFailure>>,
    {
        self.timer
            .aggregate(self.aggregator.run_async(async move { make().await }))
            .await
    }
}
