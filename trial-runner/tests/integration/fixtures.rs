// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use futures::{FutureExt, future::BoxFuture};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use trial_runner::{
    context::ExecutionContext,
    failure::TestFailure,
    invoker::{BeforeAfterTestHook, DefaultPostRunState, PostRunStateFactory},
    message_bus::{ExecutionMessage, MessageBus},
    state::{TestState, TestStatus},
    test_case::{AsyncDispose, Dispose, TestCase, TestClass, TestFixture, TestMethod},
};

/// A shared, ordered log of everything observable that happened during a run.
#[derive(Clone, Debug, Default)]
pub(crate) struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.events.lock().expect("lock not poisoned").push(event.into());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().expect("lock not poisoned").clone()
    }
}

/// A message bus that records the kind of every message into an [`EventLog`], and asks to stop
/// after the first message of kind `stop_after`.
#[derive(Debug, Default)]
pub(crate) struct RecordingBus {
    log: EventLog,
    messages: Mutex<Vec<ExecutionMessage>>,
    stop_after: Option<&'static str>,
}

impl RecordingBus {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            log,
            messages: Mutex::default(),
            stop_after: None,
        }
    }

    pub(crate) fn stopping_after(log: EventLog, kind: &'static str) -> Self {
        Self {
            stop_after: Some(kind),
            ..Self::new(log)
        }
    }

    pub(crate) fn messages(&self) -> Vec<ExecutionMessage> {
        self.messages.lock().expect("lock not poisoned").clone()
    }
}

impl MessageBus for RecordingBus {
    fn publish(&self, message: ExecutionMessage) -> bool {
        let kind = message.kind_str();
        self.log.push(kind);
        self.messages.lock().expect("lock not poisoned").push(message);
        self.stop_after != Some(kind)
    }
}

/// What a hook should do in its `before` and `after` calls.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum HookBehavior {
    #[default]
    Succeed,
    Fail,
    Panic,
}

/// A hook that logs its calls along with the status visible through the execution context.
#[derive(Debug)]
pub(crate) struct RecordingHook {
    name: &'static str,
    log: EventLog,
    before: HookBehavior,
    after: HookBehavior,
    observed: Mutex<Vec<TestState>>,
}

impl RecordingHook {
    pub(crate) fn new(name: &'static str, log: EventLog) -> Self {
        Self {
            name,
            log,
            before: HookBehavior::Succeed,
            after: HookBehavior::Succeed,
            observed: Mutex::default(),
        }
    }

    pub(crate) fn with_before(mut self, behavior: HookBehavior) -> Self {
        self.before = behavior;
        self
    }

    pub(crate) fn with_after(mut self, behavior: HookBehavior) -> Self {
        self.after = behavior;
        self
    }

    /// Returns the states observed from within `before` and `after`, in call order.
    pub(crate) fn observed(&self) -> Vec<TestState> {
        self.observed.lock().expect("lock not poisoned").clone()
    }

    fn call(&self, which: &str, behavior: HookBehavior) -> Result<(), TestFailure> {
        let context = ExecutionContext::current().expect("hook runs with a bound context");
        self.observed
            .lock()
            .expect("lock not poisoned")
            .push(context.state().clone());
        self.log.push(format!("{}.{which}", self.name));
        match behavior {
            HookBehavior::Succeed => Ok(()),
            HookBehavior::Fail => Err(TestFailure::exception(
                "HookError",
                format!("{}.{which} failed", self.name),
            )),
            HookBehavior::Panic => panic!("{}.{which} panicked", self.name),
        }
    }
}

impl BeforeAfterTestHook for RecordingHook {
    fn before<'a>(&'a self, _test_case: &'a TestCase) -> BoxFuture<'a, Result<(), TestFailure>> {
        async move {
            tokio::task::yield_now().await;
            self.call("before", self.before)
        }
        .boxed()
    }

    fn after<'a>(&'a self, _test_case: &'a TestCase) -> BoxFuture<'a, Result<(), TestFailure>> {
        async move {
            tokio::task::yield_now().await;
            self.call("after", self.after)
        }
        .boxed()
    }
}

/// A post-run state factory that records the state bound while it runs.
#[derive(Debug, Default)]
pub(crate) struct RecordingPostRunState {
    observed: Mutex<Option<TestState>>,
}

impl RecordingPostRunState {
    pub(crate) fn observed(&self) -> Option<TestState> {
        self.observed.lock().expect("lock not poisoned").clone()
    }
}

impl PostRunStateFactory for RecordingPostRunState {
    fn create_state(
        &self,
        execution_time: Duration,
        output: &str,
        failure: Option<&TestFailure>,
    ) -> TestState {
        *self.observed.lock().expect("lock not poisoned") =
            ExecutionContext::current().map(|context| context.state().clone());
        DefaultPostRunState.create_state(execution_time, output, failure)
    }
}

/// Which disposal capabilities a [`Disposable`] exposes, and whether they fail.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DisposeOptions {
    pub(crate) sync: bool,
    pub(crate) async_: bool,
    pub(crate) fail: bool,
}

/// A test class instance with configurable disposal.
#[derive(Debug)]
pub(crate) struct Disposable {
    log: EventLog,
    options: DisposeOptions,
}

impl Disposable {
    /// Returns a test class that constructs `Disposable` instances, logging construction.
    pub(crate) fn class(log: EventLog, options: DisposeOptions) -> TestClass {
        TestClass::with_constructor("Disposable", move || {
            let log = log.clone();
            async move {
                log.push("construct");
                Ok(Disposable { log, options })
            }
        })
    }

    /// Returns an instance method that logs and then runs `body`.
    pub(crate) fn method(
        name: &'static str,
        body: impl Fn() -> Result<(), TestFailure> + Send + Sync + 'static,
    ) -> TestMethod {
        let body = Arc::new(body);
        TestMethod::new_instance(name, 0, move |this: Arc<Disposable>, _args| {
            let body = body.clone();
            async move {
                this.log.push("body");
                body()
            }
        })
    }
}

impl TestFixture for Disposable {
    fn as_dispose(&self) -> Option<&dyn Dispose> {
        self.options.sync.then_some(self as &dyn Dispose)
    }

    fn as_async_dispose(&self) -> Option<&dyn AsyncDispose> {
        self.options.async_.then_some(self as &dyn AsyncDispose)
    }
}

impl Dispose for Disposable {
    fn dispose(&self) -> Result<(), TestFailure> {
        self.log.push("dispose");
        if self.options.fail {
            Err(TestFailure::exception("DisposeError", "dispose failed"))
        } else {
            Ok(())
        }
    }
}

impl AsyncDispose for Disposable {
    fn dispose_async(&self) -> BoxFuture<'_, Result<(), TestFailure>> {
        async move {
            tokio::task::yield_now().await;
            self.log.push("dispose_async");
            if self.options.fail {
                Err(TestFailure::exception(
                    "DisposeError",
                    "async dispose failed",
                ))
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}

/// Returns the status bound in the execution context right now.
pub(crate) fn current_status() -> Option<TestStatus> {
    ExecutionContext::current().map(|context| context.status())
}
