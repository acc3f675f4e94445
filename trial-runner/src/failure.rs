// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failures recorded while running a test.
//!
//! A [`TestFailure`] is a tree: each failure may carry child causes, and an aggregate failure
//! groups several unrelated failures together. Reporting consumers don't deal with trees, so
//! every failure can be [flattened](TestFailure::flatten) into a set of parallel arrays with
//! parent indices, in pre-order.

use crate::{helpers::plural, state::FailureCause};
use serde::Serialize;
use smol_str::SmolStr;
use std::{
    any::Any,
    backtrace::{Backtrace, BacktraceStatus},
    cell::Cell,
    error::Error,
    fmt,
    sync::Once,
    time::Duration,
};

/// The parent index recorded for a failure that has no containing failure.
pub const ROOT_PARENT_INDEX: isize = -1;

/// The kind of a [`TestFailure`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// An assertion in the code under test did not hold.
    Assertion,

    /// Any other error or panic.
    Exception,

    /// The test body did not finish within its timeout.
    Timeout,

    /// Several unrelated failures grouped together.
    ///
    /// Aggregates are transparent when flattened: only their causes are listed.
    Aggregate,
}

/// A failure raised by user code or by the invoker itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestFailure {
    kind: FailureKind,
    type_name: SmolStr,
    message: String,
    stack_trace: Option<String>,
    causes: Vec<TestFailure>,
}

impl TestFailure {
    /// The type name used for failures created from a panic.
    pub const PANIC_TYPE_NAME: &'static str = "panic";

    /// Creates a new assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, "assertion", message)
    }

    /// Creates a new failure of kind [`FailureKind::Exception`] with the given type name.
    pub fn exception(type_name: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Exception, type_name, message)
    }

    /// Creates a new timeout failure.
    pub fn timeout(timeout: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            "timeout",
            format!(
                "Test execution timed out after {} milliseconds",
                timeout.as_millis()
            ),
        )
    }

    /// Groups several failures into a single aggregate failure.
    pub fn aggregate(failures: impl IntoIterator<Item = TestFailure>) -> Self {
        let causes: Vec<_> = failures.into_iter().collect();
        let message = format!(
            "{} {} occurred",
            causes.len(),
            plural::failures_str(causes.len())
        );
        Self {
            kind: FailureKind::Aggregate,
            type_name: "aggregate".into(),
            message,
            stack_trace: None,
            causes,
        }
    }

    /// Creates a failure from an error, recording its chain of sources as nested causes.
    ///
    /// If backtraces are enabled through `RUST_BACKTRACE`, the backtrace of the caller is
    /// recorded as the stack trace.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: Error + ?Sized,
    {
        let mut failure =
            Self::exception(std::any::type_name_of_val(error), error.to_string());
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            failure.stack_trace = Some(backtrace.to_string());
        }
        if let Some(source) = error.source() {
            failure.causes.push(Self::from_source(source));
        }
        failure
    }

    fn from_source(error: &(dyn Error + 'static)) -> Self {
        let mut failure = Self::exception("dyn std::error::Error", error.to_string());
        if let Some(source) = error.source() {
            failure.causes.push(Self::from_source(source));
        }
        failure
    }

    /// Creates a failure from a caught panic payload.
    ///
    /// Panics produced by the `assert!` family of macros (whose messages start with
    /// `assertion`) are classified as assertion failures. Everything else is an exception
    /// with the type name [`Self::PANIC_TYPE_NAME`].
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = crate::helpers::panic_message(payload);
        if message.starts_with("assertion") {
            Self::assertion(message)
        } else {
            Self::exception(Self::PANIC_TYPE_NAME, message)
        }
    }

    /// Creates a failure from a panic payload caught on this thread, using the location
    /// recorded by [`install_panic_hook`] as the stack trace.
    pub(crate) fn from_caught_panic(payload: &(dyn Any + Send)) -> Self {
        let failure = Self::from_panic(payload);
        match PANIC_LOCATION.with(Cell::take) {
            Some(location) => failure.with_stack_trace(location),
            None => failure,
        }
    }

    fn new(kind: FailureKind, type_name: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: None,
            causes: Vec::new(),
        }
    }

    /// Attaches a stack trace to this failure.
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Adds a child cause to this failure.
    pub fn with_cause(mut self, cause: TestFailure) -> Self {
        self.causes.push(cause);
        self
    }

    /// Returns the kind of failure.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the type name of the failure.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the stack trace, if one was recorded.
    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// Returns the direct causes of this failure.
    pub fn causes(&self) -> &[TestFailure] {
        &self.causes
    }

    /// Classifies this failure for reporting.
    ///
    /// An aggregate takes the cause of its first flattened entry.
    pub fn cause(&self) -> FailureCause {
        match self.kind {
            FailureKind::Assertion => FailureCause::Assertion,
            FailureKind::Exception => FailureCause::Exception,
            FailureKind::Timeout => FailureCause::Timeout,
            FailureKind::Aggregate => self
                .causes
                .first()
                .map_or(FailureCause::Exception, TestFailure::cause),
        }
    }

    /// Flattens this failure into parallel arrays using a pre-order traversal.
    pub fn flatten(&self) -> FlattenedFailures {
        let mut out = FlattenedFailures::default();
        self.flatten_into(ROOT_PARENT_INDEX, &mut out);
        out
    }

    fn flatten_into(&self, parent: isize, out: &mut FlattenedFailures) {
        if self.kind == FailureKind::Aggregate {
            // The aggregate itself isn't listed: its causes take its place.
            for cause in &self.causes {
                cause.flatten_into(parent, out);
            }
            return;
        }

        let index = out.push(self, parent);
        for cause in &self.causes {
            cause.flatten_into(index, out);
        }
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

// TestFailure deliberately does not implement Error, which allows `?` to convert any error.
impl<E> From<E> for TestFailure
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::from_error(&error)
    }
}

thread_local! {
    static PANIC_LOCATION: Cell<Option<String>> = const { Cell::new(None) };
}

/// Chains a panic hook that records where the last panic on each thread happened.
///
/// The previous hook still runs. Unwinding to the `catch_unwind` that handles a panic happens on
/// the panicking thread before anything else runs there, so the recorded location always
/// belongs to the panic being caught.
pub(crate) fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let mut location = match info.location() {
                Some(location) => format!("at {location}"),
                None => "at <unknown location>".to_owned(),
            };
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                location = format!("{location}\n{backtrace}");
            }
            // Ignore threads that are being torn down.
            let _ = PANIC_LOCATION.try_with(|slot| slot.set(Some(location)));
            previous(info);
        }));
    });
}

/// A [`TestFailure`] flattened into parallel arrays.
///
/// Entry `i` is described by `messages[i]`, `types[i]` and `stack_traces[i]`.
/// `parent_indices[i]` is the index of the entry that contains it, or [`ROOT_PARENT_INDEX`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FlattenedFailures {
    /// The message of each entry.
    pub messages: Vec<String>,

    /// The type name of each entry.
    pub types: Vec<SmolStr>,

    /// The stack trace of each entry, if any.
    pub stack_traces: Vec<Option<String>>,

    /// The index of each entry's parent, or [`ROOT_PARENT_INDEX`].
    pub parent_indices: Vec<isize>,
}

impl FlattenedFailures {
    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, failure: &TestFailure, parent: isize) -> isize {
        let index = self.messages.len() as isize;
        self.messages.push(failure.message.clone());
        self.types.push(failure.type_name.clone());
        self.stack_traces.push(failure.stack_trace.clone());
        self.parent_indices.push(parent);
        index
    }
}
