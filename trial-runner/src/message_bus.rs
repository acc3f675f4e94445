// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle messages and the bus they are published on.
//!
//! Publishing is cooperative: [`MessageBus::publish`] returns `false` if the subscriber wants the
//! run to stop. Messages are published in exactly the order the corresponding lifecycle events
//! occur.

use crate::{failure::FlattenedFailures, state::FailureCause, test_case::TestCaseInfo};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::trace;

/// A message describing a milestone in a test's run.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionMessage {
    /// The test class is about to be constructed.
    TestClassConstructionStarting {
        /// The test.
        test: TestCaseInfo,
    },

    /// The test class finished construction, successfully or not.
    TestClassConstructionFinished {
        /// The test.
        test: TestCaseInfo,
    },

    /// The test class instance is about to be disposed.
    TestClassDisposeStarting {
        /// The test.
        test: TestCaseInfo,
    },

    /// The test class instance finished disposal, successfully or not.
    TestClassDisposeFinished {
        /// The test.
        test: TestCaseInfo,
    },

    /// The test passed.
    TestPassed {
        /// The test.
        test: TestCaseInfo,

        /// The time spent running test code.
        execution_time: Duration,

        /// The captured output.
        output: String,
    },

    /// The test failed.
    TestFailed {
        /// The test.
        test: TestCaseInfo,

        /// The time spent running test code.
        execution_time: Duration,

        /// The captured output.
        output: String,

        /// Why the test failed.
        cause: FailureCause,

        /// The flattened failures.
        failures: FlattenedFailures,
    },

    /// The test was skipped.
    TestSkipped {
        /// The test.
        test: TestCaseInfo,

        /// The time spent running test code. Usually zero.
        execution_time: Duration,

        /// The captured output.
        output: String,

        /// Why the test was skipped.
        reason: String,
    },
}

impl ExecutionMessage {
    /// Returns the test this message is about.
    pub fn test(&self) -> &TestCaseInfo {
        match self {
            Self::TestClassConstructionStarting { test }
            | Self::TestClassConstructionFinished { test }
            | Self::TestClassDisposeStarting { test }
            | Self::TestClassDisposeFinished { test }
            | Self::TestPassed { test, .. }
            | Self::TestFailed { test, .. }
            | Self::TestSkipped { test, .. } => test,
        }
    }

    /// Returns a short, stable name for the kind of message.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::TestClassConstructionStarting { .. } => "test-class-construction-starting",
            Self::TestClassConstructionFinished { .. } => "test-class-construction-finished",
            Self::TestClassDisposeStarting { .. } => "test-class-dispose-starting",
            Self::TestClassDisposeFinished { .. } => "test-class-dispose-finished",
            Self::TestPassed { .. } => "test-passed",
            Self::TestFailed { .. } => "test-failed",
            Self::TestSkipped { .. } => "test-skipped",
        }
    }
}

/// A channel that lifecycle messages are published on.
///
/// A single bus may be shared by several concurrently running tests, so implementations must
/// accept concurrent publication without losing or corrupting messages.
pub trait MessageBus: Send + Sync {
    /// Publishes a message. Returns false if the run should stop.
    fn publish(&self, message: ExecutionMessage) -> bool;
}

impl<T: MessageBus + ?Sized> MessageBus for &T {
    fn publish(&self, message: ExecutionMessage) -> bool {
        (**self).publish(message)
    }
}

impl<T: MessageBus + ?Sized> MessageBus for Arc<T> {
    fn publish(&self, message: ExecutionMessage) -> bool {
        (**self).publish(message)
    }
}

/// A message bus that drops every message and never asks to stop.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullMessageBus;

impl MessageBus for NullMessageBus {
    fn publish(&self, message: ExecutionMessage) -> bool {
        trace!(kind = message.kind_str(), "dropping message");
        true
    }
}

/// Creates a message bus backed by an unbounded channel.
///
/// The returned [`MessageReceiver`] is the subscriber side: it receives messages in publication
/// order and can [request a stop](MessageReceiver::request_stop).
pub fn channel_message_bus() -> (ChannelMessageBus, MessageReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let stop = StopHandle::default();
    (
        ChannelMessageBus {
            sender,
            stop: stop.clone(),
        },
        MessageReceiver { receiver, stop },
    )
}

/// The publishing side of [`channel_message_bus`].
#[derive(Clone, Debug)]
pub struct ChannelMessageBus {
    sender: UnboundedSender<ExecutionMessage>,
    stop: StopHandle,
}

impl MessageBus for ChannelMessageBus {
    fn publish(&self, message: ExecutionMessage) -> bool {
        // The message is always delivered if the receiver is alive, even after a stop was
        // requested.
        match self.sender.send(message) {
            Ok(()) => !self.stop.is_stop_requested(),
            Err(_) => {
                // The receiver was dropped: nobody is listening any more.
                false
            }
        }
    }
}

/// The subscriber side of [`channel_message_bus`].
#[derive(Debug)]
pub struct MessageReceiver {
    receiver: UnboundedReceiver<ExecutionMessage>,
    stop: StopHandle,
}

impl MessageReceiver {
    /// Receives the next message, or `None` once every publisher has been dropped.
    pub async fn recv(&mut self) -> Option<ExecutionMessage> {
        self.receiver.recv().await
    }

    /// Receives a message if one is immediately available.
    pub fn try_recv(&mut self) -> Option<ExecutionMessage> {
        match self.receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Asks publishers to stop: every subsequent publish returns false.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Returns a handle that can request a stop independently of this receiver.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}

/// A cloneable handle used to ask publishers on a [`ChannelMessageBus`] to stop.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    /// Asks publishers to stop.
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Returns true if a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
