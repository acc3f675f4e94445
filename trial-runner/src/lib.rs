// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! The execution core of a test engine.
//!
//! This crate takes one already-discovered [`TestCase`](test_case::TestCase) and runs it under a
//! managed lifecycle: construction of the test class, before-test hooks, invocation of the test
//! method, after-test hooks and disposal. Along the way it:
//!
//! * exposes the current test and its [`TestState`](state::TestState) to any code reachable from
//!   the test through the [`ExecutionContext`](context::ExecutionContext),
//! * collects failures from every phase into a single
//!   [`FailureAggregator`](aggregator::FailureAggregator),
//! * publishes lifecycle messages on a [`MessageBus`](message_bus::MessageBus), whose return value
//!   lets a subscriber stop the run early.
//!
//! The entry point is [`TestInvoker`](invoker::TestInvoker).

pub mod aggregator;
pub mod cancel;
pub mod config;
pub mod context;
pub mod errors;
pub mod failure;
mod helpers;
pub mod invoker;
pub mod message_bus;
pub mod signal;
pub mod state;
pub mod test_case;
pub mod test_output;
mod time;
