// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long test code runs.
//!
//! A test's execution time only counts the phases that run user code: construction, hooks, the
//! test body and disposal. The invoker resumes the stopwatch around each of those phases and
//! pauses it in between, so a test that never gets to run any code reports exactly zero.

use std::{
    future::Future,
    time::{Duration, Instant},
};

/// Returns a new stopwatch in the paused state.
pub(crate) fn execution_timer() -> ExecutionTimer {
    ExecutionTimer::new()
}

#[derive(Clone, Debug)]
pub(crate) struct ExecutionTimer {
    accumulated: Duration,
    pause_state: TimerPauseState,
}

impl ExecutionTimer {
    fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            pause_state: TimerPauseState::Paused,
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        matches!(self.pause_state, TimerPauseState::Paused)
    }

    pub(crate) fn resume(&mut self) {
        match &self.pause_state {
            TimerPauseState::Paused => {
                self.pause_state = TimerPauseState::Running {
                    resumed_at: Instant::now(),
                };
            }
            TimerPauseState::Running { .. } => {
                panic!("illegal state transition: resume() called while timer was running")
            }
        }
    }

    pub(crate) fn pause(&mut self) {
        match &self.pause_state {
            TimerPauseState::Running { resumed_at } => {
                self.accumulated += resumed_at.elapsed();
                self.pause_state = TimerPauseState::Paused;
            }
            TimerPauseState::Paused => {
                panic!("illegal state transition: pause() called while timer was paused")
            }
        }
    }

    /// Awaits `fut`, adding the time it takes to the total.
    pub(crate) async fn aggregate<F: Future>(&mut self, fut: F) -> F::Output {
        self.resume();
        let output = fut.await;
        self.pause();
        output
    }

    /// Returns the total time accumulated so far, including a phase that is in progress.
    pub(crate) fn total(&self) -> Duration {
        match &self.pause_state {
            TimerPauseState::Paused => self.accumulated,
            TimerPauseState::Running { resumed_at } => self.accumulated + resumed_at.elapsed(),
        }
    }
}

#[derive(Clone, Debug)]
enum TimerPauseState {
    Paused,
    Running { resumed_at: Instant },
}
