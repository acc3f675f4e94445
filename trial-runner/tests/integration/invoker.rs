// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{
    DisposeOptions, Disposable, EventLog, HookBehavior, RecordingBus, RecordingHook,
    RecordingPostRunState, current_status,
};
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use trial_runner::{
    cancel::CancellationSignal,
    config::InvokerConfig,
    context::ExecutionContext,
    failure::{ROOT_PARENT_INDEX, TestFailure},
    invoker::{TestInvoker, TestInvokerBuilder},
    message_bus::{ExecutionMessage, NullMessageBus, channel_message_bus},
    state::{FailureCause, TestOutcome, TestState, TestStatus},
    test_case::{TestArguments, TestCase, TestClass, TestFixture, TestMethod},
};

fn invoker_with_hooks(hooks: &[Arc<RecordingHook>]) -> TestInvoker {
    let mut builder = TestInvokerBuilder::default();
    for hook in hooks {
        builder.add_hook(hook.clone());
    }
    builder.build()
}

async fn run(invoker: &TestInvoker, case: TestCase, bus: &RecordingBus) -> (Duration, TestState) {
    invoker
        .run_with_final_state(Arc::new(case), bus, &CancellationSignal::new())
        .await
}

#[tokio::test]
async fn passing_test() -> Result<()> {
    crate::test_init();
    let log = EventLog::default();
    let hook = Arc::new(RecordingHook::new("hook", log.clone()));
    let bus = RecordingBus::new(log.clone());
    let case = TestCase::new(
        Disposable::class(
            log.clone(),
            DisposeOptions {
                sync: true,
                ..Default::default()
            },
        ),
        Disposable::method("passes", || Ok(())),
    );

    let (_, state) = run(&invoker_with_hooks(&[hook]), case, &bus).await;

    assert_eq!(state.status(), TestStatus::Finished);
    assert_eq!(state.result(), Some(TestOutcome::Passed));
    assert_eq!(state.failure_cause(), None);
    assert_eq!(state.exception_messages(), None);
    assert_eq!(state.exception_types(), None);
    assert_eq!(state.exception_stack_traces(), None);
    assert_eq!(state.exception_parent_indices(), None);
    assert_eq!(
        log.events(),
        vec![
            "test-class-construction-starting",
            "construct",
            "test-class-construction-finished",
            "hook.before",
            "body",
            "hook.after",
            "test-class-dispose-starting",
            "dispose",
            "test-class-dispose-finished",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn assertion_failure() {
    crate::test_init();
    let case = TestCase::new(
        TestClass::new("math"),
        TestMethod::new_static("adds", 0, |_| async {
            let sum = 2 + 2;
            assert_eq!(sum, 5, "arithmetic is broken");
            Ok(())
        }),
    );

    let (_, state) = run(&TestInvoker::default(), case, &RecordingBus::default()).await;

    assert_eq!(state.result(), Some(TestOutcome::Failed));
    assert_eq!(state.failure_cause(), Some(FailureCause::Assertion));
    let messages = state.exception_messages().expect("test failed");
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("arithmetic is broken"), "{messages:?}");
    assert_eq!(state.exception_types().map(<[_]>::len), Some(1));
    let stack_traces = state.exception_stack_traces().expect("test failed");
    assert_eq!(stack_traces.len(), 1);
    let location = stack_traces[0].as_deref().expect("panic location recorded");
    assert!(location.starts_with(&format!("at {}:", file!())), "{location}");
    assert_eq!(
        state.exception_parent_indices(),
        Some([ROOT_PARENT_INDEX].as_slice())
    );
}

#[tokio::test]
async fn returned_error_is_an_exception() {
    crate::test_init();
    let case = TestCase::new(
        TestClass::new("parsing"),
        TestMethod::new_static("parses", 0, |_| async {
            let _: u32 = "forty-two".parse()?;
            Ok::<_, TestFailure>(())
        }),
    );

    let (_, state) = run(&TestInvoker::default(), case, &RecordingBus::default()).await;

    assert_eq!(state.failure_cause(), Some(FailureCause::Exception));
    assert_eq!(
        state.exception_messages(),
        Some(["invalid digit found in string".to_owned()].as_slice())
    );
}

#[derive(Debug)]
struct NeverBuilt;

impl TestFixture for NeverBuilt {}

fn never_built_method() -> TestMethod {
    TestMethod::new_instance("unreachable", 0, |_: Arc<NeverBuilt>, _| async {
        Err(TestFailure::assertion("method must not run"))
    })
}

#[tokio::test]
async fn constructor_panicking_before_its_future_is_contained() {
    crate::test_init();
    let log = EventLog::default();
    let hook = Arc::new(RecordingHook::new("hook", log.clone()));
    let bus = RecordingBus::new(log.clone());
    let case = TestCase::new(
        TestClass::with_constructor(
            "exploding",
            || -> std::future::Ready<Result<NeverBuilt, TestFailure>> {
                panic!("constructor exploded")
            },
        ),
        never_built_method(),
    );

    let (_, state) = run(&invoker_with_hooks(&[hook.clone()]), case, &bus).await;

    assert_eq!(
        log.events(),
        vec![
            "test-class-construction-starting",
            "test-class-construction-finished",
        ]
    );
    assert!(hook.observed().is_empty());
    assert_eq!(state.status(), TestStatus::Finished);
    assert_eq!(state.failure_cause(), Some(FailureCause::Exception));
    assert_eq!(
        state.exception_messages(),
        Some(["constructor exploded".to_owned()].as_slice())
    );
    assert_eq!(
        state.exception_types(),
        Some([SmolStr::new(TestFailure::PANIC_TYPE_NAME)].as_slice())
    );
}

#[tokio::test]
async fn constructor_error_is_recorded() {
    crate::test_init();
    let log = EventLog::default();
    let hook = Arc::new(RecordingHook::new("hook", log.clone()));
    let bus = RecordingBus::new(log.clone());
    let case = TestCase::new(
        TestClass::with_constructor("unavailable", || async {
            Err::<NeverBuilt, _>(TestFailure::exception(
                "ConnectionRefused",
                "database unavailable",
            ))
        }),
        never_built_method(),
    );

    let (time, state) = run(&invoker_with_hooks(&[hook.clone()]), case, &bus).await;

    assert_eq!(
        log.events(),
        vec![
            "test-class-construction-starting",
            "test-class-construction-finished",
        ]
    );
    assert!(hook.observed().is_empty());
    assert_eq!(state.result(), Some(TestOutcome::Failed));
    assert_eq!(state.execution_time(), Some(time));
    assert_eq!(
        state.exception_types(),
        Some([SmolStr::new("ConnectionRefused")].as_slice())
    );
    assert_eq!(
        state.exception_messages(),
        Some(["database unavailable".to_owned()].as_slice())
    );
}

#[tokio::test]
async fn arity_mismatch_skips_everything() {
    crate::test_init();
    let log = EventLog::default();
    let hook = Arc::new(RecordingHook::new("hook", log.clone()));
    let bus = RecordingBus::new(log.clone());
    let case = TestCase::new(
        Disposable::class(
            log.clone(),
            DisposeOptions {
                sync: true,
                async_: true,
                fail: false,
            },
        ),
        Disposable::method("no_params", || Ok(())),
    )
    .with_arguments(TestArguments::new().with(1_i32).with("two"));

    let (time, state) = run(&invoker_with_hooks(&[hook.clone()]), case, &bus).await;

    assert_eq!(log.events(), Vec::<String>::new(), "nothing ran");
    assert!(hook.observed().is_empty());
    assert_eq!(time, Duration::ZERO);
    assert_eq!(state.result(), Some(TestOutcome::Failed));
    assert_eq!(state.failure_cause(), Some(FailureCause::Exception));
    assert_eq!(
        state.exception_messages(),
        Some(
            ["The test method expected 0 parameter values, but 2 parameter values were provided."
                .to_owned()]
            .as_slice()
        )
    );
}

#[tokio::test]
async fn arity_mismatch_static_method_skips_hooks() {
    crate::test_init();
    let log = EventLog::default();
    let hook = Arc::new(RecordingHook::new("hook", log.clone()));
    let case = TestCase::new(
        TestClass::new("statics"),
        TestMethod::new_static("two_params", 2, |_| async { Ok(()) }),
    )
    .with_arguments(TestArguments::new().with(1_u8));

    let (_, state) = run(
        &invoker_with_hooks(&[hook.clone()]),
        case,
        &RecordingBus::new(log.clone()),
    )
    .await;

    assert!(log.events().is_empty());
    assert_eq!(
        state.exception_messages(),
        Some(
            ["The test method expected 2 parameter values, but 1 parameter value was provided."
                .to_owned()]
            .as_slice()
        )
    );
}

#[tokio::test]
async fn cancelled_before_start() {
    crate::test_init();
    let log = EventLog::default();
    let hook = Arc::new(RecordingHook::new("hook", log.clone()));
    let bus = RecordingBus::new(log.clone());
    let case = TestCase::new(
        Disposable::class(
            log.clone(),
            DisposeOptions {
                sync: true,
                ..Default::default()
            },
        ),
        Disposable::method("never_runs", || Ok(())),
    );
    let cancellation = CancellationSignal::new();
    cancellation.cancel();

    let (time, state) = invoker_with_hooks(&[hook.clone()])
        .run_with_final_state(Arc::new(case), &bus, &cancellation)
        .await;

    assert!(hook.observed().is_empty(), "hooks were not called");
    assert!(log.events().is_empty(), "{:?}", log.events());
    assert_eq!(time, Duration::ZERO);
    assert_eq!(state.execution_time(), Some(Duration::ZERO));
    assert_eq!(state.result(), Some(TestOutcome::Passed));
    assert_eq!(state.failures(), None);
}

#[tokio::test]
async fn stop_after_construction_still_disposes() {
    crate::test_init();
    let log = EventLog::default();
    let hook = Arc::new(RecordingHook::new("hook", log.clone()));
    let bus = RecordingBus::stopping_after(log.clone(), "test-class-construction-finished");
    let case = TestCase::new(
        Disposable::class(
            log.clone(),
            DisposeOptions {
                sync: true,
                async_: true,
                fail: false,
            },
        ),
        Disposable::method("skipped", || Ok(())),
    );
    let cancellation = CancellationSignal::new();

    let (_, state) = invoker_with_hooks(&[hook.clone()])
        .run_with_final_state(Arc::new(case), &bus, &cancellation)
        .await;

    assert!(cancellation.is_cancelled(), "stop request cancels the run");
    assert!(hook.observed().is_empty());
    assert_eq!(
        log.events(),
        vec![
            "test-class-construction-starting",
            "construct",
            "test-class-construction-finished",
            "test-class-dispose-starting",
            "dispose",
            "dispose_async",
            "test-class-dispose-finished",
        ]
    );
    assert_eq!(state.result(), Some(TestOutcome::Passed));
}

#[tokio::test]
async fn stop_on_construction_starting_constructs_nothing() {
    crate::test_init();
    let log = EventLog::default();
    let bus = RecordingBus::stopping_after(log.clone(), "test-class-construction-starting");
    let case = TestCase::new(
        Disposable::class(
            log.clone(),
            DisposeOptions {
                sync: true,
                ..Default::default()
            },
        ),
        Disposable::method("skipped", || Ok(())),
    );

    let (_, state) = run(&TestInvoker::default(), case, &bus).await;

    assert_eq!(log.events(), vec!["test-class-construction-starting"]);
    assert_eq!(state.result(), Some(TestOutcome::Passed));
}

#[tokio::test]
async fn stop_on_dispose_starting_still_disposes() {
    crate::test_init();
    let log = EventLog::default();
    let bus = RecordingBus::stopping_after(log.clone(), "test-class-dispose-starting");
    let case = TestCase::new(
        Disposable::class(
            log.clone(),
            DisposeOptions {
                async_: true,
                ..Default::default()
            },
        ),
        Disposable::method("runs", || Ok(())),
    );

    let (_, state) = run(&TestInvoker::default(), case, &bus).await;

    assert_eq!(
        log.events(),
        vec![
            "test-class-construction-starting",
            "construct",
            "test-class-construction-finished",
            "body",
            "test-class-dispose-starting",
            "dispose_async",
            "test-class-dispose-finished",
        ]
    );
    assert_eq!(state.result(), Some(TestOutcome::Passed));
}

#[tokio::test]
async fn non_disposable_instance_publishes_no_dispose_messages() {
    crate::test_init();
    let log = EventLog::default();
    let bus = RecordingBus::new(log.clone());
    let case = TestCase::new(
        Disposable::class(log.clone(), DisposeOptions::default()),
        Disposable::method("runs", || Ok(())),
    );

    run(&TestInvoker::default(), case, &bus).await;

    assert_eq!(
        log.events(),
        vec![
            "test-class-construction-starting",
            "construct",
            "test-class-construction-finished",
            "body",
        ]
    );
}

#[tokio::test]
async fn failures_across_phases_are_siblings() {
    crate::test_init();
    let log = EventLog::default();
    let hook = Arc::new(RecordingHook::new("hook", log.clone()).with_after(HookBehavior::Fail));
    let bus = RecordingBus::new(log.clone());
    let case = TestCase::new(
        Disposable::class(
            log.clone(),
            DisposeOptions {
                sync: true,
                async_: true,
                fail: true,
            },
        ),
        Disposable::method("fails", || {
            Err(TestFailure::exception("BodyError", "body failed")
                .with_cause(TestFailure::exception("RootCause", "root cause")))
        }),
    );

    let (_, state) = run(&invoker_with_hooks(&[hook]), case, &bus).await;

    assert_eq!(state.result(), Some(TestOutcome::Failed));
    assert_eq!(state.failure_cause(), Some(FailureCause::Exception));
    assert_eq!(
        state.exception_messages(),
        Some(
            [
                "body failed",
                "root cause",
                "hook.after failed",
                "dispose failed",
                "async dispose failed",
            ]
            .map(str::to_owned)
            .as_slice()
        )
    );
    assert_eq!(
        state.exception_types(),
        Some(
            ["BodyError", "RootCause", "HookError", "DisposeError", "DisposeError"]
                .map(SmolStr::new)
                .as_slice()
        )
    );
    // Each phase's failure is a root; the body's cause stays nested under it.
    assert_eq!(
        state.exception_parent_indices(),
        Some([-1, 0, -1, -1, -1].as_slice())
    );
}

#[tokio::test]
async fn failing_before_hook_skips_body_and_later_hooks() {
    crate::test_init();
    let log = EventLog::default();
    let first = Arc::new(RecordingHook::new("first", log.clone()));
    let second =
        Arc::new(RecordingHook::new("second", log.clone()).with_before(HookBehavior::Panic));
    let third = Arc::new(RecordingHook::new("third", log.clone()));
    let case = TestCase::new(
        TestClass::new("hooks"),
        TestMethod::new_static("body", 0, |_| async {
            Err(TestFailure::assertion("body must not run"))
        }),
    );

    let (_, state) = run(
        &invoker_with_hooks(&[first, second, third]),
        case,
        &RecordingBus::new(log.clone()),
    )
    .await;

    // Only hooks whose before-hook completed get their after-hook.
    assert_eq!(
        log.events(),
        vec!["first.before", "second.before", "first.after"]
    );
    assert_eq!(
        state.exception_messages(),
        Some(["second.before panicked".to_owned()].as_slice())
    );
    assert_eq!(
        state.exception_types(),
        Some([SmolStr::new(TestFailure::PANIC_TYPE_NAME)].as_slice())
    );
}

#[tokio::test]
async fn hooks_run_in_order_and_after_hooks_in_reverse() {
    crate::test_init();
    let log = EventLog::default();
    let outer = Arc::new(RecordingHook::new("outer", log.clone()));
    let inner = Arc::new(RecordingHook::new("inner", log.clone()));
    let body_log = log.clone();
    let case = TestCase::new(
        TestClass::new("hooks"),
        TestMethod::new_static("body", 0, move |_| {
            let log = body_log.clone();
            async move {
                log.push("body");
                Ok(())
            }
        }),
    );

    run(
        &invoker_with_hooks(&[outer, inner]),
        case,
        &RecordingBus::default(),
    )
    .await;

    assert_eq!(
        log.events(),
        vec![
            "outer.before",
            "inner.before",
            "body",
            "inner.after",
            "outer.after"
        ]
    );
}

#[tokio::test]
async fn context_status_is_visible_in_every_phase() {
    crate::test_init();
    let log = EventLog::default();
    let hook = Arc::new(RecordingHook::new("hook", log.clone()));
    let post_run = Arc::new(RecordingPostRunState::default());
    let case = TestCase::new(
        TestClass::new("context"),
        TestMethod::new_static("observes", 0, |_| async {
            let status = current_status();
            tokio::time::sleep(Duration::from_millis(10)).await;
            // The binding survives suspension.
            assert_eq!(current_status(), status);
            let context = ExecutionContext::current().expect("bound");
            context.output().write_line("from the body");
            if status == Some(TestStatus::Running) {
                Ok(())
            } else {
                Err(TestFailure::assertion(format!(
                    "expected Running, got {status:?}"
                )))
            }
        }),
    );

    let mut builder = TestInvokerBuilder::default();
    builder
        .add_hook(hook.clone())
        .set_post_run_state(post_run.clone());
    let invoker = builder.build();

    let final_state = ExecutionContext::scope(async {
        let (_, state) = invoker
            .run_with_final_state(Arc::new(case), &NullMessageBus, &CancellationSignal::new())
            .await;
        // The final binding is left in place for the caller.
        assert_eq!(current_status(), Some(TestStatus::Finished));
        state
    })
    .await;
    assert_eq!(final_state.result(), Some(TestOutcome::Passed));

    let observed = hook.observed();
    assert_eq!(observed.len(), 2);
    let before = &observed[0];
    assert_eq!(before.status(), TestStatus::Initializing);
    assert_eq!(before.execution_time(), None);
    assert_eq!(before.output(), None);
    assert_eq!(before.result(), None);

    let after = &observed[1];
    assert_eq!(after.status(), TestStatus::CleaningUp);
    assert!(after.execution_time().is_some());
    assert_eq!(after.output(), Some("from the body\n"));
    assert_eq!(after.result(), Some(TestOutcome::Passed));

    let post_run_state = post_run.observed().expect("factory saw a binding");
    assert_eq!(post_run_state.status(), TestStatus::CleaningUp);
    assert_eq!(post_run_state.result(), Some(TestOutcome::Passed));
    assert_eq!(post_run_state.output(), Some("from the body\n"));
    assert_eq!(
        post_run_state.execution_time(),
        final_state.execution_time()
    );
}

#[tokio::test]
async fn timeout_is_recorded() {
    crate::test_init();
    let mut config = InvokerConfig::default();
    config.set_timeout(Some(Duration::from_millis(50)));
    let mut builder = TestInvokerBuilder::default();
    builder.set_config(config);

    let case = TestCase::new(
        TestClass::new("slow"),
        TestMethod::new_static("sleeps", 0, |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }),
    );

    let (time, state) = run(&builder.build(), case, &RecordingBus::default()).await;

    assert!(time >= Duration::from_millis(50), "{time:?}");
    assert!(time < Duration::from_secs(30), "{time:?}");
    assert_eq!(state.failure_cause(), Some(FailureCause::Timeout));
    assert_eq!(
        state.exception_messages(),
        Some(["Test execution timed out after 50 milliseconds".to_owned()].as_slice())
    );
}

#[tokio::test]
async fn output_is_not_retained_without_capture() {
    crate::test_init();
    let mut config = InvokerConfig::default();
    config.set_capture_output(false);
    let mut builder = TestInvokerBuilder::default();
    builder.set_config(config);

    let case = TestCase::new(
        TestClass::new("output"),
        TestMethod::new_static("prints", 0, |_| async {
            let context = ExecutionContext::current().expect("bound");
            context.output().write_line("forwarded to tracing");
            Ok(())
        }),
    );

    let (_, state) = run(&builder.build(), case, &RecordingBus::default()).await;
    assert_eq!(state.output(), Some(""));
    assert_eq!(state.result(), Some(TestOutcome::Passed));
}

#[tokio::test]
async fn execution_time_covers_user_code() {
    crate::test_init();
    let case = TestCase::new(
        TestClass::new("timing"),
        TestMethod::new_static("sleeps", 0, |_| async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(())
        }),
    );

    let (time, state) = run(&TestInvoker::default(), case, &RecordingBus::default()).await;
    assert!(time >= Duration::from_millis(40), "{time:?}");
    assert_eq!(state.execution_time(), Some(time));
}

#[tokio::test]
async fn messages_carry_test_info() {
    crate::test_init();
    let log = EventLog::default();
    let bus = RecordingBus::new(log.clone());
    let case = TestCase::new(
        Disposable::class(log.clone(), DisposeOptions::default()),
        Disposable::method("info", || Ok(())),
    )
    .with_display_name("carries info");

    run(&TestInvoker::default(), case, &bus).await;

    let messages = bus.messages();
    assert_eq!(messages.len(), 2);
    for message in &messages {
        let test = message.test();
        assert_eq!(test.id, "Disposable::info");
        assert_eq!(test.display_name, "carries info");
        assert_eq!(test.class_name, "Disposable");
        assert_eq!(test.method_name, "info");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_share_a_channel_bus() -> Result<()> {
    crate::test_init();
    let (bus, mut receiver) = channel_message_bus();
    let bus = Arc::new(bus);
    let invoker = Arc::new(TestInvoker::default());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let bus = bus.clone();
            let invoker = invoker.clone();
            tokio::spawn(async move {
                let case = TestCase::new(
                    TestClass::new("concurrent"),
                    TestMethod::new_static(format!("test_{i}"), 0, move |_| async move {
                        tokio::task::yield_now().await;
                        let context = ExecutionContext::current().expect("bound");
                        if context.test_case().method().name() == format!("test_{i}") {
                            Ok(())
                        } else {
                            Err(TestFailure::assertion("saw another test's context"))
                        }
                    }),
                );
                let (_, state) = invoker
                    .run_with_final_state(Arc::new(case), &*bus, &CancellationSignal::new())
                    .await;
                state
            })
        })
        .collect();

    for handle in handles {
        let state = handle.await?;
        assert_eq!(state.result(), Some(TestOutcome::Passed));
    }

    // Static methods publish no lifecycle messages.
    drop(bus);
    assert!(receiver.recv().await.is_none());
    Ok(())
}

#[tokio::test]
async fn channel_bus_stop_request_cancels_run() {
    crate::test_init();
    let (bus, mut receiver) = channel_message_bus();
    let log = EventLog::default();
    receiver.request_stop();
    let case = TestCase::new(
        Disposable::class(
            log.clone(),
            DisposeOptions {
                sync: true,
                ..Default::default()
            },
        ),
        Disposable::method("stopped", || Ok(())),
    );
    let cancellation = CancellationSignal::new();

    let (time, _) = TestInvoker::default()
        .run_with_final_state(Arc::new(case), &bus, &cancellation)
        .await;

    assert!(cancellation.is_cancelled());
    assert_eq!(time, Duration::ZERO);
    assert!(log.events().is_empty(), "nothing was constructed");
    assert!(matches!(
        receiver.try_recv(),
        Some(ExecutionMessage::TestClassConstructionStarting { .. })
    ));
    assert!(receiver.try_recv().is_none());
}
