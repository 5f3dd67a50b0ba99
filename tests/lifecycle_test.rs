//! Start/race/shutdown behaviour of the application server.

use std::future::Future;
use std::time::Duration;

use kaffein::lifecycle::{AppServer, ServerError, ServerState, Signal};
use tokio::sync::oneshot;
use tokio::time::timeout;

mod common;

use common::{CapturedLogs, Journal, ScriptedAdapter, StartBehavior, StopBehavior};

const RUN_LIMIT: Duration = Duration::from_secs(5);

fn injected_signal(rx: oneshot::Receiver<Signal>) -> impl Future<Output = Signal> + Send {
    async move { rx.await.unwrap_or(Signal::Interrupt) }
}

fn start_failure(result: Result<(), ServerError>) -> (String, String) {
    match result {
        Err(ServerError::AdapterStart { adapter, source }) => (adapter, source.to_string()),
        other => panic!("expected a start failure, got {:?}", other),
    }
}

#[tokio::test]
async fn signal_stops_every_adapter_once_in_registration_order() {
    let journal = Journal::new();
    let server = AppServer::builder()
        .name("lifecycle-test")
        .shared_adapter(ScriptedAdapter::new("a", &journal).shared())
        .shared_adapter(
            ScriptedAdapter::new("b", &journal)
                .on_start(StartBehavior::SucceedAfter(Duration::from_millis(20)))
                .shared(),
        )
        .shared_adapter(ScriptedAdapter::new("c", &journal).shared())
        .build();
    let mut state = server.subscribe_state();

    let (signal_tx, signal_rx) = oneshot::channel();
    let run = tokio::spawn(server.run_until(injected_signal(signal_rx)));

    state
        .wait_for(|state| *state == ServerState::Running)
        .await
        .unwrap();

    // Nothing ends the run until the signal arrives.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished());
    assert_eq!(journal.with_prefix("started:").len(), 3);
    assert!(journal.with_prefix("stop:").is_empty());

    signal_tx.send(Signal::Terminate).unwrap();
    let result = timeout(RUN_LIMIT, run).await.unwrap().unwrap();

    assert!(result.is_ok());
    assert_eq!(journal.with_prefix("stop:"), vec!["stop:a", "stop:b", "stop:c"]);
    assert_eq!(*state.borrow(), ServerState::Stopped);
}

#[tokio::test]
async fn signal_with_no_adapters_returns_ok() {
    let server = AppServer::builder().build();
    let (signal_tx, signal_rx) = oneshot::channel();
    signal_tx.send(Signal::Interrupt).unwrap();

    let result = timeout(RUN_LIMIT, server.run_until(injected_signal(signal_rx)))
        .await
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn start_failure_becomes_outcome_and_all_adapters_stop() {
    let journal = Journal::new();
    let server = AppServer::builder()
        .shared_adapter(ScriptedAdapter::new("a", &journal).shared())
        .shared_adapter(
            ScriptedAdapter::new("b", &journal)
                .on_start(StartBehavior::Fail("connection refused"))
                .shared(),
        )
        .shared_adapter(ScriptedAdapter::new("c", &journal).shared())
        .build();

    let result = timeout(RUN_LIMIT, server.run_until(std::future::pending()))
        .await
        .unwrap();

    let (adapter, message) = start_failure(result);
    assert_eq!(adapter, "b");
    assert_eq!(message, "connection refused");
    // The failed adapter is stopped too.
    assert_eq!(journal.with_prefix("stop:"), vec!["stop:a", "stop:b", "stop:c"]);
}

#[tokio::test]
async fn concurrent_failures_yield_exactly_one_outcome() {
    let journal = Journal::new();
    let server = AppServer::builder()
        .shared_adapter(ScriptedAdapter::new("a", &journal).on_start(StartBehavior::Fail("a down")).shared())
        .shared_adapter(ScriptedAdapter::new("b", &journal).on_start(StartBehavior::Fail("b down")).shared())
        .shared_adapter(ScriptedAdapter::new("c", &journal).shared())
        .build();

    let result = timeout(RUN_LIMIT, server.run_until(std::future::pending()))
        .await
        .unwrap();

    let (adapter, message) = start_failure(result);
    assert!(
        (adapter == "a" && message == "a down") || (adapter == "b" && message == "b down"),
        "unexpected outcome {adapter}: {message}"
    );
    assert_eq!(journal.with_prefix("stop:").len(), 3);
}

#[tokio::test]
async fn saturated_error_channel_never_blocks() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();

    let journal = Journal::new();
    let names = ["a", "b", "c", "d", "e"];
    let mut builder = AppServer::builder().error_capacity(1);
    for name in names {
        builder = builder.shared_adapter(
            ScriptedAdapter::new(name, &journal)
                .on_start(StartBehavior::Fail("down"))
                .shared(),
        );
    }
    let server = builder.build();

    let result = timeout(RUN_LIMIT, server.run_until(std::future::pending()))
        .await
        .expect("run blocked with a saturated error channel");

    let (adapter, _) = start_failure(result);
    assert!(names.contains(&adapter.as_str()));
    assert_eq!(journal.with_prefix("started:").len(), names.len());
    assert_eq!(journal.with_prefix("stop:").len(), names.len());
    // One failure fits the channel; every other one is dropped with a warning.
    assert_eq!(logs.count("Error channel full, dropping error."), names.len() - 1);
}

#[tokio::test]
async fn stop_failure_does_not_skip_later_adapters_or_change_outcome() {
    let journal = Journal::new();
    let server = AppServer::builder()
        .shared_adapter(ScriptedAdapter::new("a", &journal).shared())
        .shared_adapter(
            ScriptedAdapter::new("b", &journal)
                .on_stop(StopBehavior::Fail("close failed"))
                .shared(),
        )
        .shared_adapter(ScriptedAdapter::new("c", &journal).shared())
        .build();
    let shutdown = server.shutdown_handle();
    let mut state = server.subscribe_state();

    let run = tokio::spawn(server.run_until(std::future::pending()));
    state
        .wait_for(|state| *state == ServerState::Running)
        .await
        .unwrap();
    shutdown.trigger();

    let result = timeout(RUN_LIMIT, run).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(journal.with_prefix("stop:"), vec!["stop:a", "stop:b", "stop:c"]);
}

#[tokio::test]
async fn panicking_stop_does_not_skip_later_adapters() {
    let journal = Journal::new();
    let server = AppServer::builder()
        .shared_adapter(ScriptedAdapter::new("a", &journal).on_stop(StopBehavior::Panic).shared())
        .shared_adapter(ScriptedAdapter::new("b", &journal).shared())
        .build();
    let mut state = server.subscribe_state();

    let result = timeout(RUN_LIMIT, server.run_until(async { Signal::Terminate }))
        .await
        .unwrap();

    assert!(result.is_ok());
    assert_eq!(journal.with_prefix("stop:"), vec!["stop:a", "stop:b"]);
    assert_eq!(*state.borrow_and_update(), ServerState::Stopped);
}

#[tokio::test]
async fn hung_stop_is_bounded_by_shutdown_timeout() {
    let journal = Journal::new();
    let server = AppServer::builder()
        .shutdown_timeout(Duration::from_millis(200))
        .shared_adapter(ScriptedAdapter::new("a", &journal).on_stop(StopBehavior::Hang).shared())
        .shared_adapter(ScriptedAdapter::new("b", &journal).shared())
        .build();
    let (signal_tx, signal_rx) = oneshot::channel();
    signal_tx.send(Signal::Terminate).unwrap();

    let result = timeout(RUN_LIMIT, server.run_until(injected_signal(signal_rx)))
        .await
        .expect("hung stop stalled shutdown");

    assert!(result.is_ok());
    assert_eq!(journal.with_prefix("stop:"), vec!["stop:a", "stop:b"]);
}

#[tokio::test]
async fn start_failure_cancels_the_start_context() {
    let journal = Journal::new();
    let server = AppServer::builder()
        .shared_adapter(
            ScriptedAdapter::new("slow", &journal)
                .on_start(StartBehavior::WaitForCancel)
                .shared(),
        )
        .shared_adapter(
            ScriptedAdapter::new("broken", &journal)
                .on_start(StartBehavior::FailAfter(Duration::from_millis(20), "boom"))
                .shared(),
        )
        .build();

    let result = timeout(RUN_LIMIT, server.run_until(std::future::pending()))
        .await
        .unwrap();

    let (adapter, _) = start_failure(result);
    assert_eq!(adapter, "broken");
    // run() joins every start task before returning.
    assert!(journal.entries().contains(&"cancelled:slow".to_string()));
}

#[tokio::test]
async fn panicking_start_is_reported_as_failure() {
    let journal = Journal::new();
    let server = AppServer::builder()
        .shared_adapter(ScriptedAdapter::new("volatile", &journal).on_start(StartBehavior::Panic).shared())
        .shared_adapter(ScriptedAdapter::new("steady", &journal).shared())
        .build();

    let result = timeout(RUN_LIMIT, server.run_until(std::future::pending()))
        .await
        .unwrap();

    let err = result.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("panicked"), "{message}");
    assert!(message.contains("volatile exploded"), "{message}");
    assert_eq!(journal.with_prefix("stop:"), vec!["stop:volatile", "stop:steady"]);
}

#[tokio::test]
async fn shutdown_handle_ends_run_gracefully() {
    let journal = Journal::new();
    let server = AppServer::builder()
        .shared_adapter(ScriptedAdapter::new("a", &journal).shared())
        .build();
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
    });

    let result = timeout(RUN_LIMIT, server.run_until(std::future::pending()))
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(journal.with_prefix("stop:"), vec!["stop:a"]);
}

#[tokio::test]
async fn dial_refused_scenario_logs_shutdown_before_stops() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();

    let journal = Journal::new();
    let server = AppServer::builder()
        .name("scenario")
        .shared_adapter(ScriptedAdapter::new("one", &journal).shared())
        .shared_adapter(
            ScriptedAdapter::new("two", &journal)
                .on_start(StartBehavior::FailAfter(Duration::from_millis(50), "dial refused"))
                .shared(),
        )
        .shared_adapter(ScriptedAdapter::new("three", &journal).shared())
        .build();

    let result = timeout(RUN_LIMIT, server.run_until(std::future::pending()))
        .await
        .unwrap();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("dial refused"));

    let entries = journal.entries();
    let index_of = |entry: &str| entries.iter().position(|e| e == entry).unwrap();
    assert!(index_of("started:one") < index_of("started:two"));
    assert!(index_of("started:three") < index_of("started:two"));
    assert_eq!(journal.with_prefix("stop:"), vec!["stop:one", "stop:two", "stop:three"]);

    let shutdown_line = logs.position("Shutdown initiated.").expect("no shutdown log line");
    let first_stop_line = logs.position("stop called").expect("no stop log line");
    let failure_line = logs.position("Adapter start failed").expect("no failure log line");
    assert!(failure_line < shutdown_line);
    assert!(shutdown_line < first_stop_line);
    assert!(logs.position("Shutdown complete.").unwrap() > first_stop_line);
}
