//! Executor lifecycle: streaming, interruption, rollback, failure and
//! retry, driven end to end against the builtin echo graph.

mod common;

use common::{echo_assistant, executor, meta, stores};
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use trellis_server::bus::CancelAction;
use trellis_server::graph::{StateUpdate, Superstep};
use trellis_server::models::{IfExists, IfNotExists, RunStatus, ThreadStatus};
use trellis_server::store::{JoinOptions, RunCreate, Stores};
use uuid::Uuid;

fn creation(thread_id: Uuid, assistant_id: Uuid, input: Value) -> RunCreate {
    let mut create = RunCreate::new(thread_id, assistant_id);
    create.if_not_exists = IfNotExists::Create;
    create.input = Some(input);
    create
}

/// Poll until the run reaches a predicate or the deadline passes
async fn wait_for_run<F>(stores: &Stores, run_id: Uuid, deadline: Duration, predicate: F) -> bool
where
    F: Fn(Option<RunStatus>) -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        let status = stores.runs.get(run_id, None).await.ok().map(|r| r.status);
        if predicate(status) {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_create_then_stream() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let run_id = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id, json!({"x": 1})))
        .await
        .unwrap()[0]
        .run_id;

    let picked = stores.runs.next().await;
    executor(&stores).execute(picked.into_iter().next().unwrap()).await;

    let events: Vec<(String, Value)> = stores
        .runs
        .join_stream(run_id, Some(thread_id), JoinOptions::default())
        .collect()
        .await;

    assert_eq!(events[0].0, "metadata");
    let values_events: Vec<&Value> = events
        .iter()
        .filter(|(event, _)| event == "values")
        .map(|(_, data)| data)
        .collect();
    assert!(!values_events.is_empty());
    assert!(events.iter().all(|(event, _)| event != "error"));

    // The final thread state matches the last streamed values.
    let run = stores.runs.get(run_id, Some(thread_id)).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    let snapshot = stores.threads.get_state(thread_id, None, false).await.unwrap();
    let last_values = values_events.last().unwrap();
    assert_eq!(
        serde_json::to_value(&snapshot.values).unwrap(),
        **last_values
    );

    let thread = stores.threads.get(thread_id).await.unwrap();
    assert_eq!(thread.status, ThreadStatus::Idle);
    assert_eq!(
        thread.values.as_ref().and_then(|v| v.get("x")),
        Some(&json!(1))
    );
}

#[tokio::test]
async fn test_cancel_interrupt_mid_stream() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let run_id = stores
        .runs
        .put(creation(
            thread_id,
            assistant.assistant_id,
            json!({"__steps__": 50, "__sleep_ms__": 20}),
        ))
        .await
        .unwrap()[0]
        .run_id;

    let worker = executor(&stores);
    let shutdown = worker.shutdown_signal();
    let handle = worker.spawn();

    assert!(
        wait_for_run(&stores, run_id, Duration::from_secs(5), |status| {
            status == Some(RunStatus::Running)
        })
        .await
    );

    stores
        .runs
        .cancel(Some(thread_id), &[run_id], CancelAction::Interrupt)
        .await
        .unwrap();

    assert!(
        wait_for_run(&stores, run_id, Duration::from_secs(5), |status| {
            status == Some(RunStatus::Interrupted)
        })
        .await
    );

    // The subscriber sees a clean, error-free end of stream.
    let events: Vec<(String, Value)> = stores
        .runs
        .join_stream(run_id, Some(thread_id), JoinOptions::default())
        .collect()
        .await;
    assert!(events.iter().all(|(event, _)| event != "error"));

    shutdown.fire();
    let _ = handle.await;
}

#[tokio::test]
async fn test_rollback_mid_stream_reverts_thread() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    // Seed the thread with a completed run so there is a pre-run checkpoint.
    let seed_id = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id, json!({"x": 1})))
        .await
        .unwrap()[0]
        .run_id;
    let picked = stores.runs.next().await;
    executor(&stores).execute(picked.into_iter().next().unwrap()).await;
    assert_eq!(
        stores.runs.get(seed_id, None).await.unwrap().status,
        RunStatus::Success
    );

    let run_id = stores
        .runs
        .put(creation(
            thread_id,
            assistant.assistant_id,
            json!({"y": 2, "__steps__": 50, "__sleep_ms__": 20}),
        ))
        .await
        .unwrap()[0]
        .run_id;

    let worker = executor(&stores);
    let shutdown = worker.shutdown_signal();
    let handle = worker.spawn();

    assert!(
        wait_for_run(&stores, run_id, Duration::from_secs(5), |status| {
            status == Some(RunStatus::Running)
        })
        .await
    );
    stores
        .runs
        .cancel(Some(thread_id), &[run_id], CancelAction::Rollback)
        .await
        .unwrap();

    // Rollback deletes the run outright.
    assert!(
        wait_for_run(&stores, run_id, Duration::from_secs(5), |status| status.is_none()).await
    );

    let thread = stores.threads.get(thread_id).await.unwrap();
    let values = thread.values.expect("reverted values");
    assert_eq!(values.get("x"), Some(&json!(1)));
    assert!(values.get("y").is_none());
    assert_eq!(thread.status, ThreadStatus::Idle);

    shutdown.fire();
    let _ = handle.await;
}

#[tokio::test]
async fn test_fatal_failure_sets_error_statuses() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let run_id = stores
        .runs
        .put(creation(
            thread_id,
            assistant.assistant_id,
            json!({"__fail__": "fatal"}),
        ))
        .await
        .unwrap()[0]
        .run_id;

    let picked = stores.runs.next().await;
    executor(&stores).execute(picked.into_iter().next().unwrap()).await;

    assert_eq!(
        stores.runs.get(run_id, None).await.unwrap().status,
        RunStatus::Error
    );
    assert_eq!(
        stores.threads.get(thread_id).await.unwrap().status,
        ThreadStatus::Error
    );

    // The error is framed to subscribers before the stream ends.
    let events: Vec<(String, Value)> = stores
        .runs
        .join_stream(run_id, Some(thread_id), JoinOptions::default())
        .collect()
        .await;
    let error_event = events.iter().find(|(event, _)| event == "error");
    assert!(error_event.is_some());
}

#[tokio::test]
async fn test_transient_failure_retries_then_fails() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let run_id = stores
        .runs
        .put(creation(
            thread_id,
            assistant.assistant_id,
            json!({"__fail__": "transient"}),
        ))
        .await
        .unwrap()[0]
        .run_id;

    let worker = executor(&stores);
    let shutdown = worker.shutdown_signal();
    let handle = worker.spawn();

    // With a millisecond backoff the three attempts drain quickly.
    assert!(
        wait_for_run(&stores, run_id, Duration::from_secs(10), |status| {
            status == Some(RunStatus::Error)
        })
        .await
    );

    let attempts = stores
        .context()
        .persistence
        .read(|doc| doc.retry_counter.get(&run_id).copied())
        .await;
    assert_eq!(attempts, Some(3));

    shutdown.fire();
    let _ = handle.await;
}

#[tokio::test]
async fn test_graph_pause_marks_thread_interrupted() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let run_id = stores
        .runs
        .put(creation(
            thread_id,
            assistant.assistant_id,
            json!({"q": "deploy?", "__interrupt__": {"reason": "approval"}}),
        ))
        .await
        .unwrap()[0]
        .run_id;

    let picked = stores.runs.next().await;
    executor(&stores).execute(picked.into_iter().next().unwrap()).await;

    assert_eq!(
        stores.runs.get(run_id, None).await.unwrap().status,
        RunStatus::Success
    );
    let thread = stores.threads.get(thread_id).await.unwrap();
    assert_eq!(thread.status, ThreadStatus::Interrupted);
    assert_eq!(thread.interrupts.len(), 1);
    let payloads = thread.interrupts.values().next().unwrap();
    assert_eq!(payloads[0], json!({"reason": "approval"}));
}

#[tokio::test]
async fn test_worker_loop_end_to_end_join() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let worker = executor(&stores);
    let shutdown = worker.shutdown_signal();
    let handle = worker.spawn();

    let run_id = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id, json!({"k": "v"})))
        .await
        .unwrap()[0]
        .run_id;

    let value = tokio::time::timeout(
        Duration::from_secs(10),
        stores.runs.join(run_id, thread_id),
    )
    .await
    .expect("join timed out")
    .unwrap();
    assert_eq!(value.get("k"), Some(&json!("v")));

    shutdown.fire();
    let _ = handle.await;
}

#[tokio::test]
async fn test_enqueue_runs_serially_in_order() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let worker = executor(&stores);
    let shutdown = worker.shutdown_signal();
    let handle = worker.spawn();

    let mut first = creation(thread_id, assistant.assistant_id, json!({"a": 1}));
    first.multitask_strategy = trellis_server::models::MultitaskStrategy::Enqueue;
    let r1 = stores.runs.put(first).await.unwrap()[0].run_id;

    tokio::time::sleep(Duration::from_millis(5)).await;

    let mut second = creation(thread_id, assistant.assistant_id, json!({"b": 2}));
    second.multitask_strategy = trellis_server::models::MultitaskStrategy::Enqueue;
    let r2 = stores.runs.put(second).await.unwrap()[0].run_id;

    for run_id in [r1, r2] {
        assert!(
            wait_for_run(&stores, run_id, Duration::from_secs(10), |status| {
                status == Some(RunStatus::Success)
            })
            .await
        );
    }

    // Both runs' effects are in the final state, in order.
    let thread = stores.threads.get(thread_id).await.unwrap();
    let values = thread.values.unwrap();
    assert_eq!(values.get("a"), Some(&json!(1)));
    assert_eq!(values.get("b"), Some(&json!(2)));
    assert_eq!(thread.status, ThreadStatus::Idle);

    shutdown.fire();
    let _ = handle.await;
}

#[tokio::test]
async fn test_batch_history_law() {
    let stores = stores();
    let thread_id = Uuid::new_v4();
    stores
        .threads
        .put(thread_id, meta(json!({"graph_id": "echo"})), IfExists::Raise)
        .await
        .unwrap();

    let supersteps = vec![
        Superstep {
            updates: vec![StateUpdate {
                values: json!({"a": 1}),
                as_node: None,
            }],
        },
        Superstep {
            updates: vec![StateUpdate {
                values: json!({"b": 2}),
                as_node: None,
            }],
        },
        Superstep {
            updates: vec![StateUpdate {
                values: json!({"c": 3}),
                as_node: None,
            }],
        },
    ];
    let thread = stores
        .threads
        .bulk_update_state(thread_id, supersteps)
        .await
        .unwrap();

    // The thread projection reflects the final superstep.
    let values = thread.values.unwrap();
    assert_eq!(values.get("c"), Some(&json!(3)));

    let history = stores
        .threads
        .state_history(thread_id, Some(10), None, None)
        .await
        .unwrap();
    assert!(history.len() >= 3);
    // Reverse-chronological with matching values.
    assert_eq!(history[0].values.get("c"), Some(&json!(3)));
    assert_eq!(history[1].values.get("b"), Some(&json!(2)));
    assert!(history[1].values.get("c").is_none());
    assert_eq!(history[2].values.get("a"), Some(&json!(1)));
}

#[tokio::test]
async fn test_wait_rewrites_error_events() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let run_id = stores
        .runs
        .put(creation(
            thread_id,
            assistant.assistant_id,
            json!({"__fail__": "fatal"}),
        ))
        .await
        .unwrap()[0]
        .run_id;

    let picked = stores.runs.next().await;
    executor(&stores).execute(picked.into_iter().next().unwrap()).await;

    let value = stores.runs.wait(run_id, Some(thread_id)).await.unwrap();
    assert!(value.get("__error__").is_some());
}
