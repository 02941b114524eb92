//! Multitask policy and cancellation protocol at the store level.

mod common;

use common::{echo_assistant, stores};
use trellis_server::bus::CancelAction;
use trellis_server::errors::ServerError;
use trellis_server::models::{IfNotExists, MultitaskStrategy, RunStatus};
use trellis_server::store::RunCreate;
use uuid::Uuid;

fn creation(thread_id: Uuid, assistant_id: Uuid) -> RunCreate {
    let mut create = RunCreate::new(thread_id, assistant_id);
    create.if_not_exists = IfNotExists::Create;
    create
}

#[tokio::test]
async fn test_reject_returns_inflight_without_inserting() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let first = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id))
        .await
        .unwrap();
    let first_id = first[0].run_id;

    let mut second = creation(thread_id, assistant.assistant_id);
    second.prevent_insert_in_inflight = true;
    let returned = stores.runs.put(second.clone()).await.unwrap();

    // The insert was prevented: only the inflight run comes back, and the
    // new run id was never stored.
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].run_id, first_id);
    assert!(stores.runs.get(second.run_id, None).await.is_err());

    let pending = stores
        .runs
        .search(
            thread_id,
            trellis_server::store::RunSearch {
                status: Some(RunStatus::Pending),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_enqueue_keeps_both_pending() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let mut first = creation(thread_id, assistant.assistant_id);
    first.multitask_strategy = MultitaskStrategy::Enqueue;
    stores.runs.put(first).await.unwrap();

    let mut second = creation(thread_id, assistant.assistant_id);
    second.multitask_strategy = MultitaskStrategy::Enqueue;
    let result = stores.runs.put(second).await.unwrap();

    // New run first, then the inflight tail.
    assert_eq!(result.len(), 2);
    let pending = stores
        .runs
        .search(
            thread_id,
            trellis_server::store::RunSearch {
                status: Some(RunStatus::Pending),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn test_rollback_deletes_unscheduled_inflight() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    // R1 pending, picker never ran, so it holds no bus lock.
    let r1 = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id))
        .await
        .unwrap()[0]
        .run_id;

    // R2 arrives with rollback: insert, then cancel the inflight tail.
    let mut second = creation(thread_id, assistant.assistant_id);
    second.multitask_strategy = MultitaskStrategy::Rollback;
    let result = stores.runs.put(second).await.unwrap();
    let r2 = result[0].run_id;
    let inflight: Vec<Uuid> = result[1..].iter().map(|r| r.run_id).collect();
    assert_eq!(inflight, vec![r1]);

    stores
        .runs
        .cancel(Some(thread_id), &inflight, CancelAction::Rollback)
        .await
        .unwrap();

    // R1 is gone entirely - no interrupted record left behind.
    assert!(matches!(
        stores.runs.get(r1, None).await.unwrap_err(),
        ServerError::NotFound(_)
    ));
    let r2_state = stores.runs.get(r2, None).await.unwrap();
    assert_eq!(r2_state.status, RunStatus::Pending);
}

#[tokio::test]
async fn test_interrupt_marks_locked_inflight_interrupted() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let r1 = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id))
        .await
        .unwrap()[0]
        .run_id;

    // Simulate the picker having dispatched R1.
    let picked = stores.runs.next().await;
    assert_eq!(picked[0].run.run_id, r1);

    stores
        .runs
        .cancel(Some(thread_id), &[r1], CancelAction::Interrupt)
        .await
        .unwrap();

    // The handle fired and the run transitioned exactly once.
    assert!(picked[0].control.is_fired());
    assert_eq!(picked[0].control.action(), Some(CancelAction::Interrupt));
    assert_eq!(
        stores.runs.get(r1, None).await.unwrap().status,
        RunStatus::Interrupted
    );
}

#[tokio::test]
async fn test_rollback_of_locked_run_interrupts_record() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let r1 = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id))
        .await
        .unwrap()[0]
        .run_id;
    let picked = stores.runs.next().await;

    stores
        .runs
        .cancel(Some(thread_id), &[r1], CancelAction::Rollback)
        .await
        .unwrap();

    // A locked (started) run is not eagerly deleted; the executor's
    // rollback path owns the deletion.
    assert_eq!(picked[0].control.action(), Some(CancelAction::Rollback));
    assert_eq!(
        stores.runs.get(r1, None).await.unwrap().status,
        RunStatus::Interrupted
    );
}

#[tokio::test]
async fn test_cancel_is_idempotent_on_finished_runs() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let run_id = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id))
        .await
        .unwrap()[0]
        .run_id;
    stores.runs.set_status(run_id, RunStatus::Success).await.unwrap();

    // Cancelling a finished run is a warning-level no-op.
    stores
        .runs
        .cancel(Some(thread_id), &[run_id], CancelAction::Interrupt)
        .await
        .unwrap();
    assert_eq!(
        stores.runs.get(run_id, None).await.unwrap().status,
        RunStatus::Success
    );
}

#[tokio::test]
async fn test_cancel_twice_yields_single_transition() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let run_id = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id))
        .await
        .unwrap()[0]
        .run_id;

    stores
        .runs
        .cancel(Some(thread_id), &[run_id], CancelAction::Interrupt)
        .await
        .unwrap();
    let first = stores.runs.get(run_id, None).await.unwrap();

    stores
        .runs
        .cancel(Some(thread_id), &[run_id], CancelAction::Interrupt)
        .await
        .unwrap();
    let second = stores.runs.get(run_id, None).await.unwrap();

    assert_eq!(first.status, RunStatus::Interrupted);
    assert_eq!(second.status, RunStatus::Interrupted);
}

#[tokio::test]
async fn test_cancel_unknown_run_is_not_found() {
    let stores = stores();
    let err = stores
        .runs
        .cancel(None, &[Uuid::new_v4()], CancelAction::Interrupt)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));
}

#[tokio::test]
async fn test_cancel_rejects_thread_mismatch() {
    let stores = stores();
    let assistant = echo_assistant(&stores).await;
    let thread_id = Uuid::new_v4();

    let run_id = stores
        .runs
        .put(creation(thread_id, assistant.assistant_id))
        .await
        .unwrap()[0]
        .run_id;

    let err = stores
        .runs
        .cancel(Some(Uuid::new_v4()), &[run_id], CancelAction::Interrupt)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));
    // The run is untouched.
    assert_eq!(
        stores.runs.get(run_id, None).await.unwrap().status,
        RunStatus::Pending
    );
}
