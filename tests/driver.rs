mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use flowline::config::DriverConfig;
use flowline::driver::{DriverError, JobDescriptor, JobOutcome, PipelineDriver};
use flowline::events::{DriverHandle, TaskEvent};
use flowline::pipeline::{Edge, NodeSpec, Pipeline};
use flowline::store::{InMemoryStateStore, StateStore};
use flowline::types::{JobId, JobStatus, TaskStatus};
use serde_json::json;
use tokio::task::JoinHandle;

type RunHandle = JoinHandle<(PipelineDriver, Result<JobOutcome, DriverError>)>;

fn quick_config() -> DriverConfig {
    DriverConfig::default()
        .with_progress_throttle(Duration::ZERO)
        .with_dispatch_retry_delay(Duration::from_millis(10))
}

fn setup(
    job_id: &str,
    pipeline: Pipeline,
) -> (
    Arc<InMemoryStateStore>,
    Arc<RecordingProducer>,
    DriverHandle,
    RunHandle,
) {
    init_tracing();
    let store = Arc::new(InMemoryStateStore::new());
    let producer = RecordingProducer::new();
    let (mut driver, handle) = PipelineDriver::new(
        JobDescriptor::new(job_id, pipeline),
        store.clone(),
        producer.clone(),
        quick_config(),
    );
    let run = tokio::spawn(async move {
        let outcome = driver.run().await;
        (driver, outcome)
    });
    (store, producer, handle, run)
}

fn succeed_event(task_id: flowline::types::TaskId, result: serde_json::Value) -> TaskEvent {
    TaskEvent::new(task_id, TaskStatus::Succeed).with_result(result)
}

#[tokio::test]
async fn end_to_end_diamond_completes() {
    let (store, producer, handle, run) = setup("job-diamond", diamond());

    eventually(|| producer.enqueue_count() == 2, "A and B dispatched").await;

    let a = producer.enqueued_for("A")[0].clone();
    let b = producer.enqueued_for("B")[0].clone();
    handle
        .task_event(TaskEvent::new(a.task_id.clone(), TaskStatus::Active))
        .unwrap();
    handle.task_event(succeed_event(a.task_id, json!(1))).unwrap();
    handle.task_event(succeed_event(b.task_id, json!(2))).unwrap();

    eventually(|| producer.enqueue_count() == 3, "C dispatched").await;
    let c_dispatches = producer.enqueued_for("C");
    assert_eq!(c_dispatches.len(), 1, "C must dispatch exactly once");
    assert_eq!(c_dispatches[0].input, json!([1, 2]));

    handle
        .task_event(succeed_event(c_dispatches[0].task_id.clone(), json!(42)))
        .unwrap();

    let (driver, outcome) = run.await.unwrap();
    let JobOutcome::Completed { result } = outcome.unwrap() else {
        panic!("expected completion");
    };
    assert_eq!(result["C"], json!(42));
    assert_eq!(driver.status(), JobStatus::Completed);
    assert_eq!(producer.enqueue_count(), 3);

    let job_id = JobId::from("job-diamond");
    assert_eq!(
        store.job_status(&job_id).await.unwrap(),
        Some(JobStatus::Completed)
    );
    let persisted = store.job_result(&job_id).await.unwrap().unwrap();
    assert_eq!(persisted.output.unwrap()["C"], json!(42));
}

#[tokio::test]
async fn completion_order_does_not_matter() {
    let (_store, producer, handle, run) = setup("job-diamond-rev", diamond());

    eventually(|| producer.enqueue_count() == 2, "A and B dispatched").await;
    let a = producer.enqueued_for("A")[0].clone();
    let b = producer.enqueued_for("B")[0].clone();

    // Reverse order: B first, then A.
    handle.task_event(succeed_event(b.task_id, json!(2))).unwrap();
    settle().await;
    assert_eq!(producer.enqueued_for("C").len(), 0, "C must wait for A");
    handle.task_event(succeed_event(a.task_id, json!(1))).unwrap();

    eventually(|| producer.enqueue_count() == 3, "C dispatched").await;
    let c = producer.enqueued_for("C")[0].clone();
    assert_eq!(c.input, json!([1, 2]));

    handle.task_event(succeed_event(c.task_id, json!("done"))).unwrap();
    let (_, outcome) = run.await.unwrap();
    assert!(matches!(outcome.unwrap(), JobOutcome::Completed { .. }));
}

#[tokio::test]
async fn batch_tolerance_reached_fails_the_job() {
    let (store, producer, handle, run) = setup("job-batch-fail", batch_pipeline(60));

    eventually(|| producer.enqueue_count() == 5, "batch fan-out").await;
    let instances = producer.enqueued_for("green");
    for descriptor in instances.iter().take(3) {
        handle
            .task_event(
                TaskEvent::new(descriptor.task_id.clone(), TaskStatus::Failed)
                    .with_error("oooohh noooo"),
            )
            .unwrap();
    }

    let (driver, outcome) = run.await.unwrap();
    let JobOutcome::Failed { reason } = outcome.unwrap() else {
        panic!("expected failure");
    };
    assert!(reason.contains("3/5 (60%)"), "unexpected reason: {reason}");
    assert!(reason.contains("batch tolerance is 60%"));
    assert_eq!(driver.status(), JobStatus::Failed);

    // The two in-flight instances are best-effort cancelled.
    eventually(|| producer.cancelled().len() == 2, "cancellations").await;

    let persisted = store
        .job_result(&JobId::from("job-batch-fail"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.status, JobStatus::Failed);
    assert!(persisted.error.unwrap().contains("batch tolerance"));
}

#[tokio::test]
async fn batch_failures_under_tolerance_are_excused() {
    let (_store, producer, handle, run) = setup("job-batch-pass", batch_pipeline(60));

    eventually(|| producer.enqueue_count() == 5, "batch fan-out").await;
    let instances = producer.enqueued_for("green");

    // Enqueue order is not batch order (submission is fire-and-forget),
    // so key everything off the descriptor's batch index.
    for descriptor in &instances {
        let index = descriptor.batch_index.unwrap();
        let event = if index < 2 {
            TaskEvent::new(descriptor.task_id.clone(), TaskStatus::Failed).with_error("boom")
        } else {
            succeed_event(descriptor.task_id.clone(), json!((index + 1) * 10))
        };
        handle.task_event(event).unwrap();
    }

    let (_, outcome) = run.await.unwrap();
    let JobOutcome::Completed { result } = outcome.unwrap() else {
        panic!("expected tolerated completion");
    };
    assert_eq!(result["green"], json!([null, null, 30, 40, 50]));
    assert_eq!(producer.enqueue_count(), 5);
}

#[tokio::test]
async fn wait_any_dispatches_exactly_once() {
    let (_store, producer, handle, run) = setup("job-wait-any", wait_any_pipeline());

    eventually(|| producer.enqueue_count() == 2, "green and yellow dispatched").await;
    let green = producer.enqueued_for("green")[0].clone();
    let yellow = producer.enqueued_for("yellow")[0].clone();

    handle
        .task_event(succeed_event(green.task_id, json!({"from": "green"})))
        .unwrap();
    eventually(|| producer.enqueue_count() == 3, "black dispatched").await;
    assert_eq!(producer.enqueued_for("black").len(), 1);
    assert_eq!(
        producer.enqueued_for("black")[0].input,
        json!([{"from": "green"}])
    );

    // The second wait-any parent finishing must not re-trigger black.
    handle
        .task_event(succeed_event(yellow.task_id, json!({"from": "yellow"})))
        .unwrap();
    settle().await;
    assert_eq!(producer.enqueued_for("black").len(), 1);

    let black = producer.enqueued_for("black")[0].clone();
    handle.task_event(succeed_event(black.task_id, json!("ok"))).unwrap();

    let (_, outcome) = run.await.unwrap();
    assert!(matches!(outcome.unwrap(), JobOutcome::Completed { .. }));
    assert_eq!(producer.enqueue_count(), 3);
}

#[tokio::test]
async fn non_batch_failure_is_fatal() {
    let (store, producer, handle, run) = setup("job-fatal", two_nodes());

    eventually(|| producer.enqueue_count() == 1, "green dispatched").await;
    let green = producer.enqueued_for("green")[0].clone();
    handle
        .task_event(TaskEvent::new(green.task_id, TaskStatus::Failed).with_error("oooohh noooo"))
        .unwrap();

    let (_, outcome) = run.await.unwrap();
    let JobOutcome::Failed { reason } = outcome.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(reason, "oooohh noooo");
    assert_eq!(producer.enqueued_for("yellow").len(), 0);

    let persisted = store
        .job_result(&JobId::from("job-fatal"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.error.as_deref(), Some("oooohh noooo"));
}

#[tokio::test]
async fn stop_cancels_in_flight_work() {
    let (store, producer, handle, run) = setup("job-stop", two_nodes());

    eventually(|| producer.enqueue_count() == 1, "green dispatched").await;
    let green = producer.enqueued_for("green")[0].clone();
    handle.stop("requested by operator").unwrap();

    let (driver, outcome) = run.await.unwrap();
    let JobOutcome::Stopped { reason } = outcome.unwrap() else {
        panic!("expected stop");
    };
    assert_eq!(reason, "requested by operator");
    assert_eq!(driver.status(), JobStatus::Stopped);

    eventually(
        || producer.cancelled().contains(&green.task_id),
        "green cancelled",
    )
    .await;
    assert_eq!(
        store.job_status(&JobId::from("job-stop")).await.unwrap(),
        Some(JobStatus::Stopped)
    );
    // Never-dispatched yellow ends up stopped, not dangling.
    let snapshot = driver.progress();
    assert!(
        snapshot
            .nodes
            .iter()
            .all(|(_, status)| status.is_terminal()),
        "all nodes terminal after stop: {:?}",
        snapshot.nodes
    );
}

#[tokio::test]
async fn stalled_task_can_still_succeed() {
    let (_store, producer, handle, run) = setup("job-stall-ok", one_node());

    eventually(|| producer.enqueue_count() == 1, "green dispatched").await;
    let green = producer.enqueued_for("green")[0].clone();
    handle
        .task_event(TaskEvent::new(green.task_id.clone(), TaskStatus::Stalled).with_error("taskStalled"))
        .unwrap();
    settle().await;
    handle.task_event(succeed_event(green.task_id, json!(1))).unwrap();

    let (_, outcome) = run.await.unwrap();
    assert!(matches!(outcome.unwrap(), JobOutcome::Completed { .. }));
}

#[tokio::test]
async fn stalled_task_can_still_fail() {
    let (_store, producer, handle, run) = setup("job-stall-bad", one_node());

    eventually(|| producer.enqueue_count() == 1, "green dispatched").await;
    let green = producer.enqueued_for("green")[0].clone();
    handle
        .task_event(TaskEvent::new(green.task_id.clone(), TaskStatus::Stalled).with_error("taskStalled"))
        .unwrap();
    settle().await;
    handle
        .task_event(TaskEvent::new(green.task_id, TaskStatus::Failed).with_error("gave up"))
        .unwrap();

    let (_, outcome) = run.await.unwrap();
    assert!(matches!(
        outcome.unwrap(),
        JobOutcome::Failed { reason } if reason == "gave up"
    ));
}

#[tokio::test]
async fn duplicate_terminal_events_are_absorbed() {
    let (_store, producer, handle, run) = setup("job-dup", two_nodes());

    eventually(|| producer.enqueue_count() == 1, "green dispatched").await;
    let green = producer.enqueued_for("green")[0].clone();
    handle
        .task_event(succeed_event(green.task_id.clone(), json!(1)))
        .unwrap();
    // At-least-once delivery: the same terminal event arrives again, and a
    // conflicting one after that.
    handle
        .task_event(succeed_event(green.task_id.clone(), json!(999)))
        .unwrap();
    handle
        .task_event(TaskEvent::new(green.task_id, TaskStatus::Failed).with_error("late"))
        .unwrap();

    eventually(|| producer.enqueue_count() == 2, "yellow dispatched").await;
    assert_eq!(producer.enqueued_for("yellow").len(), 1);
    let yellow = producer.enqueued_for("yellow")[0].clone();
    assert_eq!(yellow.input, json!([1]), "first result wins");

    handle.task_event(succeed_event(yellow.task_id, json!(2))).unwrap();
    let (_, outcome) = run.await.unwrap();
    let JobOutcome::Completed { result } = outcome.unwrap() else {
        panic!("expected completion");
    };
    assert_eq!(result["green"], json!(1));
}

#[tokio::test]
async fn failed_enqueue_is_retried() {
    init_tracing();
    let store = Arc::new(InMemoryStateStore::new());
    let producer = RecordingProducer::new();
    producer.fail_next_enqueues(1);
    let (mut driver, handle) = PipelineDriver::new(
        JobDescriptor::new("job-retry", one_node()),
        store,
        producer.clone(),
        quick_config(),
    );
    let run = tokio::spawn(async move {
        let outcome = driver.run().await;
        (driver, outcome)
    });

    eventually(
        || producer.attempts() >= 2 && producer.enqueue_count() == 1,
        "retry after rejected enqueue",
    )
    .await;

    let green = producer.enqueued_for("green")[0].clone();
    handle.task_event(succeed_event(green.task_id, json!(1))).unwrap();
    let (_, outcome) = run.await.unwrap();
    assert!(matches!(outcome.unwrap(), JobOutcome::Completed { .. }));
}

#[tokio::test]
async fn invalid_pipeline_fails_without_dispatching() {
    init_tracing();
    let cyclic = Pipeline::new("cycle")
        .add_node(NodeSpec::new("a", "alg"))
        .add_node(NodeSpec::new("b", "alg"))
        .add_edge(Edge::new("a", "b"))
        .add_edge(Edge::new("b", "a"));

    let store = Arc::new(InMemoryStateStore::new());
    let producer = RecordingProducer::new();
    let (mut driver, _handle) = PipelineDriver::new(
        JobDescriptor::new("job-invalid", cyclic),
        store.clone(),
        producer.clone(),
        quick_config(),
    );

    let outcome = driver.run().await.unwrap();
    let JobOutcome::Failed { reason } = outcome else {
        panic!("expected failure");
    };
    assert!(reason.contains("cycle"), "unexpected reason: {reason}");
    assert_eq!(producer.enqueue_count(), 0);

    let persisted = store
        .job_result(&JobId::from("job-invalid"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.status, JobStatus::Failed);
}

#[tokio::test]
async fn missing_flow_input_fails_the_job() {
    init_tracing();
    let pipeline = Pipeline::new("bad-ref")
        .add_node(NodeSpec::new("green", "alg").with_input(vec![json!("@flowInput.absent")]))
        .with_flow_input(json!({"x": 1}));

    let store = Arc::new(InMemoryStateStore::new());
    let producer = RecordingProducer::new();
    let (mut driver, _handle) = PipelineDriver::new(
        JobDescriptor::new("job-bad-ref", pipeline),
        store,
        producer.clone(),
        quick_config(),
    );

    let outcome = driver.run().await.unwrap();
    assert!(matches!(
        outcome,
        JobOutcome::Failed { reason } if reason.contains("absent")
    ));
    assert_eq!(producer.enqueue_count(), 0);
}

#[tokio::test]
async fn stateful_nodes_start_immediately() {
    init_tracing();
    let pipeline = Pipeline::new("stateful")
        .add_node(NodeSpec::new("source", "src-alg"))
        .add_node(NodeSpec::new("sink", "sink-alg").stateful())
        .add_edge(Edge::new("source", "sink"));

    let store = Arc::new(InMemoryStateStore::new());
    let producer = RecordingProducer::new();
    let (mut driver, handle) = PipelineDriver::new(
        JobDescriptor::new("job-stateful", pipeline),
        store,
        producer.clone(),
        quick_config(),
    );
    let run = tokio::spawn(async move {
        let outcome = driver.run().await;
        (driver, outcome)
    });

    // Both the parentless source and the stateful sink dispatch at start.
    eventually(|| producer.enqueue_count() == 2, "stateful node dispatched").await;
    assert_eq!(producer.enqueued_for("sink").len(), 1);

    for descriptor in producer.enqueued() {
        handle.task_event(succeed_event(descriptor.task_id, json!(null))).unwrap();
    }
    let (_, outcome) = run.await.unwrap();
    assert!(matches!(outcome.unwrap(), JobOutcome::Completed { .. }));
}
