mod common;

use common::*;
use flowline::graph::TaskInstance;
use flowline::store::{InMemoryStateStore, JobResult, PersistedTask, StateStore};
use flowline::types::{JobId, JobStatus, TaskStatus};
use serde_json::json;

#[tokio::test]
async fn unknown_jobs_load_as_none() {
    let store = InMemoryStateStore::new();
    assert!(store.load_job(&JobId::from("nope")).await.unwrap().is_none());
    assert!(store.job_status(&JobId::from("nope")).await.unwrap().is_none());
    assert!(store.job_result(&JobId::from("nope")).await.unwrap().is_none());
}

#[tokio::test]
async fn save_task_upserts_by_task_id() {
    let store = InMemoryStateStore::new();
    let job_id = JobId::from("job-s");

    let mut task = persisted_task("green", "green-alg", TaskStatus::Pending, None);
    store.save_task(&job_id, task.clone()).await.unwrap();

    task.status = TaskStatus::Succeed;
    task.result = Some(json!(1));
    store.save_task(&job_id, task.clone()).await.unwrap();

    let record = store.load_job(&job_id).await.unwrap().unwrap();
    assert_eq!(record.tasks.len(), 1);
    assert_eq!(record.tasks[0].status, TaskStatus::Succeed);
    assert_eq!(record.tasks[0].result, Some(json!(1)));
}

#[tokio::test]
async fn status_and_result_round_trip() {
    let store = InMemoryStateStore::new();
    let job_id = JobId::from("job-s2");

    store.set_job_status(&job_id, JobStatus::Active).await.unwrap();
    assert_eq!(
        store.job_status(&job_id).await.unwrap(),
        Some(JobStatus::Active)
    );

    store
        .set_job_result(
            &job_id,
            JobResult {
                status: JobStatus::Completed,
                output: Some(json!({"green": 1})),
                error: None,
            },
        )
        .await
        .unwrap();
    let result = store.job_result(&job_id).await.unwrap().unwrap();
    assert_eq!(result.output, Some(json!({"green": 1})));
}

#[test]
fn persisted_task_converts_both_ways() {
    let mut instance = TaskInstance::new("green", "green-alg", json!([1, 2]), Some(3));
    instance.status = TaskStatus::Succeed;
    instance.result = Some(json!("done"));
    instance.ended_at = Some(chrono::Utc::now());

    let persisted = PersistedTask::from(&instance);
    assert_eq!(persisted.batch_index, Some(3));
    assert_eq!(persisted.status, TaskStatus::Succeed);

    let back = TaskInstance::from(persisted);
    assert_eq!(back.task_id, instance.task_id);
    assert_eq!(back.input, json!([1, 2]));
    assert_eq!(back.result, Some(json!("done")));
    assert!(back.ended_at.is_some());
}

#[test]
fn persisted_task_survives_json() {
    let persisted = persisted_task("green", "green-alg", TaskStatus::Stalled, None);
    let text = serde_json::to_string(&persisted).unwrap();
    let back: PersistedTask = serde_json::from_str(&text).unwrap();
    assert_eq!(back.task_id, persisted.task_id);
    assert_eq!(back.status, TaskStatus::Stalled);
}
