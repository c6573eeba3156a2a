mod common;

use std::time::Duration;

use common::*;
use flowline::progress::{ProgressPublisher, ProgressUpdate};
use flowline::types::{JobId, JobStatus};

fn update(progress: f64) -> ProgressUpdate {
    ProgressUpdate {
        job_id: JobId::from("job-p"),
        status: JobStatus::Active,
        progress,
        details: String::new(),
        nodes: vec![],
    }
}

#[test]
fn info_always_passes_through() {
    let reporter = RecordingReporter::new();
    let mut publisher = ProgressPublisher::new(reporter.clone(), Duration::from_secs(60));
    publisher.info(update(10.0));
    publisher.info(update(20.0));
    publisher.info(update(30.0));
    assert_eq!(reporter.updates().len(), 3);
}

#[test]
fn debug_is_throttled_on_the_leading_edge() {
    let reporter = RecordingReporter::new();
    let mut publisher = ProgressPublisher::new(reporter.clone(), Duration::from_secs(60));
    publisher.debug(update(10.0));
    publisher.debug(update(20.0));
    publisher.debug(update(30.0));
    // First call passes immediately; the rest fall inside the window.
    let seen = reporter.updates();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].progress, 10.0);
}

#[test]
fn debug_passes_again_after_the_window() {
    let reporter = RecordingReporter::new();
    let mut publisher = ProgressPublisher::new(reporter.clone(), Duration::ZERO);
    publisher.debug(update(10.0));
    publisher.debug(update(20.0));
    assert_eq!(reporter.updates().len(), 2);
}
