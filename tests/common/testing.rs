#![allow(dead_code)]

use std::time::Duration;

/// Install the tracing subscriber once per test binary.
pub fn init_tracing() {
    flowline::telemetry::init();
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn eventually<F>(condition: F, what: &str)
where
    F: Fn() -> bool,
{
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Give spawned fire-and-forget work a moment to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
