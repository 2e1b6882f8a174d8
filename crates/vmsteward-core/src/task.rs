// ── Task waiter ──
//
// Control-plane actions return a task handle immediately; the work
// happens later. These helpers sleep-then-poll the task until it reaches
// a terminal state.

use std::time::Duration;

use tracing::{debug, info, warn};

use vmsteward_api::{TaskRef, TaskState};

use crate::connection::Connection;
use crate::error::CoreError;

/// Wait for `task` to finish. Returns `true` on success, `false` if the
/// task ended in error.
///
/// With `timeout` set, fails with [`CoreError::Timeout`] once the time
/// spent sleeping exceeds it. Without one, polls forever.
pub async fn wait_for_task(
    conn: &Connection,
    task: &TaskRef,
    timeout: Option<Duration>,
) -> Result<bool, CoreError> {
    let interval = conn.polling.task_poll_interval;
    let mut waited = Duration::ZERO;

    info!(%task, "checking on task");
    let state = loop {
        let state = conn.call(|p| async move { p.task_state(task).await }).await?;
        if state.is_terminal() {
            break state;
        }

        debug!(%task, %state, waited = ?waited, "waiting for task to complete");
        tokio::time::sleep(interval).await;
        waited += interval;

        if let Some(limit) = timeout {
            if waited > limit {
                warn!(%task, waited = ?waited, "task did not complete in time");
                return Err(CoreError::Timeout {
                    operation: format!("Task {task}"),
                    waited,
                });
            }
        }
    };

    if state == TaskState::Success {
        info!(%task, "task succeeded");
        Ok(true)
    } else {
        warn!(%task, "task failed");
        Ok(false)
    }
}

/// Wait for `task` and turn a failed task into [`CoreError::BadState`]
/// carrying `failure`.
pub async fn expect_task(
    conn: &Connection,
    task: &TaskRef,
    timeout: Option<Duration>,
    failure: &str,
) -> Result<(), CoreError> {
    if wait_for_task(conn, task, timeout).await? {
        Ok(())
    } else {
        Err(CoreError::bad_state(failure))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;
    use tokio::time::Instant;
    use vmsteward_api::fake::{Call, FakeConnector, FakeControlPlane};

    use super::*;
    use crate::config::ConnectionConfig;

    async fn connect(plane: &FakeControlPlane) -> Connection {
        let config =
            ConnectionConfig::new("vcenter.lab", "svc", SecretString::from("pw".to_string()));
        Connection::connect(Arc::new(FakeConnector::new(plane.clone())), &config)
            .await
            .unwrap()
    }

    fn polls(plane: &FakeControlPlane) -> usize {
        plane.count(|c| matches!(c, Call::TaskState(_)))
    }

    #[tokio::test(start_paused = true)]
    async fn sequences_ending_in_success_return_true() {
        let plane = FakeControlPlane::new();
        let conn = connect(&plane).await;

        for prefix in 0..4 {
            let mut states = vec![TaskState::Queued];
            states.extend(std::iter::repeat_n(TaskState::Running, prefix));
            states.push(TaskState::Success);
            let task = plane.submit_task(states);

            assert!(wait_for_task(&conn, &task, None).await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sequences_ending_in_error_return_false() {
        let plane = FakeControlPlane::new();
        let conn = connect(&plane).await;

        for prefix in 0..4 {
            let mut states = vec![TaskState::Running; prefix];
            states.push(TaskState::Error);
            let task = plane.submit_task(states);

            assert!(!wait_for_task(&conn, &task, Some(Duration::from_secs(60))).await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn already_finished_task_does_not_sleep() {
        let plane = FakeControlPlane::new();
        let conn = connect(&plane).await;
        let task = plane.submit_task(vec![TaskState::Success]);

        let start = Instant::now();
        assert!(wait_for_task(&conn, &task, Some(Duration::from_secs(10))).await.unwrap());

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(polls(&plane), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_only_after_exceeding_limit() {
        let plane = FakeControlPlane::new();
        let conn = connect(&plane).await;
        let task = plane.submit_task(vec![TaskState::Running]);

        let start = Instant::now();
        let err = wait_for_task(&conn, &task, Some(Duration::from_secs(60)))
            .await
            .unwrap_err();

        // Polls at 0..=60s are within budget; the sleep to 70s exceeds it.
        assert_eq!(start.elapsed(), Duration::from_secs(70));
        assert_eq!(polls(&plane), 7);
        match err {
            CoreError::Timeout { waited, operation } => {
                assert_eq!(waited, Duration::from_secs(70));
                assert!(operation.contains("task-1"));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn task_finishing_on_the_limit_is_not_a_timeout() {
        let plane = FakeControlPlane::new();
        let conn = connect(&plane).await;
        let mut states = vec![TaskState::Running; 6];
        states.push(TaskState::Success);
        let task = plane.submit_task(states);

        assert!(wait_for_task(&conn, &task, Some(Duration::from_secs(60))).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expect_task_maps_failure_to_bad_state() {
        let plane = FakeControlPlane::new();
        let conn = connect(&plane).await;
        let task = plane.submit_task(vec![TaskState::Error]);

        let err = expect_task(&conn, &task, None, "VMware failed to move the VM")
            .await
            .unwrap_err();

        assert!(
            matches!(&err, CoreError::BadState { message } if message == "VMware failed to move the VM")
        );
    }
}
