//! Task model (C4): each task owns a container handle and know how to
//! start, delete, and classify its own status.

use chrono::Utc;

use crate::engine::ContainerEngine;
use crate::error::EngineError;
use crate::model::{ContainerState, Task, TaskState, TaskStatus};

impl Task {
    /// Start the underlying container. The next `refresh_status` call is
    /// expected to observe `RUNNING`.
    pub async fn start(&self, engine: &dyn ContainerEngine) -> Result<(), EngineError> {
        engine.start_container(&self.container_id).await
    }

    /// Delete the underlying container, optionally forcing removal.
    pub async fn delete(&self, engine: &dyn ContainerEngine, force: bool) -> Result<(), EngineError> {
        engine.delete_container(&self.container_id, force).await
    }

    /// Inspect the container and classify it against the state machine in
    /// the reconciler design. Does not itself delete the container on
    /// `TIMEOUT`/`RUNTIME_ERROR` — callers apply the side effect so that the
    /// classification step stays a pure read.
    pub async fn refresh_status(
        &self,
        engine: &dyn ContainerEngine,
        timeout_seconds: u64,
    ) -> Result<TaskStatus, EngineError> {
        let inspect = engine.inspect_container(&self.container_id).await?;
        let (stdout, stderr) = engine.container_logs(&self.container_id).await?;

        let status = match inspect.state {
            ContainerState::Created | ContainerState::Paused => TaskStatus::new(TaskState::Pending, stdout, stderr),

            ContainerState::Running => {
                let elapsed_over_timeout = inspect
                    .started_at
                    .map(|started| (Utc::now() - started).num_seconds() as u64 > timeout_seconds)
                    .unwrap_or(false);

                if elapsed_over_timeout {
                    TaskStatus::new(TaskState::Timeout, stdout, stderr)
                } else {
                    TaskStatus::new(TaskState::Running, stdout, stderr)
                }
            }

            ContainerState::Exited => {
                if inspect.exit_code == Some(0) {
                    let flag = engine
                        .read_archive_path(&self.container_id, "/tmp/flag")
                        .await?
                        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string());

                    let mut status = TaskStatus::new(TaskState::Okay, stdout, stderr);
                    if let Some(flag) = flag {
                        status = status.with_flag(flag);
                    }
                    status
                } else {
                    TaskStatus::new(TaskState::RuntimeError, stdout, stderr)
                }
            }

            // Not deleting the container here on purpose: these states are
            // surprising enough mid-lifecycle that an operator should be able
            // to inspect what's left of it.
            ContainerState::Restarting | ContainerState::Removing | ContainerState::Dead => {
                TaskStatus::new(TaskState::RuntimeError, stdout, stderr).retained()
            }
        };

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_engine::{FakeContainer, FakeEngine};
    use chrono::Duration;
    use std::collections::HashMap;

    fn task(container_id: &str) -> Task {
        Task {
            task_id: 1,
            exploit_id: "high:ground".to_string(),
            team_slug: "us".to_string(),
            container_id: container_id.to_string(),
            last_status: None,
        }
    }

    #[tokio::test]
    async fn created_container_is_pending() {
        let engine = FakeEngine::new();
        engine.seed("c1", FakeContainer::default());
        let status = task("c1").refresh_status(&engine, 30).await.unwrap();
        assert!(matches!(status.state, TaskState::Pending));
    }

    /// S5 — timeout: a container started 2s ago with a 1s timeout and still
    /// `running` is classified TIMEOUT.
    #[tokio::test]
    async fn running_past_timeout_is_classified_timeout() {
        let engine = FakeEngine::new();
        engine.seed(
            "c1",
            FakeContainer {
                state: ContainerState::Running,
                started_at: Some(Utc::now() - Duration::seconds(2)),
                ..Default::default()
            },
        );
        let status = task("c1").refresh_status(&engine, 1).await.unwrap();
        assert!(matches!(status.state, TaskState::Timeout));
    }

    #[tokio::test]
    async fn running_within_timeout_stays_running() {
        let engine = FakeEngine::new();
        engine.seed(
            "c1",
            FakeContainer {
                state: ContainerState::Running,
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        );
        let status = task("c1").refresh_status(&engine, 30).await.unwrap();
        assert!(matches!(status.state, TaskState::Running));
    }

    #[tokio::test]
    async fn exited_zero_with_flag_is_okay_with_flag() {
        let engine = FakeEngine::new();
        engine.seed(
            "c1",
            FakeContainer {
                state: ContainerState::Exited,
                exit_code: Some(0),
                ..Default::default()
            },
        );
        engine.put_archive_file("c1", "/tmp/flag", b"FLAG{test}".to_vec());
        let status = task("c1").refresh_status(&engine, 30).await.unwrap();
        assert!(matches!(status.state, TaskState::Okay));
        assert_eq!(status.flag.as_deref(), Some("FLAG{test}"));
    }

    /// Boundary 9: exit 0 with no flag file is OKAY, `flag = None`, no error.
    #[tokio::test]
    async fn exited_zero_without_flag_is_okay_with_no_flag() {
        let engine = FakeEngine::new();
        engine.seed(
            "c1",
            FakeContainer {
                state: ContainerState::Exited,
                exit_code: Some(0),
                ..Default::default()
            },
        );
        let status = task("c1").refresh_status(&engine, 30).await.unwrap();
        assert!(matches!(status.state, TaskState::Okay));
        assert!(status.flag.is_none());
    }

    #[tokio::test]
    async fn exited_nonzero_is_runtime_error() {
        let engine = FakeEngine::new();
        engine.seed(
            "c1",
            FakeContainer {
                state: ContainerState::Exited,
                exit_code: Some(1),
                ..Default::default()
            },
        );
        let status = task("c1").refresh_status(&engine, 30).await.unwrap();
        assert!(matches!(status.state, TaskState::RuntimeError));
        assert!(!status.retain_container);
    }

    /// `dead`/`restarting`/`removing` is RUNTIME_ERROR too, but flagged for
    /// retention rather than deletion — unlike a nonzero exit.
    #[tokio::test]
    async fn dead_container_is_runtime_error() {
        let engine = FakeEngine::new();
        engine.seed(
            "c1",
            FakeContainer {
                state: ContainerState::Dead,
                ..Default::default()
            },
        );
        let status = task("c1").refresh_status(&engine, 30).await.unwrap();
        assert!(matches!(status.state, TaskState::RuntimeError));
        assert!(status.retain_container);
    }

    #[allow(dead_code)]
    fn _unused(_: HashMap<String, String>) {}
}
