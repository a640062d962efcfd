//! Core data model: catalog entries, teams, problems, endpoints, tasks.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label keys every managed container carries. `fireball.managed` is the
/// filter key used to list them back from the engine.
pub mod labels {
    pub const MANAGED: &str = "fireball.managed";
    pub const EXPLOIT_ID: &str = "fireball.exploit_id";
    pub const TASK_ID: &str = "fireball.task_id";
    pub const TEAM_SLUG: &str = "fireball.team_slug";
}

/// A catalog entry: one exploit program, one image. Immutable after creation;
/// replaced wholesale on update, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Exploit {
    /// `"<challenge>:<name>"`.
    pub exploit_id: String,
    pub challenge_name: String,
    pub name: String,
    /// Content-addressed image id returned by the engine's build step.
    pub image_id: String,
    pub timeout_seconds: u64,
    pub enabled: bool,
    pub ignore_teams: HashSet<String>,
    /// The manifest's `[meta]` table, stored as-is and never interpreted.
    pub meta: toml::value::Table,
}

impl Exploit {
    /// Join challenge and exploit name into the canonical `exploit_id`.
    ///
    /// Per invariant 5, neither component may contain `:`.
    pub fn make_id(challenge_name: &str, name: &str) -> String {
        debug_assert!(!challenge_name.contains(':') && !name.contains(':'));
        format!("{challenge_name}:{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub aux: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    pub enabled: bool,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub aux: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Okay,
    RuntimeError,
    Timeout,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Okay => "OKAY",
            TaskState::RuntimeError => "RUNTIME_ERROR",
            TaskState::Timeout => "TIMEOUT",
        }
    }
}

/// Latest-observed status of a task, as classified by the reconciler.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub state: TaskState,
    pub stdout: String,
    pub stderr: String,
    /// Only ever `Some` when `state == Okay`.
    pub flag: Option<String>,
    pub status_message: Option<String>,
    /// Only meaningful when `state == RuntimeError`: `restarting`/`removing`/
    /// `dead`/other non-exited states retain the container for operator
    /// inspection instead of being deleted.
    pub retain_container: bool,
}

impl TaskStatus {
    pub fn new(state: TaskState, stdout: String, stderr: String) -> Self {
        Self {
            state,
            stdout,
            stderr,
            flag: None,
            status_message: None,
            retain_container: false,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_flag(mut self, flag: String) -> Self {
        self.flag = Some(flag);
        self
    }

    pub fn retained(mut self) -> Self {
        self.retain_container = true;
        self
    }
}

/// A scheduled run: the binding between a task id (assigned by Siren), the
/// exploit/team it runs, and the container that backs it.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: i64,
    pub exploit_id: String,
    pub team_slug: String,
    pub container_id: String,
    pub last_status: Option<TaskStatus>,
}

/// Engine-reported container state, as returned by inspect.
#[derive(Debug, Clone)]
pub struct ContainerInspect {
    pub id: String,
    pub state: ContainerState,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub labels: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Exited,
    Restarting,
    Removing,
    Dead,
}

impl ContainerState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "exited" => ContainerState::Exited,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Dead,
        }
    }
}
