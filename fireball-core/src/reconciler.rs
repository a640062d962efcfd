//! Reconciler (C6): the periodic loop that lists engine-managed containers,
//! reconstructs tasks purely from their labels, classifies each one,
//! reports/collects outcomes, and admits pending tasks under the running cap.
//!
//! No local durable state is needed — a crash-restart rebuilds every task
//! from the engine's label index on the first poll.

use rand::seq::SliceRandom;
use tracing::{error, info, warn};

use crate::error::LabelError;
use crate::model::{labels, ContainerInspect, Task, TaskState};
use crate::outcome;
use crate::state::{AppContext, SharedState};

const DANGLING_MESSAGE: &str = "Dangling exploit";
const START_FAILURE_MESSAGE: &str = "Failed to start the container";

/// Reconstructed from a managed container's labels, or flagged dangling if
/// any label is missing or malformed.
enum Discovered {
    Task(Task),
    Dangling { error: LabelError, task_id: Option<i64> },
}

fn reconstruct(container: &ContainerInspect) -> Discovered {
    let exploit_id = container.labels.get(labels::EXPLOIT_ID).cloned();
    let team_slug = container.labels.get(labels::TEAM_SLUG).cloned();
    let task_id = container
        .labels
        .get(labels::TASK_ID)
        .and_then(|v| v.parse::<i64>().ok());

    match (exploit_id, team_slug, task_id) {
        (Some(exploit_id), Some(team_slug), Some(task_id)) => Discovered::Task(Task {
            task_id,
            exploit_id,
            team_slug,
            container_id: container.id.clone(),
            last_status: None,
        }),
        (exploit_id, team_slug, task_id) => {
            let mut missing = Vec::new();
            if exploit_id.is_none() {
                missing.push(labels::EXPLOIT_ID);
            }
            if team_slug.is_none() {
                missing.push(labels::TEAM_SLUG);
            }
            if task_id.is_none() {
                missing.push(labels::TASK_ID);
            }
            Discovered::Dangling {
                error: LabelError {
                    container_id: container.id.clone(),
                    reason: format!("missing or unparsable label(s): {}", missing.join(", ")),
                },
                task_id,
            }
        }
    }
}

/// Run a single reconciliation pass. Caller must already hold the main lock.
/// Any per-task failure is isolated — it's logged and the iteration
/// continues; only unrecoverable listing failures short-circuit the whole
/// pass (and even then, the caller's loop catches and continues on the next
/// tick).
pub async fn run_iteration(ctx: &AppContext, state: &mut SharedState, max_running_containers: usize) {
    let containers = match ctx.engine.list_managed_containers().await {
        Ok(containers) => containers,
        Err(e) => {
            error!(error = %e, "failed to list managed containers, skipping this iteration");
            return;
        }
    };

    let mut running_count = 0usize;
    let mut pending_tasks = Vec::new();

    for container in &containers {
        match reconstruct(container) {
            Discovered::Dangling { error, task_id } => {
                warn!(container_id = %error.container_id, error = %error, "dangling managed container");
                if let Err(e) = ctx.engine.delete_container(&error.container_id, true).await {
                    error!(container_id = %error.container_id, error = %e, "failed to force-delete dangling container");
                }
                if let Some(task_id) = task_id {
                    report_status(ctx, task_id, TaskState::RuntimeError, "", "", Some(DANGLING_MESSAGE)).await;
                }
            }
            Discovered::Task(task) => {
                let timeout_seconds = state
                    .catalog
                    .get(&task.exploit_id)
                    .map(|e| e.timeout_seconds)
                    .unwrap_or(u64::MAX);

                let status = match task.refresh_status(ctx.engine.as_ref(), timeout_seconds).await {
                    Ok(status) => status,
                    Err(e) => {
                        error!(task_id = task.task_id, error = %e, "failed to refresh task status");
                        continue;
                    }
                };

                match status.state {
                    TaskState::Pending => pending_tasks.push(task),
                    TaskState::Running => {
                        report_status(ctx, task.task_id, TaskState::Running, &status.stdout, &status.stderr, None).await;
                        running_count += 1;
                    }
                    TaskState::Timeout => {
                        report_status(ctx, task.task_id, TaskState::Timeout, &status.stdout, &status.stderr, None).await;
                        delete(ctx, &task.container_id).await;
                    }
                    TaskState::RuntimeError => {
                        report_status(ctx, task.task_id, TaskState::RuntimeError, &status.stdout, &status.stderr, None).await;
                        if status.retain_container {
                            warn!(task_id = task.task_id, container_id = %task.container_id, "retaining runtime-error container for inspection");
                        } else {
                            delete(ctx, &task.container_id).await;
                        }
                    }
                    TaskState::Okay => {
                        report_status(ctx, task.task_id, TaskState::Okay, &status.stdout, &status.stderr, None).await;
                        match &status.flag {
                            Some(flag) => {
                                outcome::submit_flag(&ctx.siren, &ctx.defcon, task.task_id, flag, &task.team_slug, &ctx.current_team_slug)
                                    .await;
                                delete(ctx, &task.container_id).await;
                            }
                            None => {
                                warn!(task_id = task.task_id, "container exited 0 but produced no flag");
                                delete(ctx, &task.container_id).await;
                            }
                        }
                    }
                }
            }
        }
    }

    admit(ctx, pending_tasks, running_count, max_running_containers).await;
}

async fn report_status(
    ctx: &AppContext,
    task_id: i64,
    state: TaskState,
    stdout: &str,
    stderr: &str,
    message: Option<&str>,
) {
    if let Err(e) = ctx
        .siren
        .update_task_status(task_id, state.as_str(), stdout, stderr, message)
        .await
    {
        error!(task_id, error = %e, "failed to report task status upstream");
    }
}

async fn delete(ctx: &AppContext, container_id: &str) {
    if let Err(e) = ctx.engine.delete_container(container_id, false).await {
        error!(container_id, error = %e, "failed to delete container");
    }
}

/// Step D: shuffle pending tasks for fairness, then start them one by one
/// while under the running-container cap.
async fn admit(ctx: &AppContext, mut pending: Vec<Task>, mut running_count: usize, max_running_containers: usize) {
    pending.shuffle(&mut rand::rng());

    for task in pending {
        if running_count >= max_running_containers {
            break;
        }
        match task.start(ctx.engine.as_ref()).await {
            Ok(()) => {
                running_count += 1;
                info!(task_id = task.task_id, "started task");
            }
            Err(e) => {
                error!(task_id = task.task_id, error = %e, "failed to start container");
                report_status(ctx, task.task_id, TaskState::RuntimeError, "", "", Some(START_FAILURE_MESSAGE)).await;
                if let Err(e) = task.delete(ctx.engine.as_ref(), true).await {
                    error!(task_id = task.task_id, error = %e, "failed to force-delete container after failed start");
                }
            }
        }
    }
}
