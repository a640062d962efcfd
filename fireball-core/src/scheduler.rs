//! Scheduler (C5): enumerates (enabled exploit × eligible team) on a tick,
//! resolves endpoints, registers tasks upstream, and creates (but does not
//! start) the backing containers. Starting them is exclusively the
//! reconciler's job — invariant: within a tick, every container is created
//! before any of them run.

use std::collections::HashMap;

use tracing::{error, info, warn};

use crate::model::{labels, Task};
use crate::state::{AppContext, SharedState};

/// Schedule one exploit against every eligible team. No-op if the contest
/// hasn't started (`current_round < 0`) or the exploit is disabled — the
/// safer early-return variant of the two the source code took across
/// revisions.
pub async fn start_exploit(ctx: &AppContext, state: &mut SharedState, exploit_id: &str) {
    if state.current_round < 0 {
        return;
    }

    let Some(exploit) = state.catalog.get(exploit_id).cloned() else {
        warn!(exploit_id, "start_exploit: no such exploit in catalog");
        return;
    };

    if !exploit.enabled {
        return;
    }

    let Some(problem) = state.problem_for_challenge(&exploit.challenge_name).cloned() else {
        warn!(exploit_id, "start_exploit: no problem record for challenge");
        return;
    };

    let round_id = state.current_round;
    let teams: Vec<_> = state
        .teams
        .values()
        .filter(|team| !exploit.ignore_teams.contains(&team.slug))
        .cloned()
        .collect();

    for team in teams {
        let endpoint = match ctx.siren.endpoint(team.id, problem.id).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(exploit_id, team = %team.slug, error = %e, "failed to resolve endpoint, skipping team this tick");
                continue;
            }
        };

        let task_id = match ctx.siren.create_task(round_id, &exploit.image_id, team.id).await {
            Ok(id) => id,
            Err(e) => {
                error!(exploit_id, team = %team.slug, error = %e, "failed to register task upstream, skipping team this tick");
                continue;
            }
        };

        let env: HashMap<String, String> = [
            ("HOST".to_string(), endpoint.host),
            ("PORT".to_string(), endpoint.port),
        ]
        .into_iter()
        .collect();

        let container_labels: HashMap<String, String> = [
            (labels::EXPLOIT_ID.to_string(), exploit.exploit_id.clone()),
            (labels::TASK_ID.to_string(), task_id.to_string()),
            (labels::TEAM_SLUG.to_string(), team.slug.clone()),
        ]
        .into_iter()
        .collect();

        match ctx.engine.create_container(&exploit.image_id, &env, &container_labels).await {
            Ok(container_id) => {
                state.tasks.insert(
                    task_id,
                    Task {
                        task_id,
                        exploit_id: exploit.exploit_id.clone(),
                        team_slug: team.slug.clone(),
                        container_id,
                        last_status: None,
                    },
                );
            }
            Err(e) => {
                error!(exploit_id, team = %team.slug, task_id, error = %e, "failed to create container for task");
            }
        }
    }

    info!(exploit_id, round_id, "scheduled exploit");
}

/// `game_tick(round_id)`: set `current_round`, then invoke `start_exploit`
/// for every catalog entry. Caller must already hold the main lock.
pub async fn game_tick(ctx: &AppContext, state: &mut SharedState, round_id: i64) {
    state.current_round = round_id;
    let exploit_ids: Vec<String> = state.catalog.iter().map(|e| e.exploit_id.clone()).collect();
    for exploit_id in exploit_ids {
        start_exploit(ctx, state, &exploit_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defcon::DefconClient;
    use crate::fake_engine::FakeEngine;
    use crate::model::{Exploit, Problem, Team};
    use crate::repo::RepoWatcher;
    use crate::siren::SirenClient;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn bare_git_repo() -> std::path::PathBuf {
        let dir = tempfile::tempdir().unwrap().keep();
        std::process::Command::new("git").args(["init", "-q"]).current_dir(&dir).status().unwrap();
        dir
    }

    fn ctx() -> AppContext {
        let repo_root = bare_git_repo();
        AppContext::new(
            Arc::new(FakeEngine::new()),
            SirenClient::new("http://127.0.0.1:0"),
            DefconClient::new(None),
            RepoWatcher::new(&repo_root, "master").unwrap(),
            repo_root,
            "us".to_string(),
        )
    }

    fn exploit() -> Exploit {
        Exploit {
            exploit_id: "high:ground".to_string(),
            challenge_name: "high".to_string(),
            name: "ground".to_string(),
            image_id: "sha256:deadbeef".to_string(),
            timeout_seconds: 30,
            enabled: true,
            ignore_teams: HashSet::new(),
            meta: toml::value::Table::new(),
        }
    }

    #[tokio::test]
    async fn negative_round_is_a_noop() {
        let mut state = SharedState::new();
        state.catalog.insert_local(exploit());
        assert_eq!(state.current_round, -1);

        let ctx = ctx();
        start_exploit(&ctx, &mut state, "high:ground").await;
        assert!(state.tasks.is_empty());
    }

    #[tokio::test]
    async fn disabled_exploit_is_a_noop() {
        let mut state = SharedState::new();
        state.current_round = 1;
        let mut disabled = exploit();
        disabled.enabled = false;
        state.catalog.insert_local(disabled);
        state.problems.insert(
            "high".to_string(),
            Problem {
                id: 1,
                enabled: true,
                name: "High Ground".to_string(),
                slug: "high".to_string(),
                aux: serde_json::Value::Null,
            },
        );
        state.teams.insert(
            "them".to_string(),
            Team {
                id: 2,
                name: "Them".to_string(),
                slug: "them".to_string(),
                aux: serde_json::Value::Null,
            },
        );

        let ctx = ctx();
        start_exploit(&ctx, &mut state, "high:ground").await;
        assert!(state.tasks.is_empty());
    }
}
