//! Shared process state and the main lock.
//!
//! `connect()` bootstrap, `game_tick`, `repo_scan`, and each reconciler
//! iteration all run with `SharedState` exclusively locked — the single
//! coarse mutex the concurrency design calls for, rather than sharded
//! per-field locks: finer locking would let a scan race a tick and
//! duplicate container creations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::defcon::DefconClient;
use crate::engine::ContainerEngine;
use crate::error::FireballError;
use crate::loader;
use crate::model::{Problem, Task, Team};
use crate::repo::RepoWatcher;
use crate::siren::SirenClient;

/// Everything mutated only while holding the main lock.
#[derive(Default)]
pub struct SharedState {
    pub catalog: Catalog,
    pub teams: HashMap<String, Team>,
    pub problems: HashMap<String, Problem>,
    pub tasks: HashMap<i64, Task>,
    pub current_round: i64,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            current_round: -1,
            ..Default::default()
        }
    }

    pub fn problem_for_challenge(&self, challenge_name: &str) -> Option<&Problem> {
        self.problems.get(challenge_name)
    }
}

/// Process-lifetime handles plus the lock that guards `SharedState`. Engine
/// and backend clients are stateless singletons and live outside the lock.
pub struct AppContext {
    pub state: Mutex<SharedState>,
    pub engine: Arc<dyn ContainerEngine>,
    pub siren: SirenClient,
    pub defcon: DefconClient,
    pub repo: Mutex<RepoWatcher>,
    pub repo_root: std::path::PathBuf,
    pub current_team_slug: String,
}

impl AppContext {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        siren: SirenClient,
        defcon: DefconClient,
        repo: RepoWatcher,
        repo_root: std::path::PathBuf,
        current_team_slug: String,
    ) -> Self {
        Self {
            state: Mutex::new(SharedState::new()),
            engine,
            siren,
            defcon,
            repo: Mutex::new(repo),
            repo_root,
            current_team_slug,
        }
    }

    /// Startup bootstrap: enumerate exploit directories on disk, load each,
    /// refresh teams/problems. Does not talk to the reconciler/scheduler.
    pub async fn connect(&self) -> Result<(), FireballError> {
        let repo_root = self.repo_root.clone();
        let dirs = {
            let mut repo = self.repo.lock().await;
            repo.connect()?
        };

        let mut state = self.state.lock().await;

        match self.siren.current_round().await {
            Ok(round) => state.current_round = round,
            Err(e) => warn!(error = %e, "failed to fetch current round at startup, contest treated as not yet started"),
        }

        for dir in &dirs {
            match loader::from_path(
                self.engine.as_ref(),
                &repo_root,
                &dir.rel_path(),
                &dir.exploit_name,
                &dir.challenge_name,
            )
            .await
            {
                Ok(exploit) => state.catalog.insert_local(exploit),
                Err(e) => warn!(challenge = %dir.challenge_name, exploit = %dir.exploit_name, error = %e, "skipping exploit directory at startup"),
            }
        }

        self.refresh_teams_and_problems_locked(&mut state).await;

        info!(exploits = state.catalog.len(), "bootstrap complete");
        Ok(())
    }

    /// `POST /refresh`: resync teams + problems, synchronously.
    pub async fn refresh(&self) {
        let mut state = self.state.lock().await;
        self.refresh_teams_and_problems_locked(&mut state).await;
    }

    async fn refresh_teams_and_problems_locked(&self, state: &mut SharedState) {
        match self.siren.teams().await {
            Ok(teams) => {
                state.teams = teams.into_iter().map(|t| (t.slug.clone(), t)).collect();
            }
            Err(e) => error!(error = %e, "failed to refresh teams"),
        }
        match self.siren.problems().await {
            Ok(problems) => {
                state.problems = problems.into_iter().map(|p| (p.slug.clone(), p)).collect();
            }
            Err(e) => error!(error = %e, "failed to refresh problems"),
        }
    }
}
