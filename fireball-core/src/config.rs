//! Configuration surface: a closed record of env-driven knobs.
//!
//! Mirrors the original implementation's `config.py` prod/non-prod split —
//! `prod_mode` selects different defaults for the repo path, branch, and game
//! API URL, not a separate code path.

use std::env;

/// Top-level orchestrator configuration. No other knobs exist; anything the
/// scheduler/reconciler/gateway need at runtime lives on this struct.
#[derive(Debug, Clone)]
pub struct FireballConfig {
    /// Container engine socket URL, e.g. `unix:///var/run/docker.sock`.
    pub docker_socket: String,
    /// Base URL of the Siren scoring backend.
    pub scoring_url: String,
    /// Base URL of the Defcon game API. `None` disables flag submission.
    pub game_api_url: Option<String>,
    /// Absolute or relative path to the exploit repo's git working tree.
    pub repo_path: String,
    /// Branch to fetch and check out on each scan.
    pub repo_branch: String,
    /// Reconciler polling interval, in seconds.
    pub poll_interval_seconds: u64,
    /// Ceiling on concurrently `running` managed containers.
    pub max_running_containers: usize,
    /// This installation's own team slug, used to suppress self-flag submission.
    pub current_team_slug: String,
    /// Optional webhook URL for the log sink.
    pub log_webhook_url: Option<String>,
    /// Selects production defaults when set and the specific env var is absent.
    pub prod_mode: bool,
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

impl FireballConfig {
    /// Build configuration from environment variables, falling back to the
    /// same prod/non-prod defaults as the original `config.py`.
    pub fn from_env() -> Self {
        let prod_mode = env::var("PROD").is_ok();

        let (default_repo_path, default_repo_branch, default_game_api_url) = if prod_mode {
            (
                "../defcon-ctf-2021".to_string(),
                "origin/main".to_string(),
                Some("http://10.13.37.13".to_string()),
            )
        } else {
            ("../exploits-testing".to_string(), "origin/master".to_string(), None)
        };

        Self {
            docker_socket: env_string("FIREBALL_DOCKER_SOCKET")
                .unwrap_or_else(|| "unix:///var/run/docker.sock".to_string()),
            scoring_url: env_string("FIREBALL_SCORING_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            game_api_url: env_string("FIREBALL_GAME_API_URL").or(default_game_api_url),
            repo_path: env_string("FIREBALL_REPO_PATH").unwrap_or(default_repo_path),
            repo_branch: env_string("FIREBALL_REPO_BRANCH").unwrap_or(default_repo_branch),
            poll_interval_seconds: env_string("FIREBALL_DOCKER_POLLING_INTERVAL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            max_running_containers: env_string("FIREBALL_DOCKER_MAX_CONTAINERS_RUNNING")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            current_team_slug: env_string("FIREBALL_CURRENT_TEAM_SLUG").unwrap_or_default(),
            log_webhook_url: env_string("FIREBALL_WEBHOOK_URL"),
            prod_mode,
        }
    }
}
