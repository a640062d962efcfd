//! Exploit loader (C2): parses an exploit directory's manifest and drives
//! the image build, producing a catalog entry.
//!
//! Manifest format is TOML (`siren.toml`), matching the original
//! implementation's use of the `toml` crate and the scenario fixtures in
//! spec.md (`high/ground/siren.toml`).

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::engine::ContainerEngine;
use crate::error::ExploitParseError;
use crate::model::Exploit;

#[derive(Debug, Deserialize)]
struct Manifest {
    timeout: u64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    ignore_teams: Vec<String>,
    /// Opaque passthrough metadata table, carried but never interpreted.
    #[serde(default)]
    meta: toml::value::Table,
}

fn default_enabled() -> bool {
    true
}

const MANIFEST_FILENAME: &str = "siren.toml";

/// Load one exploit directory into a catalog entry. On any error the
/// directory is skipped by the caller — the scan continues for the rest.
pub async fn from_path(
    engine: &dyn ContainerEngine,
    repo_root_absolute: &Path,
    dir_rel: &Path,
    name: &str,
    challenge: &str,
) -> Result<Exploit, ExploitParseError> {
    let abs_dir = repo_root_absolute.join(dir_rel);
    let manifest_path = abs_dir.join(MANIFEST_FILENAME);

    let manifest_text = std::fs::read_to_string(&manifest_path).map_err(|_| ExploitParseError::MissingManifest {
        path: manifest_path.display().to_string(),
    })?;

    let manifest: Manifest = toml::from_str(&manifest_text).map_err(|e| ExploitParseError::InvalidManifest {
        path: manifest_path.display().to_string(),
        message: e.to_string(),
    })?;

    if manifest.timeout == 0 {
        return Err(ExploitParseError::InvalidManifest {
            path: manifest_path.display().to_string(),
            message: "timeout must be positive".to_string(),
        });
    }

    let image_id = engine
        .build_image(&abs_dir)
        .await
        .map_err(|e| ExploitParseError::BuildFailed {
            path: abs_dir.display().to_string(),
            message: e.to_string(),
        })?;

    Ok(Exploit {
        exploit_id: Exploit::make_id(challenge, name),
        challenge_name: challenge.to_string(),
        name: name.to_string(),
        image_id,
        timeout_seconds: manifest.timeout,
        enabled: manifest.enabled,
        ignore_teams: manifest.ignore_teams.into_iter().collect::<HashSet<_>>(),
        meta: manifest.meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_engine::FakeEngine;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn loads_a_valid_manifest() {
        let dir = tempdir().unwrap();
        let exploit_dir = dir.path().join("high/ground");
        fs::create_dir_all(&exploit_dir).unwrap();
        fs::write(
            exploit_dir.join("siren.toml"),
            "timeout = 30\nenabled = true\nignore_teams = [\"us\"]\n",
        )
        .unwrap();
        fs::write(exploit_dir.join("Dockerfile"), "FROM scratch").unwrap();

        let engine = FakeEngine::new();
        let exploit = from_path(&engine, dir.path(), Path::new("high/ground"), "ground", "high")
            .await
            .unwrap();

        assert_eq!(exploit.exploit_id, "high:ground");
        assert_eq!(exploit.timeout_seconds, 30);
        assert!(exploit.enabled);
        assert!(exploit.ignore_teams.contains("us"));
    }

    #[tokio::test]
    async fn missing_manifest_is_an_error() {
        let dir = tempdir().unwrap();
        let exploit_dir = dir.path().join("high/ground");
        fs::create_dir_all(&exploit_dir).unwrap();

        let engine = FakeEngine::new();
        let result = from_path(&engine, dir.path(), Path::new("high/ground"), "ground", "high").await;
        assert!(matches!(result, Err(ExploitParseError::MissingManifest { .. })));
    }

    #[tokio::test]
    async fn defaults_enabled_to_true_when_absent() {
        let dir = tempdir().unwrap();
        let exploit_dir = dir.path().join("high/ground");
        fs::create_dir_all(&exploit_dir).unwrap();
        fs::write(exploit_dir.join("siren.toml"), "timeout = 5\n").unwrap();

        let engine = FakeEngine::new();
        let exploit = from_path(&engine, dir.path(), Path::new("high/ground"), "ground", "high")
            .await
            .unwrap();
        assert!(exploit.enabled);
        assert!(exploit.ignore_teams.is_empty());
    }
}
