//! Repo watcher (C1): fetches + checks out a branch and diffs against the
//! last processed commit to produce exploit-directory insertions/removals.
//!
//! Shells out to `git` via `std::process::Command`, the same way the
//! teacher's `GitManager` does — this is a thin wrapper over the CLI, not a
//! linked git implementation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::error;

use crate::error::RepoScanError;

/// Two-level relative path `<challenge>/<exploit>`, the unit the watcher and
/// loader operate on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExploitDir {
    pub challenge_name: String,
    pub exploit_name: String,
}

impl ExploitDir {
    pub fn rel_path(&self) -> PathBuf {
        PathBuf::from(&self.challenge_name).join(&self.exploit_name)
    }
}

pub struct ScanResult {
    pub updated: Vec<ExploitDir>,
    pub removed: Vec<ExploitDir>,
    pub new_hash: String,
}

pub struct RepoWatcher {
    path: PathBuf,
    branch: String,
    last_processed_hash: String,
}

fn run_git(path: &Path, args: &[&str]) -> Result<String, RepoScanError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .map_err(|e| RepoScanError::new(format!("failed to execute git {}", args.join(" ")), "", e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        error!(args = %args.join(" "), %stdout, %stderr, "git command failed");
        return Err(RepoScanError::new(format!("git {} failed", args.join(" ")), stdout, stderr));
    }

    Ok(stdout.trim().to_string())
}

impl RepoWatcher {
    /// Construct a watcher over a pre-existing git working tree. Fatal at
    /// startup (per the error-handling design) if `.git` is absent.
    pub fn new(path: impl Into<PathBuf>, branch: impl Into<String>) -> anyhow::Result<Self> {
        let path = path.into().canonicalize()?;
        if !path.join(".git").exists() {
            anyhow::bail!("unable to find git repo at {}", path.display());
        }
        Ok(Self {
            path,
            branch: branch.into(),
            last_processed_hash: String::new(),
        })
    }

    pub fn last_processed_hash(&self) -> &str {
        &self.last_processed_hash
    }

    fn current_head(&self) -> Result<String, RepoScanError> {
        run_git(&self.path, &["rev-parse", "HEAD"])
    }

    /// Invoked at startup: initializes `last_processed_hash` from `HEAD` and
    /// returns every exploit directory currently present on disk, so the
    /// catalog can be bootstrapped without diffing.
    pub fn connect(&mut self) -> Result<Vec<ExploitDir>, RepoScanError> {
        self.last_processed_hash = self.current_head()?;
        Ok(self.enumerate_exploit_dirs())
    }

    fn enumerate_exploit_dirs(&self) -> Vec<ExploitDir> {
        let mut dirs = Vec::new();
        let Ok(challenges) = std::fs::read_dir(&self.path) else {
            return dirs;
        };
        for challenge in challenges.flatten() {
            if !challenge.path().is_dir() || challenge.file_name() == ".git" {
                continue;
            }
            let Some(challenge_name) = challenge.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(exploits) = std::fs::read_dir(challenge.path()) else {
                continue;
            };
            for exploit in exploits.flatten() {
                if !exploit.path().is_dir() {
                    continue;
                }
                if let Some(exploit_name) = exploit.file_name().to_str() {
                    dirs.push(ExploitDir {
                        challenge_name: challenge_name.clone(),
                        exploit_name: exploit_name.to_string(),
                    });
                }
            }
        }
        dirs
    }

    /// Fetch, checkout, and diff against `last_processed_hash`. Returns
    /// `None` if `HEAD` hasn't moved since the last scan.
    pub fn scan(&mut self) -> Result<Option<ScanResult>, RepoScanError> {
        run_git(&self.path, &["fetch", "--all"])?;
        run_git(&self.path, &["checkout", &self.branch])?;

        let new_hash = self.current_head()?;
        if new_hash == self.last_processed_hash {
            return Ok(None);
        }

        let changed = self.changed_exploit_dirs(&self.last_processed_hash)?;

        let mut updated = BTreeSet::new();
        let mut removed = BTreeSet::new();
        for dir in changed {
            if self.path.join(dir.rel_path()).exists() {
                updated.insert(dir);
            } else {
                removed.insert(dir);
            }
        }

        self.last_processed_hash = new_hash.clone();

        Ok(Some(ScanResult {
            updated: updated.into_iter().collect(),
            removed: removed.into_iter().collect(),
            new_hash,
        }))
    }

    /// `git diff --name-status <from_hash>`, reduced to the set of exploit
    /// directories touched — the directory-existence policy described in the
    /// repo-watcher design (rather than the `D` status letter) correctly
    /// handles partial deletes within a directory and renames.
    fn changed_exploit_dirs(&self, from_hash: &str) -> Result<BTreeSet<ExploitDir>, RepoScanError> {
        let output = run_git(&self.path, &["diff", "--name-status", from_hash])?;

        let mut result = BTreeSet::new();
        for line in output.lines() {
            let Some((_, path_str)) = line.split_once(char::is_whitespace) else {
                continue;
            };
            let path_str = path_str.trim();
            let parts: Vec<&str> = path_str.split('/').collect();
            if parts.len() < 3 {
                continue;
            }
            result.insert(ExploitDir {
                challenge_name: parts[0].to_string(),
                exploit_name: parts[1].to_string(),
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn init_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["config", "user.email", "test@test.com"]);
        git(dir.path(), &["config", "user.name", "Test"]);
        fs::write(dir.path().join("README.md"), "# hello").unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-q", "-m", "Initial commit"]);
        dir
    }

    fn head(dir: &Path) -> String {
        run_git(dir, &["rev-parse", "HEAD"]).unwrap()
    }

    /// S1 — empty scan: a freshly initialized repo, scanning against its own
    /// HEAD, returns `None`.
    #[test]
    fn s1_empty_scan_returns_none() {
        let dir = init_repo();
        let mut watcher = RepoWatcher::new(dir.path(), "master").unwrap();
        watcher.connect().unwrap();
        assert!(watcher.scan().unwrap().is_none());
    }

    /// S2 — add exploit: adding `high/ground/siren.toml` and rolling the
    /// working tree back to the prior commit (as the repeated `checkout
    /// HEAD~1` in the original test does) surfaces it as `updated`.
    #[test]
    fn s2_add_exploit_reports_updated() {
        let dir = init_repo();
        let mut watcher = RepoWatcher::new(dir.path(), "master").unwrap();
        watcher.connect().unwrap();

        let exploit_dir = dir.path().join("high/ground");
        fs::create_dir_all(&exploit_dir).unwrap();
        fs::write(exploit_dir.join("siren.toml"), "# something").unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-q", "-m", "New exploit"]);
        let new_commit = head(dir.path());
        git(dir.path(), &["checkout", "-q", "HEAD~1"]);

        let result = watcher.scan().unwrap().expect("expected a scan result");
        assert_eq!(result.updated, vec![ExploitDir {
            challenge_name: "high".to_string(),
            exploit_name: "ground".to_string(),
        }]);
        assert!(result.removed.is_empty());
        assert_eq!(result.new_hash, new_commit);
    }

    /// S3 — update exploit: adding a Dockerfile to the existing directory
    /// still reports it as `updated`, never duplicated.
    #[test]
    fn s3_update_exploit_reports_updated() {
        let dir = init_repo();
        let mut watcher = RepoWatcher::new(dir.path(), "master").unwrap();
        watcher.connect().unwrap();

        let exploit_dir = dir.path().join("high/ground");
        fs::create_dir_all(&exploit_dir).unwrap();
        fs::write(exploit_dir.join("siren.toml"), "# something").unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-q", "-m", "New exploit"]);
        git(dir.path(), &["checkout", "-q", "HEAD~1"]);
        watcher.scan().unwrap();

        fs::write(exploit_dir.join("Dockerfile"), "# something").unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-q", "-m", "Update exploit"]);
        git(dir.path(), &["checkout", "-q", "HEAD~2"]);

        let result = watcher.scan().unwrap().expect("expected a scan result");
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].exploit_name, "ground");
        assert!(result.removed.is_empty());
    }

    /// S4 — remove exploit: deleting the directory reports it as `removed`.
    #[test]
    fn s4_remove_exploit_reports_removed() {
        let dir = init_repo();
        let mut watcher = RepoWatcher::new(dir.path(), "master").unwrap();
        watcher.connect().unwrap();

        let exploit_dir = dir.path().join("high/ground");
        fs::create_dir_all(&exploit_dir).unwrap();
        fs::write(exploit_dir.join("siren.toml"), "# something").unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-q", "-m", "New exploit"]);
        git(dir.path(), &["checkout", "-q", "HEAD~1"]);
        watcher.scan().unwrap();

        fs::write(exploit_dir.join("Dockerfile"), "# something").unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-q", "-m", "Update exploit"]);
        git(dir.path(), &["checkout", "-q", "HEAD~2"]);
        watcher.scan().unwrap();

        fs::remove_dir_all(&exploit_dir).unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-q", "-m", "Remove exploit"]);
        git(dir.path(), &["checkout", "-q", "HEAD~2"]);

        let result = watcher.scan().unwrap().expect("expected a scan result");
        assert!(result.updated.is_empty());
        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0].exploit_name, "ground");
    }

    /// Property 6 / 4: two scans back-to-back with no intervening commits
    /// both return `None` and never mutate `last_processed_hash` spuriously.
    #[test]
    fn repeated_scan_with_no_new_commits_is_idempotent() {
        let dir = init_repo();
        let mut watcher = RepoWatcher::new(dir.path(), "master").unwrap();
        watcher.connect().unwrap();
        assert!(watcher.scan().unwrap().is_none());
        let hash_before = watcher.last_processed_hash().to_string();
        assert!(watcher.scan().unwrap().is_none());
        assert_eq!(watcher.last_processed_hash(), hash_before);
    }

    #[test]
    fn connect_enumerates_existing_exploit_dirs() {
        let dir = init_repo();
        fs::create_dir_all(dir.path().join("high/ground")).unwrap();
        fs::write(dir.path().join("high/ground/siren.toml"), "# x").unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-q", "-m", "seed"]);

        let mut watcher = RepoWatcher::new(dir.path(), "master").unwrap();
        let dirs = watcher.connect().unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].challenge_name, "high");
        assert_eq!(dirs[0].exploit_name, "ground");
    }
}
