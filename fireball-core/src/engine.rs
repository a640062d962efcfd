//! Container engine client: the docker-compatible substrate the scheduler
//! and reconciler drive. Specified as a trait so unit tests exercise the
//! scheduler/reconciler against an in-memory fake instead of a real daemon.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::model::ContainerInspect;

/// Everything the core needs from a container engine. Grounded on the
/// bollard usage patterns in the pack's docker-engine reference files
/// (container create/start/delete/inspect/logs/archive, label-filtered
/// listing).
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build an image from a directory (honoring `.dockerignore`), returning
    /// the engine-assigned content-addressed image id.
    async fn build_image(&self, dir: &Path) -> Result<String, EngineError>;

    /// Create (but do not start) a container.
    async fn create_container(
        &self,
        image_id: &str,
        env: &HashMap<String, String>,
        labels: &HashMap<String, String>,
    ) -> Result<String, EngineError>;

    async fn start_container(&self, container_id: &str) -> Result<(), EngineError>;

    async fn delete_container(&self, container_id: &str, force: bool) -> Result<(), EngineError>;

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerInspect, EngineError>;

    /// Returns `(stdout, stderr)` as joined line lists.
    async fn container_logs(&self, container_id: &str) -> Result<(String, String), EngineError>;

    /// Extract a single path from the container's filesystem archive.
    /// `Ok(None)` means the path doesn't exist — not an error.
    async fn read_archive_path(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, EngineError>;

    /// List all containers carrying `fireball.managed=true`, in any state.
    async fn list_managed_containers(&self) -> Result<Vec<ContainerInspect>, EngineError>;
}

/// Production implementation over `bollard::Docker`.
pub struct BollardEngine {
    docker: bollard::Docker,
}

impl BollardEngine {
    pub fn connect(socket_url: &str) -> anyhow::Result<Self> {
        let docker = bollard::Docker::connect_with_socket(socket_url, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { docker })
    }

    fn inspect_to_model(id: &str, details: bollard::models::ContainerInspectResponse) -> ContainerInspect {
        let state = details
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_default();
        let exit_code = details.state.as_ref().and_then(|s| s.exit_code);
        let started_at = details
            .state
            .as_ref()
            .and_then(|s| s.started_at.as_ref())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let labels = details
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();

        ContainerInspect {
            id: id.to_string(),
            state: crate::model::ContainerState::parse(&state),
            exit_code,
            started_at,
            labels,
        }
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn build_image(&self, dir: &Path) -> Result<String, EngineError> {
        use bollard::image::BuildImageOptions;
        use futures::stream::StreamExt;

        let dockerfile = dir.join("Dockerfile");
        if !dockerfile.exists() {
            return Err(EngineError::new("build_image", format!("no Dockerfile at {}", dir.display())));
        }

        let tar_bytes = tar_directory(dir).map_err(|e| EngineError::new("build_image", e.to_string()))?;

        let options = BuildImageOptions::<String> {
            dockerfile: "Dockerfile".to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(tar_bytes.into()));
        let mut image_id = None;
        while let Some(chunk) = stream.next().await {
            let info = chunk.map_err(|e| EngineError::new("build_image", e.to_string()))?;
            if let Some(err) = info.error {
                return Err(EngineError::new("build_image", err));
            }
            if let Some(aux) = info.aux {
                if let Some(id) = aux.id {
                    image_id = Some(id);
                }
            }
        }

        image_id.ok_or_else(|| EngineError::new("build_image", "build stream produced no image id"))
    }

    async fn create_container(
        &self,
        image_id: &str,
        env: &HashMap<String, String>,
        labels: &HashMap<String, String>,
    ) -> Result<String, EngineError> {
        let env_list: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut all_labels = labels.clone();
        all_labels.insert(crate::model::labels::MANAGED.to_string(), "true".to_string());

        let config = bollard::container::Config {
            image: Some(image_id.to_string()),
            env: Some(env_list),
            labels: Some(all_labels),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container::<String, String>(None, config)
            .await
            .map_err(|e| EngineError::new("create_container", e.to_string()))?;

        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container::<String>(container_id, None)
            .await
            .map_err(|e| EngineError::new("start_container", e.to_string()))
    }

    async fn delete_container(&self, container_id: &str, force: bool) -> Result<(), EngineError> {
        let options = bollard::container::RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| EngineError::new("delete_container", e.to_string()))
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerInspect, EngineError> {
        let details = self
            .docker
            .inspect_container(container_id, None::<bollard::container::InspectContainerOptions>)
            .await
            .map_err(|e| EngineError::new("inspect_container", e.to_string()))?;
        Ok(Self::inspect_to_model(container_id, details))
    }

    async fn container_logs(&self, container_id: &str) -> Result<(String, String), EngineError> {
        use bollard::container::LogsOptions;
        use futures::stream::StreamExt;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));
        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| EngineError::new("container_logs", e.to_string()))? {
                bollard::container::LogOutput::StdOut { message } => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                bollard::container::LogOutput::StdErr { message } => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }
        Ok((stdout, stderr))
    }

    async fn read_archive_path(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        use bollard::container::DownloadFromContainerOptions;
        use futures::stream::StreamExt;

        let options = DownloadFromContainerOptions { path: path.to_string() };
        let mut stream = self.docker.download_from_container(container_id, Some(options));
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(b) => bytes.extend_from_slice(&b),
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                    return Ok(None);
                }
                Err(e) => return Err(EngineError::new("read_archive_path", e.to_string())),
            }
        }

        extract_single_file_from_tar(&bytes, path)
            .map_err(|e| EngineError::new("read_archive_path", e.to_string()))
    }

    async fn list_managed_containers(&self) -> Result<Vec<ContainerInspect>, EngineError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", crate::model::labels::MANAGED)]);

        let options = bollard::container::ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::new("list_managed_containers", e.to_string()))?;

        let mut result = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            result.push(self.inspect_container(&id).await?);
        }
        Ok(result)
    }
}

/// `.dockerignore` patterns: non-blank, non-comment lines, same filter
/// docker-py's own build-context helper applies before handing them to `tar`.
fn dockerignore_patterns(dir: &Path) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(dir.join(".dockerignore")) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Last matching pattern wins, `!`-prefixed patterns re-include. A pattern
/// matches a path or any of its ancestor directories, mirroring how a
/// `.dockerignore` entry for a directory excludes everything under it.
fn is_excluded(rel_path: &str, patterns: &[String]) -> bool {
    let mut excluded = false;
    for pattern in patterns {
        let (negate, pattern) = pattern.strip_prefix('!').map_or((false, pattern.as_str()), |p| (true, p));
        let pattern = pattern.trim_end_matches('/');
        if glob_matches(pattern, rel_path) || rel_path.starts_with(&format!("{pattern}/")) {
            excluded = !negate;
        }
    }
    excluded
}

/// Minimal shell-glob matcher: `*` matches any run of characters, `?` matches
/// exactly one, everything else is literal.
fn glob_matches(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[u8], text: &[u8]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&pattern[1..], text) || (!text.is_empty() && inner(pattern, &text[1..])),
            (Some(b'?'), Some(_)) => inner(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => inner(&pattern[1..], &text[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

fn tar_directory(dir: &Path) -> anyhow::Result<Vec<u8>> {
    let patterns = dockerignore_patterns(dir);
    let mut builder = tar::Builder::new(Vec::new());
    append_dir_excluding(&mut builder, dir, dir, &patterns)?;
    Ok(builder.into_inner()?)
}

fn append_dir_excluding(builder: &mut tar::Builder<Vec<u8>>, root: &Path, current: &Path, patterns: &[String]) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let rel_path = path.strip_prefix(root)?.to_string_lossy().replace('\\', "/");

        if is_excluded(&rel_path, patterns) {
            continue;
        }

        if path.is_dir() {
            append_dir_excluding(builder, root, &path, patterns)?;
        } else {
            builder.append_path_with_name(&path, &rel_path)?;
        }
    }
    Ok(())
}

fn extract_single_file_from_tar(bytes: &[u8], wanted_path: &str) -> anyhow::Result<Option<Vec<u8>>> {
    use std::io::Read;

    let wanted_name = Path::new(wanted_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut archive = tar::Archive::new(bytes);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        if path == wanted_name || path.ends_with(&format!("/{wanted_name}")) {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(Some(buf));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn tar_entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn dockerignore_excludes_matching_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        fs::write(dir.path().join("secret.env"), "TOKEN=x").unwrap();
        fs::create_dir_all(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/bin"), "binary").unwrap();
        fs::write(dir.path().join(".dockerignore"), "*.env\ntarget\n# a comment\n").unwrap();

        let bytes = tar_directory(dir.path()).unwrap();
        let names = tar_entry_names(&bytes);

        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".env")));
        assert!(!names.iter().any(|n| n.starts_with("target")));
    }

    #[test]
    fn missing_dockerignore_includes_everything() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        fs::write(dir.path().join("app.py"), "print(1)").unwrap();

        let bytes = tar_directory(dir.path()).unwrap();
        let names = tar_entry_names(&bytes);

        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.contains(&"app.py".to_string()));
    }
}
