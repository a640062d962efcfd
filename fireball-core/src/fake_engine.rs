//! In-memory container engine, for exercising the scheduler/reconciler
//! without a real docker daemon. The engine is an external mutable
//! substrate; unit tests need a fake to drive it through its lifecycle
//! deterministically.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::engine::ContainerEngine;
use crate::error::EngineError;
use crate::model::{ContainerInspect, ContainerState};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub state: ContainerState,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
    pub stdout: String,
    pub stderr: String,
    pub archive: HashMap<String, Vec<u8>>,
}

impl Default for FakeContainer {
    fn default() -> Self {
        Self {
            state: ContainerState::Created,
            exit_code: None,
            started_at: None,
            labels: HashMap::new(),
            stdout: String::new(),
            stderr: String::new(),
            archive: HashMap::new(),
        }
    }
}

#[derive(Default)]
pub struct FakeEngine {
    containers: Mutex<HashMap<String, FakeContainer>>,
    next_id: Mutex<u64>,
    pub now: Mutex<Option<DateTime<Utc>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("fake-container-{}", *next)
    }

    /// Directly seed a container in a given state, bypassing create/start.
    pub fn seed(&self, id: &str, container: FakeContainer) {
        self.containers.lock().unwrap().insert(id.to_string(), container);
    }

    pub fn set_state(&self, id: &str, state: ContainerState) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.state = state;
        }
    }

    pub fn set_exit_code(&self, id: &str, code: i64) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.exit_code = Some(code);
        }
    }

    pub fn put_archive_file(&self, id: &str, path: &str, contents: Vec<u8>) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.archive.insert(path.to_string(), contents);
        }
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    pub fn running_count(&self) -> usize {
        self.containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.state == ContainerState::Running)
            .count()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn build_image(&self, _dir: &std::path::Path) -> Result<String, EngineError> {
        Ok("sha256:fake-image".to_string())
    }

    async fn create_container(
        &self,
        _image_id: &str,
        _env: &HashMap<String, String>,
        labels: &HashMap<String, String>,
    ) -> Result<String, EngineError> {
        let id = self.alloc_id();
        let mut all_labels = labels.clone();
        all_labels.insert(crate::model::labels::MANAGED.to_string(), "true".to_string());
        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                labels: all_labels,
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), EngineError> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| EngineError::new("start_container", "no such container"))?;
        container.state = ContainerState::Running;
        container.started_at = Some(self.now.lock().unwrap().unwrap_or_else(Utc::now));
        Ok(())
    }

    async fn delete_container(&self, container_id: &str, _force: bool) -> Result<(), EngineError> {
        self.containers.lock().unwrap().remove(container_id);
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerInspect, EngineError> {
        let containers = self.containers.lock().unwrap();
        let c = containers
            .get(container_id)
            .ok_or_else(|| EngineError::new("inspect_container", "no such container"))?;
        Ok(ContainerInspect {
            id: container_id.to_string(),
            state: c.state,
            exit_code: c.exit_code,
            started_at: c.started_at,
            labels: c.labels.clone(),
        })
    }

    async fn container_logs(&self, container_id: &str) -> Result<(String, String), EngineError> {
        let containers = self.containers.lock().unwrap();
        let c = containers
            .get(container_id)
            .ok_or_else(|| EngineError::new("container_logs", "no such container"))?;
        Ok((c.stdout.clone(), c.stderr.clone()))
    }

    async fn read_archive_path(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        let containers = self.containers.lock().unwrap();
        let c = containers
            .get(container_id)
            .ok_or_else(|| EngineError::new("read_archive_path", "no such container"))?;
        Ok(c.archive.get(path).cloned())
    }

    async fn list_managed_containers(&self) -> Result<Vec<ContainerInspect>, EngineError> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|(_, c)| c.labels.get(crate::model::labels::MANAGED).map(String::as_str) == Some("true"))
            .map(|(id, c)| ContainerInspect {
                id: id.clone(),
                state: c.state,
                exit_code: c.exit_code,
                started_at: c.started_at,
                labels: c.labels.clone(),
            })
            .collect())
    }
}
