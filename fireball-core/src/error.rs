//! Error taxonomy for the orchestrator, per the error-handling design.
//!
//! Each variant maps onto one of the named failure classes: a repo scan that
//! aborts, a single exploit directory that fails to parse (and is skipped),
//! a container-engine call that fails for one task, a non-200 from a backend
//! API, or a dangling managed container whose labels don't round-trip.

use thiserror::Error;

/// `git` command failed during a repo scan. Aborts the current scan.
#[derive(Error, Debug)]
#[error("repo scan failed: {message}\nstdout:\n{stdout}\nstderr:\n{stderr}")]
pub struct RepoScanError {
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

impl RepoScanError {
    pub fn new(message: impl Into<String>, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// An exploit directory's manifest is missing or its image build failed.
/// Non-fatal: the loader's caller logs and skips the directory.
#[derive(Error, Debug)]
pub enum ExploitParseError {
    #[error("manifest not found at {path}")]
    MissingManifest { path: String },
    #[error("invalid manifest at {path}: {message}")]
    InvalidManifest { path: String, message: String },
    #[error("image build failed for {path}: {message}")]
    BuildFailed { path: String, message: String },
}

/// Container-engine operation failed (create/start/delete/inspect/logs/archive).
#[derive(Error, Debug)]
#[error("engine error during {operation}: {message}")]
pub struct EngineError {
    pub operation: String,
    pub message: String,
}

impl EngineError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Non-200 response (or transport failure) from the Siren/Defcon backends.
/// Always non-fatal: logged, the next reconciliation heals state.
#[derive(Error, Debug)]
#[error("backend error calling {endpoint}: {message}")]
pub struct BackendError {
    pub endpoint: String,
    pub message: String,
}

impl BackendError {
    pub fn new(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

/// A managed container's labels are missing or malformed — it cannot be
/// reconstructed into a task.
#[derive(Error, Debug)]
#[error("dangling container {container_id}: {reason}")]
pub struct LabelError {
    pub container_id: String,
    pub reason: String,
}

/// Umbrella error for call sites that can fail in more than one of the above
/// ways (e.g. a scan step that both shells out to git and talks to Siren).
#[derive(Error, Debug)]
pub enum FireballError {
    #[error(transparent)]
    RepoScan(#[from] RepoScanError),
    #[error(transparent)]
    ExploitParse(#[from] ExploitParseError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
