//! Siren scoring-backend client: reqwest-backed HTTP client for every
//! endpoint in the external-interfaces design. Non-200 responses are logged
//! and surfaced as `BackendError`; callers decide whether that's fatal to
//! the current operation (it never is, per the error-handling design).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BackendError;
use crate::model::{Endpoint, Problem, Team};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SirenClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateExploitBody<'a> {
    name: &'a str,
    key: &'a str,
    #[serde(rename = "problemId")]
    problem_id: i64,
    enabled: bool,
}

#[derive(Serialize)]
struct DeleteExploitBody<'a> {
    name: &'a str,
    #[serde(rename = "problemId")]
    problem_id: i64,
}

#[derive(Serialize)]
struct EndpointRequestBody {
    #[serde(rename = "teamId")]
    team_id: i64,
    #[serde(rename = "problemId")]
    problem_id: i64,
}

#[derive(Serialize)]
struct CreateTaskBody<'a> {
    #[serde(rename = "roundId")]
    round_id: i64,
    #[serde(rename = "exploitKey")]
    exploit_key: &'a str,
    #[serde(rename = "teamId")]
    team_id: i64,
}

#[derive(Deserialize)]
struct CreateTaskResponse {
    id: i64,
}

#[derive(Serialize)]
struct TaskStatusBody<'a> {
    status: &'a str,
    stdout: &'a str,
    stderr: &'a str,
    #[serde(rename = "statusMessage", skip_serializing_if = "Option::is_none")]
    status_message: Option<&'a str>,
}

#[derive(Serialize)]
struct FlagBody<'a> {
    #[serde(rename = "taskId")]
    task_id: i64,
    flag: &'a str,
    #[serde(rename = "submissionResult")]
    submission_result: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
struct CurrentRoundResponse {
    round: i64,
}

impl SirenClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build().expect("reqwest client"),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check_status(&self, endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if !response.status().is_success() {
            let status = response.status();
            warn!(endpoint, %status, "siren returned non-200");
            return Err(BackendError::new(endpoint, format!("status {status}")));
        }
        Ok(response)
    }

    pub async fn teams(&self) -> Result<Vec<Team>, BackendError> {
        let resp = self
            .client
            .get(self.url("/api/teams"))
            .send()
            .await
            .map_err(|e| BackendError::new("/api/teams", e.to_string()))?;
        let resp = self.check_status("/api/teams", resp).await?;
        resp.json().await.map_err(|e| BackendError::new("/api/teams", e.to_string()))
    }

    pub async fn problems(&self) -> Result<Vec<Problem>, BackendError> {
        let resp = self
            .client
            .get(self.url("/api/problems"))
            .send()
            .await
            .map_err(|e| BackendError::new("/api/problems", e.to_string()))?;
        let resp = self.check_status("/api/problems", resp).await?;
        resp.json().await.map_err(|e| BackendError::new("/api/problems", e.to_string()))
    }

    pub async fn current_round(&self) -> Result<i64, BackendError> {
        let resp = self
            .client
            .get(self.url("/api/current_round"))
            .send()
            .await
            .map_err(|e| BackendError::new("/api/current_round", e.to_string()))?;
        let resp = self.check_status("/api/current_round", resp).await?;
        let body: CurrentRoundResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::new("/api/current_round", e.to_string()))?;
        Ok(body.round)
    }

    pub async fn create_exploit(&self, name: &str, key: &str, problem_id: i64, enabled: bool) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.url("/api/exploits"))
            .json(&CreateExploitBody { name, key, problem_id, enabled })
            .send()
            .await
            .map_err(|e| BackendError::new("/api/exploits", e.to_string()))?;
        self.check_status("/api/exploits", resp).await?;
        Ok(())
    }

    pub async fn delete_exploit(&self, name: &str, problem_id: i64) -> Result<(), BackendError> {
        let resp = self
            .client
            .delete(self.url("/api/exploits"))
            .json(&DeleteExploitBody { name, problem_id })
            .send()
            .await
            .map_err(|e| BackendError::new("/api/exploits", e.to_string()))?;
        self.check_status("/api/exploits", resp).await?;
        Ok(())
    }

    pub async fn endpoint(&self, team_id: i64, problem_id: i64) -> Result<Endpoint, BackendError> {
        let resp = self
            .client
            .post(self.url("/api/endpoint"))
            .json(&EndpointRequestBody { team_id, problem_id })
            .send()
            .await
            .map_err(|e| BackendError::new("/api/endpoint", e.to_string()))?;
        let resp = self.check_status("/api/endpoint", resp).await?;
        resp.json().await.map_err(|e| BackendError::new("/api/endpoint", e.to_string()))
    }

    pub async fn create_task(&self, round_id: i64, exploit_key: &str, team_id: i64) -> Result<i64, BackendError> {
        let resp = self
            .client
            .post(self.url("/api/tasks"))
            .json(&CreateTaskBody { round_id, exploit_key, team_id })
            .send()
            .await
            .map_err(|e| BackendError::new("/api/tasks", e.to_string()))?;
        let resp = self.check_status("/api/tasks", resp).await?;
        let body: CreateTaskResponse = resp.json().await.map_err(|e| BackendError::new("/api/tasks", e.to_string()))?;
        Ok(body.id)
    }

    pub async fn update_task_status(
        &self,
        task_id: i64,
        status: &str,
        stdout: &str,
        stderr: &str,
        status_message: Option<&str>,
    ) -> Result<(), BackendError> {
        let endpoint = format!("/api/tasks/{task_id}");
        let resp = self
            .client
            .put(self.url(&endpoint))
            .json(&TaskStatusBody { status, stdout, stderr, status_message })
            .send()
            .await
            .map_err(|e| BackendError::new(endpoint.clone(), e.to_string()))?;
        self.check_status(&endpoint, resp).await?;
        Ok(())
    }

    pub async fn submit_flag_record(
        &self,
        task_id: i64,
        flag: &str,
        submission_result: &str,
        message: &str,
    ) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.url("/api/flags"))
            .json(&FlagBody { task_id, flag, submission_result, message })
            .send()
            .await
            .map_err(|e| BackendError::new("/api/flags", e.to_string()))?;
        self.check_status("/api/flags", resp).await?;
        Ok(())
    }
}
