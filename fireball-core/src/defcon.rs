//! Defcon game-API client: submits recovered flags to the organizer-run
//! upstream endpoint. `game_api_url = None` disables submission entirely,
//! matching the original's `DefconAPI` behavior when its `api_url` is unset.

use std::time::Duration;

use serde::Deserialize;
use tracing::error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct SubmitFlagResponse {
    pub message: String,
}

pub struct DefconClient {
    client: reqwest::Client,
    api_url: Option<String>,
}

impl DefconClient {
    pub fn new(api_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build().expect("reqwest client"),
            api_url,
        }
    }

    /// Submit a flag. `Ok(None)` means submissions are disabled or the call
    /// failed — in both cases the caller treats it as "no recording", per
    /// the outcome-gateway design.
    pub async fn submit_flag(&self, flag: &str) -> Option<SubmitFlagResponse> {
        let Some(api_url) = &self.api_url else {
            error!("failed to submit flag, defcon url is not defined");
            return None;
        };

        let url = format!("{api_url}/api/submit_flag/{flag}");
        match self.client.post(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<SubmitFlagResponse>().await {
                Ok(body) => Some(body),
                Err(e) => {
                    error!(error = %e, "failed to decode defcon response");
                    None
                }
            },
            Ok(resp) => {
                error!(status = %resp.status(), "defcon returned non-200");
                None
            }
            Err(e) => {
                error!(error = %e, "failed to submit flag to defcon");
                None
            }
        }
    }
}
