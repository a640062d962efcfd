//! Outcome gateway (C7): the single entry point that records a task's
//! terminal result to the scoring backend and, for non-self flags, to the
//! upstream game API — with a fixed response normalization so the scoring
//! backend never sees the game API's raw vocabulary.

use tracing::{error, info};

use crate::defcon::DefconClient;
use crate::siren::SirenClient;

/// `submit_flag` never propagates an error: a failed submission is recorded
/// as best it can be and the reconciler moves on, per the error-handling
/// design (`BackendError` is always non-fatal).
pub async fn submit_flag(
    siren: &SirenClient,
    defcon: &DefconClient,
    task_id: i64,
    flag: &str,
    team_slug: &str,
    current_team_slug: &str,
) -> bool {
    if team_slug == current_team_slug {
        info!(task_id, "flag belongs to our own team, skipping upstream submission");
        if let Err(e) = siren.submit_flag_record(task_id, flag, "SKIPPED", "").await {
            error!(task_id, error = %e, "failed to record skipped flag");
        }
        return true;
    }

    let Some(response) = defcon.submit_flag(flag).await else {
        return false;
    };

    let (submission_result, additional_info) = normalize(&response.message);

    if let Err(e) = siren
        .submit_flag_record(task_id, flag, &submission_result, &additional_info)
        .await
    {
        error!(task_id, error = %e, "failed to record flag submission");
    }

    true
}

/// Maps the game API's raw `message` vocabulary onto the scoring backend's.
/// Anything unrecognized passes through unchanged.
fn normalize(message: &str) -> (String, String) {
    match message {
        "ALREADY_SUBMITTED" => ("DUPLICATE".to_string(), String::new()),
        "INCORRECT" => ("WRONG".to_string(), String::new()),
        "SERVICE_INACTIVE" => ("UNKNOWN_ERROR".to_string(), "Service is inactive".to_string()),
        other => (other.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_submitted_normalizes_to_duplicate() {
        assert_eq!(normalize("ALREADY_SUBMITTED"), ("DUPLICATE".to_string(), String::new()));
    }

    #[test]
    fn incorrect_normalizes_to_wrong() {
        assert_eq!(normalize("INCORRECT"), ("WRONG".to_string(), String::new()));
    }

    /// S6 — flag normalization.
    #[test]
    fn service_inactive_normalizes_with_additional_info() {
        assert_eq!(
            normalize("SERVICE_INACTIVE"),
            ("UNKNOWN_ERROR".to_string(), "Service is inactive".to_string())
        );
    }

    #[test]
    fn unknown_message_passes_through() {
        assert_eq!(normalize("CORRECT"), ("CORRECT".to_string(), String::new()));
    }
}
