//! Admin HTTP surface. Every trigger endpoint acknowledges immediately and
//! runs the actual work in a background task — the caller never waits on a
//! scan, tick, or exploit run to finish.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use fireball_core::state::AppContext;
use fireball_core::{scheduler, FireballError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health_check", get(health_check))
        .route("/refresh", post(refresh))
        .route("/tick", post(tick))
        .route("/scan", post(scan))
        .route("/exec", get(exec))
        .with_state(ctx)
}

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
}

async fn health_check() -> Json<StatusBody> {
    Json(StatusBody { status: "ok" })
}

async fn refresh(State(ctx): State<Arc<AppContext>>) -> Json<StatusBody> {
    ctx.refresh().await;
    Json(StatusBody { status: "ok" })
}

#[derive(Deserialize)]
struct TickQuery {
    round_id: i64,
}

async fn tick(State(ctx): State<Arc<AppContext>>, Query(query): Query<TickQuery>) -> impl IntoResponse {
    tokio::spawn(async move {
        let mut state = ctx.state.lock().await;
        scheduler::game_tick(&ctx, &mut state, query.round_id).await;
    });
    (StatusCode::OK, Json(StatusBody { status: "ok" }))
}

async fn scan(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    tokio::spawn(async move {
        if let Err(e) = run_scan(&ctx).await {
            error!(error = %e, "repo scan failed");
        }
    });
    (StatusCode::OK, Json(StatusBody { status: "ok" }))
}

async fn run_scan(ctx: &AppContext) -> Result<(), FireballError> {
    let scan_result = {
        let mut repo = ctx.repo.lock().await;
        repo.scan()?
    };

    let Some(scan_result) = scan_result else {
        info!("scan found no new commits");
        return Ok(());
    };

    let mut state = ctx.state.lock().await;

    for dir in &scan_result.updated {
        match fireball_core::loader::from_path(
            ctx.engine.as_ref(),
            &ctx.repo_root,
            &dir.rel_path(),
            &dir.exploit_name,
            &dir.challenge_name,
        )
        .await
        {
            Ok(exploit) => {
                let problem_id = state.problem_for_challenge(&dir.challenge_name).map(|p| p.id).unwrap_or_default();
                state.catalog.update(exploit, &ctx.siren, problem_id).await;
            }
            Err(e) => error!(challenge = %dir.challenge_name, exploit = %dir.exploit_name, error = %e, "skipping exploit directory on scan"),
        }
    }

    for dir in &scan_result.removed {
        let exploit_id = fireball_core::model::Exploit::make_id(&dir.challenge_name, &dir.exploit_name);
        let problem_id = state.problem_for_challenge(&dir.challenge_name).map(|p| p.id).unwrap_or_default();
        state.catalog.remove(&exploit_id, &ctx.siren, problem_id).await;
    }

    info!(new_hash = %scan_result.new_hash, "repo scan complete");
    Ok(())
}

#[derive(Deserialize)]
struct ExecQuery {
    exploit_id: String,
}

async fn exec(State(ctx): State<Arc<AppContext>>, Query(query): Query<ExecQuery>) -> impl IntoResponse {
    tokio::spawn(async move {
        let mut state = ctx.state.lock().await;
        scheduler::start_exploit(&ctx, &mut state, &query.exploit_id).await;
    });
    (StatusCode::OK, Json(StatusBody { status: "ok" }))
}
