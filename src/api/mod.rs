// HTTP API routes (sessions, rounds, settings, archives).

pub mod ws;

use axum::{
    body::{Body, Bytes},
    extract::{Json, Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::db::Database;
use crate::engine::model::{PlayerId, TruthSet};
use crate::engine::progression::LobbySettings;
use crate::error::{GameError, SessionError};
use crate::lies::FallbackPool;
use crate::metrics;
use crate::replay;
use crate::session::{now_ms, SessionHandle, SessionRegistry};
use crate::store::{AppSettings, TruthDrafts};

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct UpdatePlayerRequest {
    pub name: Option<String>,
    pub icon: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitTruthsRequest {
    pub truth_sets: Vec<TruthSet>,
}

#[derive(Deserialize)]
pub struct TruthDraftsRequest {
    pub drafts: TruthDrafts,
    #[serde(default)]
    pub current_player: usize,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub player_id: PlayerId,
    pub statement_index: usize,
}

#[derive(Deserialize)]
pub struct EndEarlyRequest {
    #[serde(default)]
    pub confirm: bool,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub db: Arc<Database>,
    pub fallback: Arc<FallbackPool>,
}

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

/// Error body carrying the screen a client should fall back to.
fn session_error(e: SessionError) -> Response {
    let status = match &e {
        SessionError::Game(game) => match game {
            GameError::InvalidSettings(_)
            | GameError::InvalidVote { .. }
            | GameError::UnknownPlayer(_)
            | GameError::ConfirmationRequired
            | GameError::TruthsIncomplete => StatusCode::BAD_REQUEST,
            GameError::RoundFrozen
            | GameError::NoActiveRound
            | GameError::RoundInProgress
            | GameError::GameOver => StatusCode::CONFLICT,
            GameError::MissingLie
            | GameError::MissingChameleon(_)
            | GameError::MalformedRound { .. }
            | GameError::NoRoundsBuilt => StatusCode::UNPROCESSABLE_ENTITY,
            GameError::ConsentRequired => StatusCode::FORBIDDEN,
        },
        SessionError::Lies(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Store(err) => {
            tracing::error!("Store error: {err}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                .into_response();
        }
    };
    (
        status,
        Json(json!({ "error": e.to_string(), "recovery": e.recovery() })),
    )
        .into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!("Database error: {e}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

fn respond<T: Serialize>(result: Result<T, SessionError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => session_error(e),
    }
}

async fn load_session(state: &AppState, id: Uuid) -> Result<SessionHandle, Response> {
    match state.registry.get(id).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(json_error(StatusCode::NOT_FOUND, "Session not found").into_response()),
        Err(e) => Err(session_error(e)),
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(registry: SessionRegistry, db: Arc<Database>, fallback: Arc<FallbackPool>) -> Router {
    let state = AppState {
        registry,
        db,
        fallback,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Sessions
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/consent", post(give_consent))
        .route("/api/sessions/{id}/lobby", post(configure_lobby))
        .route("/api/sessions/{id}/reset", post(reset_session))
        // Players and truths
        .route("/api/sessions/{id}/players/{player_id}", put(update_player))
        .route(
            "/api/sessions/{id}/players/{player_id}/truths",
            put(submit_truths),
        )
        .route(
            "/api/sessions/{id}/truth-drafts",
            get(get_truth_drafts).put(save_truth_drafts),
        )
        // Lies and rounds
        .route("/api/sessions/{id}/lie-request", get(lie_request))
        .route("/api/sessions/{id}/rounds", post(generate_rounds))
        .route("/api/sessions/{id}/round/start", post(start_round))
        .route("/api/sessions/{id}/round/votes", post(submit_vote))
        .route("/api/sessions/{id}/round/end-early", post(end_early))
        .route("/api/sessions/{id}/round/next", post(next_round))
        .route("/api/sessions/{id}/round/leaderboard", get(round_leaderboard))
        // Results
        .route("/api/sessions/{id}/stats", get(game_stats))
        .route("/api/sessions/{id}/leaderboard", get(final_leaderboard))
        .route("/api/sessions/{id}/results", get(round_results))
        .route("/api/sessions/{id}/archives", get(list_archives))
        .route("/api/archives/{id}", get(get_archive))
        // App settings
        .route("/api/settings", get(get_settings).put(save_settings))
        // WebSocket
        .route("/ws/sessions/{id}", get(ws::ws_session))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = metrics::normalize_path(req.uri().path());
    let start = Instant::now();

    let response = next.run(req).await;

    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), endpoint.as_str(), response.status().as_str()])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint.as_str()])
        .observe(start.elapsed().as_secs_f64());
    response
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "two-truths-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

// ── Session handlers ──────────────────────────────────────────────────

async fn create_session(State(state): State<AppState>) -> Response {
    match state.registry.create().await {
        Ok(session) => (StatusCode::CREATED, Json(session.view().await)).into_response(),
        Err(e) => session_error(e),
    }
}

async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => (StatusCode::OK, Json(session.view().await)).into_response(),
        Err(r) => r,
    }
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.registry.delete(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "Session not found").into_response(),
        Err(e) => session_error(e),
    }
}

async fn give_consent(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.give_consent().await),
        Err(r) => r,
    }
}

async fn configure_lobby(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(settings): Json<LobbySettings>,
) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.configure_lobby(settings).await),
        Err(r) => r,
    }
}

async fn reset_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.reset().await),
        Err(r) => r,
    }
}

// ── Player handlers ───────────────────────────────────────────────────

async fn update_player(
    State(state): State<AppState>,
    Path((id, player_id)): Path<(Uuid, PlayerId)>,
    Json(req): Json<UpdatePlayerRequest>,
) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.update_player(player_id, req.name, req.icon).await),
        Err(r) => r,
    }
}

async fn submit_truths(
    State(state): State<AppState>,
    Path((id, player_id)): Path<(Uuid, PlayerId)>,
    Json(req): Json<SubmitTruthsRequest>,
) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.submit_truths(player_id, req.truth_sets).await),
        Err(r) => r,
    }
}

async fn get_truth_drafts(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.truth_drafts().await),
        Err(r) => r,
    }
}

async fn save_truth_drafts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TruthDraftsRequest>,
) -> Response {
    let session = match load_session(&state, id).await {
        Ok(session) => session,
        Err(r) => return r,
    };
    match session.save_truth_drafts(req.drafts, req.current_player).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => session_error(e),
    }
}

// ── Round handlers ────────────────────────────────────────────────────

async fn lie_request(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.lie_request().await),
        Err(r) => r,
    }
}

/// Body is the relay's response, if the client got one. Empty means use the pool.
async fn generate_rounds(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let session = match load_session(&state, id).await {
        Ok(session) => session,
        Err(r) => return r,
    };
    let relay_response: Option<Value> = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                return json_error(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {e}"))
                    .into_response()
            }
        }
    };
    match session
        .generate_rounds(relay_response.as_ref(), &state.fallback)
        .await
    {
        Ok(total_rounds) => {
            (StatusCode::OK, Json(json!({ "total_rounds": total_rounds }))).into_response()
        }
        Err(e) => session_error(e),
    }
}

async fn start_round(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.start_round(now_ms()).await),
        Err(r) => r,
    }
}

async fn submit_vote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<VoteRequest>,
) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(
            session
                .submit_vote(req.player_id, req.statement_index, now_ms())
                .await,
        ),
        Err(r) => r,
    }
}

async fn end_early(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EndEarlyRequest>,
) -> Response {
    let session = match load_session(&state, id).await {
        Ok(session) => session,
        Err(r) => return r,
    };
    match session.end_early(req.confirm, now_ms()).await {
        Ok(events) => (StatusCode::OK, Json(json!({ "events": events }))).into_response(),
        Err(e) => session_error(e),
    }
}

async fn next_round(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.next_round().await),
        Err(r) => r,
    }
}

async fn round_leaderboard(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => respond(session.round_leaderboard().await),
        Err(r) => r,
    }
}

// ── Result handlers ───────────────────────────────────────────────────

async fn game_stats(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => (StatusCode::OK, Json(session.stats().await)).into_response(),
        Err(r) => r,
    }
}

async fn final_leaderboard(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match load_session(&state, id).await {
        Ok(session) => (StatusCode::OK, Json(session.final_leaderboard().await)).into_response(),
        Err(r) => r,
    }
}

async fn round_results(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let rows = match state.db.list_round_results(id).await {
        Ok(rows) => rows,
        Err(e) => return internal_error(e),
    };
    let mut results = Vec::with_capacity(rows.len());
    for row in &rows {
        match row.parsed() {
            Ok(parsed) => results.push(json!({
                "round_index": row.round_index,
                "chameleon_id": row.chameleon_id,
                "reveal_trigger": row.reveal_trigger,
                "results": parsed,
            })),
            Err(e) => tracing::warn!(session = %id, round = row.round_index, "Skipping unreadable result: {e}"),
        }
    }
    (StatusCode::OK, Json(json!(results))).into_response()
}

async fn list_archives(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.db.list_archives(id).await {
        Ok(archives) => (StatusCode::OK, Json(json!(archives))).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn get_archive(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let row = match state.db.get_archive(id).await {
        Ok(Some(row)) => row,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Archive not found").into_response(),
        Err(e) => return internal_error(e),
    };
    match replay::read_archive(&row.data) {
        Ok(archive) => (StatusCode::OK, Json(json!(archive))).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Settings handlers ─────────────────────────────────────────────────

async fn get_settings(State(state): State<AppState>) -> Response {
    match state.registry.persistence().store.load_app_settings().await {
        Ok(settings) => (StatusCode::OK, Json(settings)).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn save_settings(
    State(state): State<AppState>,
    Json(settings): Json<AppSettings>,
) -> Response {
    let settings = settings.normalized();
    match state
        .registry
        .persistence()
        .store
        .save_app_settings(&settings)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(settings)).into_response(),
        Err(e) => internal_error(e),
    }
}
