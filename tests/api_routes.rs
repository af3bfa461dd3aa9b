// Integration tests for the HTTP API, driving the router in-process.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use two_truths_backend::api;
use two_truths_backend::db::Database;
use two_truths_backend::lies::FallbackPool;
use two_truths_backend::session::{Persistence, SessionRegistry};
use two_truths_backend::store::SessionStore;

async fn test_app() -> Router {
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let registry = SessionRegistry::new(Persistence {
        store: SessionStore::new(db.clone()),
        db: Some(db.clone()),
    });
    api::router(registry, db, Arc::new(FallbackPool::builtin()))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn create_session(app: &Router) -> String {
    let (status, body) = send(app, "POST", "/api/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_new_session_starts_at_consent() {
    let app = test_app().await;
    let id = create_session(&app).await;

    let (status, body) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resume_target"], "consent");
    assert_eq!(body["consent_given"], false);
    assert!(body["round"].is_null());
}

#[tokio::test]
async fn test_gameplay_forbidden_without_consent() {
    let app = test_app().await;
    let id = create_session(&app).await;
    let base = format!("/api/sessions/{id}");

    let (status, body) = send(
        &app,
        "POST",
        &format!("{base}/lobby"),
        Some(json!({"num_players": 2, "num_rounds": 2, "round_length": 30})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["recovery"], "consent");

    let (status, _) = send(&app, "POST", &format!("{base}/round/start"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "POST", &format!("{base}/consent"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resume_target"], "lobby");
}

#[tokio::test]
async fn test_deleted_session_is_gone() {
    let app = test_app().await;
    let id = create_session(&app).await;
    let uri = format!("/api/sessions/{id}");

    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let app = test_app().await;
    let uri = format!("/api/sessions/{}", uuid::Uuid::new_v4());
    let (status, _) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_lobby_is_rejected_with_recovery() {
    let app = test_app().await;
    let id = create_session(&app).await;
    send(&app, "POST", &format!("/api/sessions/{id}/consent"), None).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/sessions/{id}/lobby"),
        Some(json!({"num_players": 4, "num_rounds": 2, "round_length": 30})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["recovery"], "lobby");
}

#[tokio::test]
async fn test_round_flow_over_http() {
    let app = test_app().await;
    let id = create_session(&app).await;
    let base = format!("/api/sessions/{id}");

    let (status, _) = send(&app, "POST", &format!("{base}/consent"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(
        &app,
        "POST",
        &format!("{base}/lobby"),
        Some(json!({"num_players": 2, "num_rounds": 2, "round_length": 30, "ai_model": "not-a-model"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["settings"]["ai_model"], "gpt-5-nano");
    assert_eq!(body["sets_per_player"], 1);

    let (status, _) = send(&app, "POST", &format!("{base}/rounds"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for player in 1..=2 {
        let (status, _) = send(
            &app,
            "PUT",
            &format!("{base}/players/{player}/truths"),
            Some(json!({"truth_sets": [{"truth1": "I own two kayaks", "truth2": "I was born in May"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, "GET", &format!("{base}/lie-request"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aiModel"], "gpt-5-nano");
    assert_eq!(body["players"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        "POST",
        &format!("{base}/rounds"),
        Some(json!({"lies": {"1": ["I have met the queen"], "2": ["I can fly a plane"]}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_rounds"], 2);

    let (status, round) = send(&app, "POST", &format!("{base}/round/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(round["statements"].as_array().unwrap().len(), 3);
    assert!(round["results"].is_null());

    let chameleon = round["chameleon_id"].as_u64().unwrap();
    let guesser = if chameleon == 1 { 2 } else { 1 };
    let (status, body) = send(
        &app,
        "POST",
        &format!("{base}/round/votes"),
        Some(json!({"player_id": guesser, "statement_index": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "vote_recorded");

    let (status, body) = send(
        &app,
        "POST",
        &format!("{base}/round/votes"),
        Some(json!({"player_id": guesser, "statement_index": 9})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["recovery"], "lobby");

    let (status, body) = send(&app, "POST", &format!("{base}/round/end-early"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["recovery"], "round");

    let (status, body) = send(
        &app,
        "POST",
        &format!("{base}/round/end-early"),
        Some(json!({"confirm": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["events"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["type"] == "revealed"));

    let (status, board) = send(&app, "GET", &format!("{base}/round/leaderboard"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["round_number"], 1);

    let (status, results) = send(&app, "GET", &format!("{base}/results"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results.as_array().unwrap().len(), 1);

    let (status, body) = send(&app, "POST", &format!("{base}/round/next"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_round"], 1);
    assert_eq!(body["resume_target"], "round");

    // The second round is not revealed yet.
    let (status, _) = send(&app, "POST", &format!("{base}/round/next"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_truth_drafts_round_trip() {
    let app = test_app().await;
    let id = create_session(&app).await;
    let uri = format!("/api/sessions/{id}/truth-drafts");

    let (status, _) = send(
        &app,
        "PUT",
        &uri,
        Some(json!({"drafts": {"1": [{"set_number": 1, "truth1": "half", "truth2": ""}]}, "current_player": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_player"], 1);
    assert_eq!(body["drafts"]["1"][0]["truth1"], "half");
}

#[tokio::test]
async fn test_app_settings_are_clamped() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/api/settings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["theme"], "theme-default");

    let (status, body) = send(
        &app,
        "PUT",
        "/api/settings",
        Some(json!({"theme": "theme-ocean", "master_volume": 3.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["master_volume"], 1.0);

    let (_, body) = send(&app, "GET", "/api/settings", None).await;
    assert_eq!(body["theme"], "theme-ocean");
}

#[tokio::test]
async fn test_missing_archive_is_404() {
    let app = test_app().await;
    let (status, _) = send(&app, "GET", "/api/archives/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
