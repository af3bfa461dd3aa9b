use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use two_truths_backend::api;
use two_truths_backend::config::Config;
use two_truths_backend::db::Database;
use two_truths_backend::lies::FallbackPool;
use two_truths_backend::metrics;
use two_truths_backend::session::{Persistence, SessionRegistry};
use two_truths_backend::store::SessionStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    let fallback = match &config.fallback_lies_path {
        Some(path) => FallbackPool::load(path).unwrap_or_else(|e| {
            tracing::warn!("Using built-in lies: {e}");
            FallbackPool::builtin()
        }),
        None => FallbackPool::builtin(),
    };
    tracing::info!(lies = fallback.len(), "Fallback lie pool ready");

    let registry = SessionRegistry::new(Persistence {
        store: SessionStore::new(db.clone()),
        db: Some(db.clone()),
    });

    let mut app = api::router(registry, db, Arc::new(fallback));

    // Serve a pre-built client, falling back to index.html for client-side routes.
    if let Some(dir) = &config.static_dir {
        let index = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(dir).not_found_service(ServeFile::new(index)));
        tracing::info!("Serving static files from {}", dir.display());
    }

    let app = app.layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Two Truths backend listening on {addr}");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
