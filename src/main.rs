use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parley::llm::{Inference, OllamaClient, OllamaConfig};
use parley::state::{AppState, ChatConfig};
use parley::{api, users, ws};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting parley...");

    let chat_config = ChatConfig::from_env();
    tracing::info!("Chat mode: {:?}", chat_config.mode);

    let llm: Arc<dyn Inference> = Arc::new(OllamaClient::new(OllamaConfig::from_env()));
    if llm.is_available().await {
        tracing::info!("Inference backend reachable, using model {}", llm.model());
    } else {
        tracing::warn!(
            "Inference backend unreachable; assistant replies will degrade to fallback text"
        );
    }

    let state = Arc::new(AppState::new(chat_config, llm));

    let app = Router::new()
        .route("/", get(api::root))
        .route("/api/chat", get(ws::chat_handler))
        .route("/api/status", get(api::status))
        .route("/api/users", post(users::create_user_handler))
        .route("/api/users/{id}", get(users::get_user_handler))
        .route("/api/login", post(users::login_handler))
        .route("/api/me", get(users::me_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
