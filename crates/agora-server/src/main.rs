use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use agora_api::middleware::require_auth;
use agora_api::state::{AppState, AppStateInner};
use agora_api::{chat, notifications};
use agora_gateway::connection;
use agora_gateway::registry::Registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = agora_api::middleware::jwt_secret();
    let db_path = std::env::var("AGORA_DB_PATH").unwrap_or_else(|_| "agora.db".into());
    let host = std::env::var("AGORA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("AGORA_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = agora_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let registry = Registry::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        registry,
        jwt_secret,
    });

    // Routes
    let notification_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/unread-count", get(notifications::get_unread_count))
        .route(
            "/settings",
            get(notifications::get_settings).put(notifications::update_settings),
        )
        .route("/read-all", put(notifications::mark_all_read))
        .route("/read-chat-room/{room_id}", put(notifications::mark_room_read))
        .route("/clear-all", delete(notifications::clear_all))
        .route("/{id}/read", put(notifications::mark_read))
        .route("/{id}", delete(notifications::delete_notification));

    let chat_routes = Router::new()
        .route("/search", get(chat::search_users))
        .route("/rooms", get(chat::list_rooms))
        .route("/room", post(chat::create_room))
        .route("/messages/{room_id}", get(chat::get_messages))
        .route("/message", post(chat::send_message))
        .route("/status", post(chat::update_status));

    let api_routes = Router::new()
        .nest("/api/notifications", notification_routes)
        .nest("/api/chat", chat_routes)
        .layer(middleware::from_fn(require_auth))
        .with_state(state.clone());

    let ws_route = Router::new().route("/chat", get(ws_upgrade)).with_state(state);

    let app = Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Agora server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Connections authenticate in-band with an `auth` frame, so the upgrade
/// itself is open; the deadline in the connection loop bounds how long an
/// unauthenticated socket may linger.
async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_socket(
            socket,
            state.registry.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
