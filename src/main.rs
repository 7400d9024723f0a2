use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use castcoord::{build_state, handlers, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("{},tower_http=info", config.log_level)),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = build_state(config.clone()).await?;

    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<axum::http::HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/rooms", post(handlers::rooms::create_room))
        .route("/api/rooms", get(handlers::rooms::list_rooms))
        .route("/api/rooms/by-token/:token", get(handlers::rooms::get_room_by_token))
        .route("/api/rooms/:id", get(handlers::rooms::get_room))
        .route("/api/rooms/:id", delete(handlers::rooms::delete_room))
        .route("/api/rooms/:id/state", patch(handlers::rooms::patch_room_state))
        .route(
            "/api/rooms/:id/recordings",
            get(handlers::rooms::list_room_recordings),
        )
        .route("/api/recordings", post(handlers::recordings::create_recording))
        .route("/api/recordings/:id", get(handlers::recordings::get_recording))
        .route(
            "/api/recordings/:id/state",
            patch(handlers::recordings::patch_recording_state),
        )
        .route(
            "/api/recordings/:id/metadata",
            patch(handlers::recordings::patch_recording_metadata),
        )
        .route(
            "/api/recordings/:id/init-segment",
            post(handlers::recordings::post_init_segment),
        )
        .route("/api/recordings/:id/chunks", post(handlers::recordings::post_chunk))
        .route(
            "/api/recordings/:id/upload-url/init-segment",
            get(handlers::recordings::get_upload_url_init_segment),
        )
        .route(
            "/api/recordings/:id/upload-url/chunk",
            get(handlers::recordings::get_upload_url_chunk),
        )
        .route(
            "/api/recordings/:id/upload-confirm",
            post(handlers::recordings::post_upload_confirm),
        )
        .route(
            "/api/recordings/:id/download-urls",
            get(handlers::recordings::get_download_urls),
        )
        .route("/api/recordings/:id/download", get(handlers::recordings::get_download))
        .route("/ws", get(handlers::ws::ws_handler))
        .layer(DefaultBodyLimit::max(config.max_request_body_bytes()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    tracing::info!(addr = %addr, "starting castcoord server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
