mod automation_router;
mod supervisor;
mod whatsapp;

use std::sync::Arc;

use axum::{Router, response::IntoResponse, routing::get};
use chatrelay_config::{BootConfig, LogFormat, discover_and_load};
use chatrelay_db::{Database, PgDatabase, connect};
use chatrelay_gateway::{
    Hub,
    inbound::{AutomationHook, InboundState, receive_webhook, verify_subscription},
    ws::{AvailabilityHook, WsState, upgrade},
};
use chatrelay_media::MediaStore;
use chatrelay_security::SafeHttpClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::automation_router::AutomationRouter;

/// Thin composition root: wires the HTTP/WS router, boots the database and
/// SSRF-safe HTTP client, and spawns the three background loops (campaign
/// supervisor, webhook delivery, media sweep). No REST CRUD surface lives
/// here, per `SPEC_FULL.md` §2 — this crate only composes the others.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = discover_and_load()?;
    init_tracing(&config);

    let pool = connect(&config.database_url).await?;
    let db: Arc<dyn Database> = Arc::new(PgDatabase::new(pool));
    let http = Arc::new(SafeHttpClient::new()?);
    let hub = Arc::new(Hub::new());
    let media = Arc::new(MediaStore::new(config.media_root.clone(), db.clone()));

    let router = Arc::new(AutomationRouter::new(db.clone(), http.clone(), hub.clone()));
    let automation: Arc<dyn AutomationHook> = router.clone();
    let availability: Arc<dyn AvailabilityHook> = router;

    let inbound_state = Arc::new(InboundState {
        db: db.clone(),
        hub: hub.clone(),
        verify_token: config.gateway_token_secret.clone(),
        automation: Some(automation),
    });
    let ws_state = Arc::new(WsState {
        hub: hub.clone(),
        token_secret: config.gateway_token_secret.clone(),
        availability: Some(availability),
    });

    let app = Router::new()
        .route("/webhooks/whatsapp", get(verify_subscription).post(receive_webhook))
        .with_state(inbound_state)
        .merge(Router::new().route("/ws", get(upgrade)).with_state(ws_state))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http());

    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    // Forwards campaign progress/completion events into the WS hub so
    // connected dashboards see them the same way inbound messages do.
    {
        let hub = hub.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                hub.dispatch(&event).await;
            }
        });
    }

    tokio::spawn(chatrelay_webhooks::run_delivery_loop(db.clone(), http.clone(), cancel.child_token()));
    tokio::spawn({
        let media = media.clone();
        let interval = std::time::Duration::from_secs(config.media_sweep_interval_secs);
        let cancel = cancel.child_token();
        async move { media.run_sweep_loop(interval, cancel).await }
    });
    tokio::spawn(crate::supervisor::run(db.clone(), http.clone(), event_tx, cancel.child_token()));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "chatrelay-server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({"status": "ok"}))
}

/// Waits for Ctrl+C, then cancels every background loop's token so they
/// finish their current batch and stop, mirroring the teacher's
/// spawn-a-shutdown-handler pattern in `crates/gateway/src/server.rs`.
async fn shutdown_signal(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("shutdown signal received, stopping background loops");
    cancel.cancel();
}

fn init_tracing(config: &BootConfig) {
    let filter = EnvFilter::try_new(config.log_level_or_default()).unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
