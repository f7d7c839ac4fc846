mod config;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ember_api::{AppState, AppStateInner};
use ember_db::Database;
use ember_gateway::Relay;
use ember_notify::{
    BestEffort, DisabledPushTransport, HttpPushTransport, Notifier, PushTransport, ReminderSweep,
};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ember=debug,ember_api=debug,ember_gateway=debug,ember_notify=debug,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let push: Arc<dyn PushTransport> = match &config.push_gateway_url {
        Some(url) => {
            info!("Push delivery via {}", url);
            Arc::new(HttpPushTransport::new(url.clone())?)
        }
        None => {
            warn!("EMBER_PUSH_GATEWAY_URL not set, push delivery disabled");
            Arc::new(DisabledPushTransport)
        }
    };
    let notifier = Notifier::new(db.clone(), push, BestEffort::tracing());

    let reminders = ReminderSweep::new(notifier.clone(), config.reminders).start();

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
        notifier,
        upload_dir: config.upload_dir.clone(),
    });
    let relay = Relay::new(db);

    let app = Router::new()
        .merge(ember_api::router(app_state))
        .merge(ember_gateway::router(relay, &config.jwt_secret))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Ember server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reminders.stop().await;
    info!("Ember server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
