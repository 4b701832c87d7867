use std::sync::Arc;

use anyhow::Context;
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{info, warn};

use swiftcart_api::{
    auth::AuthService,
    config,
    db,
    events::{self, EventSender},
    gateway::{HttpGateway, PaymentGateway, SandboxGateway},
    AppServices, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = config::load_config().context("Failed to load configuration")?;
    config::init_tracing(app_config.log_level());
    info!(
        environment = %app_config.environment,
        "Starting SwiftCart API"
    );

    let db_pool = Arc::new(
        db::establish_connection_from_app_config(&app_config)
            .await
            .context("Failed to connect to database")?,
    );
    if app_config.auto_migrate {
        db::run_migrations(&db_pool)
            .await
            .context("Failed to run migrations")?;
    }
    db::check_connection(&db_pool)
        .await
        .context("Database is not reachable")?;

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = Arc::new(EventSender::new(event_tx));
    tokio::spawn(events::process_events(event_rx));

    let gateway: Arc<dyn PaymentGateway> = match &app_config.gateway.base_url {
        Some(base_url) => {
            info!(%base_url, "Using HTTP payment gateway");
            Arc::new(HttpGateway::new(&app_config.gateway, base_url.clone())?)
        }
        None => {
            if !app_config.is_development() {
                warn!("No gateway base_url configured; falling back to sandbox gateway");
            }
            Arc::new(SandboxGateway::new(&app_config.gateway))
        }
    };

    let auth = Arc::new(AuthService::new(
        &app_config.jwt_secret,
        app_config.jwt_expiration,
    ));

    let services = AppServices::build(
        db_pool.clone(),
        &app_config,
        event_sender.clone(),
        gateway,
    );

    let addr = format!("{}:{}", app_config.host, app_config.port);
    let state = AppState {
        db: db_pool,
        config: Arc::new(app_config),
        services,
    };
    let app = swiftcart_api::build_router(state, auth);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C; shutting down"),
        _ = terminate => info!("Received SIGTERM; shutting down"),
    }
}
