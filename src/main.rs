use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use nursery_api as api;
use api::{
    notifications::{LoggingNotifier, Notifier},
    services::razorpay::{PaymentGateway, RazorpayClient},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("loading configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);
    api::handlers::health::init_start_time();

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("connecting to database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        RazorpayClient::new(&cfg.razorpay).context("building Razorpay client")?,
    );
    let notifier: Arc<dyn Notifier> = Arc::new(LoggingNotifier);
    let rate_limiter = api::build_verify_rate_limiter(&cfg)?;

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("parsing listen address")?;

    let sweep_interval = cfg.verify_rate_limit_window();
    let state = api::AppState::new(db.clone(), cfg, gateway, notifier, rate_limiter);
    tokio::spawn(api::rate_limiter::start_cleanup_task(
        state.rate_limiter.clone(),
        sweep_interval,
    ));
    let app = api::build_router(state);

    info!("nursery-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(db) {
        Ok(pool) => api::db::close_pool(pool).await?,
        Err(_) => warn!("database pool still shared at shutdown; leaving it to drop"),
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
