use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oxistore::api::metrics::init_metrics;
use oxistore::api::rate_limit::spawn_cleanup_task;
use oxistore::cli::Cli;
use oxistore::config::Config;
use oxistore::engine::spawn_rental_monitor;
use oxistore::startup::run_startup_checks;
use oxistore::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.command.is_some() {
        return oxistore::cli::run_command(&cli).await;
    }

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting oxistore v{}", env!("CARGO_PKG_VERSION"));
    for warning in config.warnings() {
        tracing::warn!("{}", warning);
    }

    oxistore::utils::ensure_dir(&config.server.data_dir)?;
    let db = oxistore::db::init(&config.server.data_dir).await?;

    let generated_password = config.auth.admin_password.is_none();
    let admin_password = config
        .auth
        .admin_password
        .clone()
        .unwrap_or_else(|| oxistore::utils::random_code(16));
    let created = oxistore::db::ensure_admin_user(
        &db,
        &config.auth.admin_username,
        &config.auth.admin_name,
        &admin_password,
    )
    .await?;
    if created && generated_password {
        tracing::warn!(
            username = %config.auth.admin_username,
            password = %admin_password,
            "Generated admin password; change it after the first login"
        );
    }

    if !cli.skip_checks {
        let report = run_startup_checks(&config, &db).await;
        if !report.all_critical_passed {
            anyhow::bail!("Startup checks failed: {}", report.summary);
        }
    }

    let mut state = AppState::new(config.clone(), db.clone());
    match init_metrics() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "Metrics disabled"),
    }
    let state = Arc::new(state);

    if config.rate_limit.enabled {
        spawn_cleanup_task(state.rate_limiter.clone(), config.rate_limit.cleanup_interval);
    }
    if config.monitor.enabled {
        spawn_rental_monitor(db.clone(), state.push.clone(), config.monitor.clone());
    }

    let app = oxistore::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
