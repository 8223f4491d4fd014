//! Proxy Pool - Entry Point
//!
//! Starts the pool engine, its background services and the gateway, with
//! graceful shutdown support.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxy_pool::check::CheckRules;
use proxy_pool::config::{self, Config, LogConfig};
use proxy_pool::gateway::GatewayServer;
use proxy_pool::pool::PoolEngine;
use proxy_pool::services::revalidation::RevalidationConfig;
use proxy_pool::services::rule_refresh::RuleRefreshConfig;
use proxy_pool::services::{
    RevalidationHandle, RevalidationService, RuleRefreshHandle, RuleRefreshService,
};

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxy_pool={}", log.level).into());

    if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Proxy Pool");

    let checks = config::load_checks(&config.pool.checks_file)?;
    let sources = config::load_sources(&config.pool.sources_file)?;
    info!(
        checks = checks.len(),
        sources = sources.len(),
        "Configuration loaded"
    );

    let rules = Arc::new(CheckRules::new(checks)?);

    // Resolve the outer IP before any candidate is probed
    let refresher = RuleRefreshService::new(
        rules.clone(),
        RuleRefreshConfig {
            ip_echo_url: config.pool.ip_echo_url.clone(),
            timeout: Duration::from_secs(config.pool.check_timeout),
            ..Default::default()
        },
    )?;
    let outer_ip = refresher.refresh_once().await;
    info!(outer_ip = %outer_ip, "Check rules compiled");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine = PoolEngine::new(config.pool.clone(), sources, rules)?;
    let engine_tasks = engine.start(shutdown_rx.clone());

    let (refresh_handle, refresh_shutdown) = RuleRefreshHandle::new();
    let refresh_task = tokio::spawn(async move {
        refresher.run(refresh_shutdown).await;
    });

    let (revalidation_handle, revalidation_shutdown) = RevalidationHandle::new();
    let revalidation = RevalidationService::new(engine.clone(), RevalidationConfig::default());
    let revalidation_task = tokio::spawn(async move {
        revalidation.run(revalidation_shutdown).await;
    });

    let gateway = GatewayServer::new(
        config.gateway.clone(),
        engine.clone(),
        Duration::from_secs(config.pool.cache_secs),
    );
    let listener = gateway.bind().await?;
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway.run(listener, shutdown_rx).await {
            error!("Gateway error: {}", e);
        }
    });

    info!("Gateway started on {}", config.gateway_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    refresh_handle.shutdown();
    revalidation_handle.shutdown();

    let _ = tokio::join!(gateway_task, refresh_task, revalidation_task);
    for task in engine_tasks {
        let _ = task.await;
    }

    info!("Proxy Pool stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
