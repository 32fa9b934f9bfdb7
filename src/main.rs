use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use allocd::api::{self, AppState};
use allocd::config::Config;
use allocd::engine::Engine;
use allocd::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "allocd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    allocd::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(&config.wal_path())?);

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        allocd::compactor::run_compactor(compactor_engine, threshold).await;
    });

    let scheduler = Arc::new(Scheduler::new(engine, config.scheduler()));
    let app = api::router(AppState { scheduler });

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("allocd listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  capacity policy: {:?}", config.capacity_policy);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = stop_rx.wait_for(|stop| *stop).await;
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining requests...");
            let _ = stop_tx.send(true);
        }
    }

    match tokio::time::timeout(config.shutdown_timeout, &mut server).await {
        Ok(result) => {
            result??;
            info!("all requests drained");
        }
        Err(_) => {
            tracing::warn!(
                "drain timeout after {:?}, abandoning open requests",
                config.shutdown_timeout
            );
            server.abort();
        }
    }

    info!("allocd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM ({e}), ctrl-c only");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
