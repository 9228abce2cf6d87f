// gateway: Fronts a pool of interpreter workers with an HTTP server.

use gateway::http::{self, AppState};
use gateway::hub::EventHub;
use gateway::supervisor::Supervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "gateway starting");

    let cfg = match std::env::args().nth(1) {
        Some(path) => gateway::config::load_config_from_path(&PathBuf::from(path)),
        None => gateway::config::load_config(),
    };
    let cfg = match cfg {
        Ok(cfg) => {
            info!(
                bind = %cfg.http.bind,
                fast = cfg.pools.fast,
                slow = cfg.pools.slow,
                command = %cfg.worker.command,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let supervisor = Arc::new(Supervisor::new(
        cfg.worker_config(),
        cfg.pools.fast,
        cfg.pools.slow,
        cfg.slow_policy(),
    ));

    // Keep the watcher handle alive for the process lifetime; dropping it
    // would stop hot reload.
    let _reload = if cfg.reload.enabled {
        match supervisor.enable_hot_reload(&cfg.reload.watch) {
            Ok(watcher) => {
                info!(dirs = watcher.watched(), "hot reload enabled");
                Some(watcher)
            }
            Err(e) => {
                eprintln!("FATAL: failed to start hot reload watcher: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let hub = Arc::new(EventHub::new());
    let state = AppState::new(supervisor.clone(), hub, cfg.http.auth_token.clone());
    let router = http::build_router(state, cfg.http.static_dir.clone());

    let listener = match tokio::net::TcpListener::bind(&cfg.http.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: failed to bind {}: {}", cfg.http.bind, e);
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.http.bind, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Let the next start spawn fresh children instead of inheriting state.
    supervisor.force_recycle();
    info!("gateway shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
