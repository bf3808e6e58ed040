//! Process orchestration: wires configuration, pools, and the HTTP
//! surface together and runs them until a shutdown signal arrives.
//! Mirrors the bootstrap shape of `storage_controller/src/main.rs`
//! (build dependencies, build the router, serve with a
//! `CancellationToken`-driven graceful shutdown reacting to
//! SIGINT/SIGTERM/SIGQUIT) rather than `proxy`'s heavier multi-listener
//! bootstrap, since this gateway only ever exposes one HTTP surface.

pub mod classify;
pub mod config;
pub mod connpool;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod pg;
pub mod probe;
pub mod shaper;
pub mod workpool;

use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use classify::Class;
use config::Config;
use connpool::ConnPool;
use handlers::AppState;
use observability::Observability;
use pg::ConnFactory;
use workpool::WorkerPool;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let factory = ConnFactory::new(&config);
    let observability = Observability::new();
    let generator: Arc<str> = Arc::from(config.generator.as_str());

    let probe_pool = ConnPool::new(factory.clone(), config.probe_pool_size).await?;

    let quick = Arc::new(WorkerPool::spawn(
        Class::Quick,
        config.quick_workers,
        config.queue_capacity,
        factory.clone(),
        generator.clone(),
        observability.idle_counter(Class::Quick),
    ));
    let medium = Arc::new(WorkerPool::spawn(
        Class::Medium,
        config.medium_workers,
        config.queue_capacity,
        factory.clone(),
        generator.clone(),
        observability.idle_counter(Class::Medium),
    ));
    let slow = Arc::new(WorkerPool::spawn(
        Class::Slow,
        config.slow_workers,
        config.queue_capacity,
        factory.clone(),
        generator.clone(),
        observability.idle_counter(Class::Slow),
    ));

    observability.spawn_reporter([config.quick_workers, config.medium_workers, config.slow_workers]);

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|error| anyhow::anyhow!("failed to install metrics recorder: {error}"))?;

    let state = AppState {
        probe_pool,
        quick,
        medium,
        slow,
        quick_medium_threshold: config.quick_medium_threshold,
        medium_slow_threshold: config.medium_slow_threshold,
        observability,
    };

    let app = handlers::router(state).route(
        "/metrics",
        get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    tracing::info!(listen = %config.listen, "starting postpass gateway");
    axum::Server::bind(&config.listen)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

/// Cancels `shutdown` on SIGINT, SIGTERM, or SIGQUIT, the same trio
/// `storage_controller/src/main.rs` listens for.
fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

        tokio::select! {
            _ = sigint.recv() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigquit.recv() => tracing::info!("received SIGQUIT"),
        }
        shutdown.cancel();
    });
}
