// RFC sharing network directory service: registration, keep-alive, peer listing, liveness sweep.

use std::sync::Arc;

use anyhow::Context;
use rfc_tracker::config;
use rfc_tracker::{run_sweeper, JsonFileStore, Tracker};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut resume = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("rfc-tracker {}", VERSION);
                return Ok(());
            }
            "--resume" => resume = Some(true),
            "--clean" => resume = Some(false),
            other => anyhow::bail!("unknown argument {other:?} (expected --resume or --clean)"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut cfg = config::load();
    if let Some(r) = resume {
        cfg.resume = r;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let store = JsonFileStore::open(&cfg.store_path)
        .with_context(|| format!("opening {}", cfg.store_path.display()))?;
    let tracker = Arc::new(Tracker::start(
        cfg.hostname.clone(),
        cfg.ttl(),
        Box::new(store),
        cfg.resume,
    )?);
    let listener = tokio::net::TcpListener::bind((cfg.host.as_str(), cfg.port))
        .await
        .with_context(|| format!("binding {}:{}", cfg.host, cfg.port))?;
    let shutdown = Arc::new(tokio::sync::Notify::new());

    let sweeper = tokio::spawn(run_sweeper(
        tracker.clone(),
        cfg.sweep_interval(),
        shutdown.clone(),
    ));
    let server = tokio::spawn(rfc_core::serve(
        listener,
        tracker,
        shutdown.clone(),
        rfc_core::Timeouts::default().io,
    ));

    shutdown_signal().await?;
    tracing::info!("shutting down");
    shutdown.notify_waiters();
    let _ = tokio::join!(sweeper, server);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
