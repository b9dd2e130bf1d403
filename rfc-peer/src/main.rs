// RFC sharing network peer: serves owned documents and its index, fetches from other peers.

use std::sync::Arc;

use anyhow::Context;
use rand::Rng;
use rfc_core::{ContentIndex, PeerAddr};
use rfc_peer::config;
use rfc_peer::{run_keepalive, DocumentStore, PeerNode, PeerServer, SharedIndex};
use tokio::sync::{Mutex, Notify};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut fetches = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("rfc-peer {}", VERSION);
                return Ok(());
            }
            "--fetch" => match args.next() {
                Some(id) => fetches.push(id),
                None => anyhow::bail!("--fetch needs a document id"),
            },
            other => anyhow::bail!("unknown argument {other:?} (expected --fetch <id>)"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut cfg = config::load();
    cfg.name = format!("{}_{:03}", cfg.name, rand::thread_rng().gen_range(0..=999));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg, fetches))
}

async fn run(cfg: config::Config, fetches: Vec<String>) -> anyhow::Result<()> {
    let documents = Arc::new(
        DocumentStore::open(&cfg.document_dir)
            .with_context(|| format!("opening {}", cfg.document_dir.display()))?,
    );
    // ephemeral port; the advertised address is what other peers dial
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", 0))
        .await
        .context("binding peer listener")?;
    let advertised = PeerAddr::new(cfg.hostname.clone(), listener.local_addr()?.port());
    let tracker = PeerAddr::new(cfg.tracker_host.clone(), cfg.tracker_port);
    let index: SharedIndex = Arc::new(Mutex::new(ContentIndex::new()));

    let node = Arc::new(PeerNode::new(
        cfg.name.clone(),
        advertised.clone(),
        tracker,
        cfg.timeouts(),
        index.clone(),
        documents.clone(),
    ));
    let owned = node
        .load_local_documents()
        .await
        .with_context(|| format!("scanning {}", cfg.document_dir.display()))?;
    tracing::info!("{} listening as {} with {} documents", cfg.name, advertised, owned);

    let shutdown = Arc::new(Notify::new());
    let server = tokio::spawn(rfc_core::serve(
        listener,
        Arc::new(PeerServer::new(index, documents, advertised)),
        shutdown.clone(),
        cfg.timeouts().io,
    ));
    // a failed registration is retried by the keep-alive loop
    let _ = node.register_self().await;
    let keepalive = tokio::spawn(run_keepalive(
        node.clone(),
        cfg.heartbeat_interval(),
        shutdown.clone(),
    ));

    for id in &fetches {
        if node.fetch(id).await.is_err() {
            tracing::error!("could not fetch {}", id);
        }
    }

    shutdown_signal().await?;
    tracing::info!("shutting down");
    let _ = node.leave().await;
    shutdown.notify_waiters();
    let _ = tokio::join!(server, keepalive);
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
