//! Directory service: registry behind one lock, mirrored to the store, and
//! the periodic liveness sweep.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use rfc_core::protocol::{encode_peer_list, HEADER_COOKIE};
use rfc_core::{
    Error, Kind, Message, Method, PeerAddr, PeerRecord, Registry, Result, Service, StatusCode,
    StoredPeer,
};
use tokio::sync::{Mutex, Notify};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::{PeerStore, StoreError};

type SharedStore = Arc<std::sync::Mutex<Box<dyn PeerStore>>>;

/// Registry plus its checkpoint. The store is written while the lock is held
/// so memory and disk see mutations in the same order.
struct TrackerState {
    registry: Registry,
    store: SharedStore,
}

impl TrackerState {
    async fn mirror(&self, record: &PeerRecord) {
        let stored = record.to_stored();
        if let Err(e) = on_store(&self.store, move |store| store.upsert(&stored)).await {
            warn!("failed to checkpoint peer {}: {}", record.name, e);
        }
    }
}

/// Run a store operation on the blocking pool. Callers keep the registry
/// lock across the await.
async fn on_store<T, F>(store: &SharedStore, op: F) -> std::result::Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&mut Box<dyn PeerStore>) -> std::result::Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = store.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut guard)
    })
    .await?
}

pub struct Tracker {
    state: Mutex<TrackerState>,
    hostname: String,
    sweeps: AtomicU64,
}

impl Tracker {
    /// Build the tracker. With `resume` the registry is loaded from `store`;
    /// otherwise the store is cleared and the registry starts empty.
    pub fn start(
        hostname: impl Into<String>,
        ttl: Duration,
        mut store: Box<dyn PeerStore>,
        resume: bool,
    ) -> std::result::Result<Self, StoreError> {
        let registry = if resume {
            let stored = store.load_all()?;
            info!("resuming with {} known peers", stored.len());
            Registry::with_records(ttl, stored)
        } else {
            store.clear()?;
            Registry::new(ttl)
        };
        let store = Arc::new(std::sync::Mutex::new(store));
        Ok(Self {
            state: Mutex::new(TrackerState { registry, store }),
            hostname: hostname.into(),
            sweeps: AtomicU64::new(0),
        })
    }

    pub async fn register(
        &self,
        name: &str,
        hostname: &str,
        port: u16,
        cookie: Option<&str>,
    ) -> String {
        let mut state = self.state.lock().await;
        let record = state.registry.register(name, hostname, port, cookie).clone();
        state.mirror(&record).await;
        info!(
            "registered {} at {}:{} (registration {})",
            record.name, record.hostname, record.port, record.registration_count
        );
        record.cookie
    }

    pub async fn heartbeat(&self, cookie: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.registry.heartbeat(cookie)?.clone();
        state.mirror(&record).await;
        debug!("keep-alive from {}", record.name);
        Ok(())
    }

    pub async fn leave(&self, cookie: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.registry.leave(cookie)?.clone();
        state.mirror(&record).await;
        info!("{} left", record.name);
        Ok(())
    }

    /// Active peers, in no meaningful order. Counts as a keep-alive for the caller.
    pub async fn list_active_peers(&self, cookie: &str) -> Result<Vec<PeerAddr>> {
        let mut state = self.state.lock().await;
        let peers = state.registry.list_active(cookie)?;
        if let Some(record) = state.registry.get(cookie).cloned() {
            state.mirror(&record).await;
        }
        Ok(peers)
    }

    /// Sweep passes run so far.
    pub fn sweeps_run(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub async fn record(&self, cookie: &str) -> Option<PeerRecord> {
        self.state.lock().await.registry.get(cookie).cloned()
    }

    pub async fn sweep(&self) -> std::result::Result<usize, StoreError> {
        self.sweep_at(Instant::now()).await
    }

    /// One sweep pass. Every expiry is attempted against the store; the first
    /// store failure is reported after the pass completes.
    pub async fn sweep_at(&self, now: Instant) -> std::result::Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let expired = state.registry.sweep_at(now);
        if expired.is_empty() {
            return Ok(0);
        }
        for record in &expired {
            info!("{} expired", record.name);
        }
        let stored: Vec<StoredPeer> = expired.iter().map(PeerRecord::to_stored).collect();
        on_store(&state.store, move |store| {
            let mut first_err = None;
            for peer in &stored {
                if let Err(e) = store.upsert(peer) {
                    first_err.get_or_insert(e);
                }
            }
            first_err.map_or(Ok(()), Err)
        })
        .await?;
        Ok(expired.len())
    }

    async fn dispatch(&self, request: Message) -> Result<Message> {
        if request.kind != Kind::DirectoryRequest {
            return Err(Error::BadFormat("expected a directory request".into()));
        }
        let ok = Message::response(Kind::DirectoryResponse, StatusCode::Success);
        match request.method {
            Some(Method::Register) => {
                let name = required(&request, "name")?;
                let hostname = required(&request, "hostname")?;
                // it is echoed to every peer in PQUERY listings
                PeerAddr::validate_host(hostname)?;
                let port = required(&request, "port")?
                    .parse::<u16>()
                    .map_err(|_| Error::BadFormat("invalid port".into()))?;
                let cookie = self
                    .register(name, hostname, port, request.header(HEADER_COOKIE))
                    .await;
                Ok(ok.with_payload(cookie))
            }
            Some(Method::KeepAlive) => {
                self.heartbeat(cookie_of(&request)?).await?;
                Ok(ok.with_payload("keep-alive acknowledged"))
            }
            Some(Method::Leave) => {
                self.leave(cookie_of(&request)?).await?;
                Ok(ok.with_payload("marked inactive"))
            }
            Some(Method::PQuery) => {
                let peers = self.list_active_peers(cookie_of(&request)?).await?;
                Ok(ok.with_payload(encode_peer_list(&peers)))
            }
            Some(other) => Err(Error::BadFormat(format!("unsupported method {other}"))),
            None => Err(Error::BadFormat("missing method".into())),
        }
    }
}

impl Service for Tracker {
    fn response_kind(&self) -> Kind {
        Kind::DirectoryResponse
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn call(&self, request: Message) -> impl Future<Output = Result<Message>> + Send {
        self.dispatch(request)
    }
}

fn required<'a>(request: &'a Message, header: &str) -> Result<&'a str> {
    request
        .header(header)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::BadFormat(format!("missing {header}")))
}

fn cookie_of(request: &Message) -> Result<&str> {
    request.header(HEADER_COOKIE).ok_or(Error::NotRegistered)
}

/// Sweep on a fixed period until `shutdown`. Overrunning ticks are skipped
/// so the next sweep lands on the next period boundary; a failed sweep is
/// logged and the schedule carries on.
pub async fn run_sweeper(tracker: Arc<Tracker>, interval: Duration, shutdown: Arc<Notify>) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let stop = shutdown.notified();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = ticker.tick() => match tracker.sweep().await {
                Ok(0) => {}
                Ok(n) => debug!("sweep expired {} peers", n),
                Err(e) => warn!("sweep failed: {}", e),
            },
            _ = &mut stop => {
                info!("sweeper stopping");
                break;
            }
        }
    }
}
