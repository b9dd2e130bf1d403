//! Client role: talks to the directory, pulls and merges peer indices, and
//! fetches documents with owner fallback.
//!
//! Every operation logs its own failures and hands them back to the caller;
//! none of them is fatal to the node.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rfc_core::integrity;
use rfc_core::protocol::{decode_peer_list, HEADER_COOKIE, HEADER_DIGEST};
use rfc_core::{
    exchange, ContentIndex, Error, Kind, Message, Method, PeerAddr, Result, StatusCode, Timeouts,
};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::documents::DocumentStore;
use crate::SharedIndex;

pub struct PeerNode {
    name: String,
    advertised: PeerAddr,
    tracker: PeerAddr,
    timeouts: Timeouts,
    index: SharedIndex,
    documents: Arc<DocumentStore>,
    cookie: Mutex<Option<String>>,
    peers: Mutex<Vec<PeerAddr>>,
}

impl PeerNode {
    pub fn new(
        name: impl Into<String>,
        advertised: PeerAddr,
        tracker: PeerAddr,
        timeouts: Timeouts,
        index: SharedIndex,
        documents: Arc<DocumentStore>,
    ) -> Self {
        Self {
            name: name.into(),
            advertised,
            tracker,
            timeouts,
            index,
            documents,
            cookie: Mutex::new(None),
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub async fn cookie(&self) -> Option<String> {
        self.cookie.lock().await.clone()
    }

    pub async fn known_peers(&self) -> Vec<PeerAddr> {
        self.peers.lock().await.clone()
    }

    /// Replace the peer-address cache directly (bootstrap without a directory).
    pub async fn set_peers(&self, peers: Vec<PeerAddr>) {
        *self.peers.lock().await = peers;
    }

    /// Mark every document already on disk as owned.
    pub async fn load_local_documents(&self) -> io::Result<usize> {
        let ids = self.documents.list()?;
        let mut index = self.index.lock().await;
        for id in &ids {
            index.mark_owned(id);
        }
        Ok(ids.len())
    }

    pub async fn register_self(&self) -> Result<String> {
        let mut request = Message::request(Kind::DirectoryRequest, Method::Register)
            .with_header("name", &self.name)
            .with_header("hostname", &self.advertised.host)
            .with_header("port", self.advertised.port.to_string());
        if let Some(cookie) = self.cookie().await {
            request = request.with_header(HEADER_COOKIE, cookie);
        }
        let result = exchange(&self.tracker, &request, self.timeouts)
            .await
            .and_then(Message::into_success);
        let cookie = logged("register", result)?;
        info!("registered with {} as {}", self.tracker, self.name);
        *self.cookie.lock().await = Some(cookie.clone());
        Ok(cookie)
    }

    pub async fn heartbeat(&self) -> Result<()> {
        logged("keep-alive", self.directory(Method::KeepAlive).await).map(drop)
    }

    pub async fn leave(&self) -> Result<()> {
        logged("leave", self.directory(Method::Leave).await)?;
        info!("left {}", self.tracker);
        Ok(())
    }

    /// Heartbeat, falling back to a fresh registration when the directory
    /// does not know this node (never registered, or restarted clean).
    pub async fn keep_alive(&self) -> Result<()> {
        match self.heartbeat().await {
            Err(Error::NotRegistered)
            | Err(Error::Rejected {
                status: StatusCode::Forbidden,
                ..
            }) => self.register_self().await.map(drop),
            other => other,
        }
    }

    /// Ask the directory for active peers and replace the local cache.
    pub async fn refresh_peer_list(&self) -> Result<usize> {
        let payload = logged("peer query", self.directory(Method::PQuery).await)?;
        let peers: Vec<PeerAddr> = logged("peer query", decode_peer_list(&payload))?
            .into_iter()
            .filter(|p| *p != self.advertised)
            .collect();
        let n = peers.len();
        *self.peers.lock().await = peers;
        debug!("{} peers known", n);
        Ok(n)
    }

    /// Pull every known peer's index and merge it. Unreachable or failing
    /// peers are skipped. Returns how many indices were merged.
    pub async fn refresh_indices(&self) -> usize {
        let peers = self.known_peers().await;
        let mut merged = 0;
        for peer in &peers {
            match self.request_index(peer).await {
                Ok(remote) => {
                    self.index.lock().await.merge(&remote);
                    merged += 1;
                    debug!("merged index from {} ({} entries)", peer, remote.len());
                }
                Err(e) => warn!("skipping index of {}: {}", peer, e),
            }
        }
        merged
    }

    /// Fetch `id` from the first hosting peer that serves it, store it and
    /// mark it owned. Fails when no peer is known to host it or all of them fail.
    pub async fn fetch(&self, id: &str) -> Result<()> {
        rfc_core::validate_document_id(id)?;
        if self.index.lock().await.is_owned(id) {
            debug!("{} already held locally", id);
            return Ok(());
        }
        // failures are already logged; a stale cache is still worth trying
        let _ = self.refresh_peer_list().await;
        self.refresh_indices().await;

        let hosts: Vec<PeerAddr> = self
            .index
            .lock()
            .await
            .hosting_peers_of(id)
            .into_iter()
            .filter(|h| *h != self.advertised)
            .collect();
        if hosts.is_empty() {
            warn!("no peer is known to host {}", id);
            return Err(Error::NotFound(id.to_string()));
        }
        for host in &hosts {
            match self.request_document(host, id).await {
                Ok(body) => {
                    logged("store document", self.documents.write(id, &body).await)?;
                    self.index.lock().await.mark_owned(id);
                    info!("fetched {} from {} ({} bytes)", id, host, body.len());
                    return Ok(());
                }
                Err(e) => warn!("{} could not serve {}: {}", host, id, e),
            }
        }
        warn!("every known host of {} failed", id);
        Err(Error::NotFound(format!("{id}: all {} hosts failed", hosts.len())))
    }

    async fn directory(&self, method: Method) -> Result<String> {
        let cookie = self.cookie().await.ok_or(Error::NotRegistered)?;
        let request =
            Message::request(Kind::DirectoryRequest, method).with_header(HEADER_COOKIE, cookie);
        exchange(&self.tracker, &request, self.timeouts)
            .await?
            .into_success()
    }

    async fn request_index(&self, peer: &PeerAddr) -> Result<ContentIndex> {
        let request = Message::request(Kind::PeerRequest, Method::RfcQuery);
        let payload = exchange(peer, &request, self.timeouts)
            .await?
            .into_success()?;
        ContentIndex::from_wire(&payload)
    }

    async fn request_document(&self, peer: &PeerAddr, id: &str) -> Result<String> {
        let request = Message::request(Kind::PeerRequest, Method::GetRfc).with_payload(id);
        let response = exchange(peer, &request, self.timeouts).await?;
        let digest = response.header(HEADER_DIGEST).map(str::to_string);
        let body = response.into_success()?;
        if let Some(digest) = digest {
            if !integrity::verify(body.as_bytes(), &digest) {
                return Err(Error::BadFormat("document digest mismatch".into()));
            }
        }
        Ok(body)
    }
}

fn logged<T>(what: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        warn!("{} failed: {}", what, e);
    }
    result
}

/// Keep the directory registration alive until `shutdown`.
pub async fn run_keepalive(node: Arc<PeerNode>, interval: Duration, shutdown: Arc<Notify>) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let stop = shutdown.notified();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = node.keep_alive().await;
            }
            _ = &mut stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::PeerServer;
    use rfc_core::{serve, Service, DEFAULT_TTL};
    use rfc_tracker::{MemoryStore, Tracker};
    use std::future::Future;
    use tokio::net::TcpListener;

    fn timeouts() -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(2),
            io: Duration::from_secs(5),
        }
    }

    fn addr_of(listener: &TcpListener) -> PeerAddr {
        PeerAddr::new("127.0.0.1", listener.local_addr().unwrap().port())
    }

    /// Two loopback listeners, lower port first, so host order is known.
    async fn ordered_listeners() -> (TcpListener, TcpListener) {
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        if addr_of(&a) < addr_of(&b) {
            (a, b)
        } else {
            (b, a)
        }
    }

    async fn dead_addr() -> PeerAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        addr_of(&listener)
    }

    fn spawn_service<S: Service>(listener: TcpListener, service: S) -> Arc<Notify> {
        let shutdown = Arc::new(Notify::new());
        tokio::spawn(serve(
            listener,
            Arc::new(service),
            shutdown.clone(),
            Duration::from_secs(5),
        ));
        shutdown
    }

    /// Peer owning `docs`, served from `listener`.
    async fn spawn_peer(
        listener: TcpListener,
        root: &std::path::Path,
        docs: &[(&str, &str)],
    ) -> (PeerAddr, SharedIndex, Arc<DocumentStore>) {
        let addr = addr_of(&listener);
        let documents = Arc::new(DocumentStore::open(root).unwrap());
        let index: SharedIndex = Arc::new(Mutex::new(ContentIndex::new()));
        for (id, body) in docs {
            documents.write(id, body).await.unwrap();
            index.lock().await.mark_owned(id);
        }
        let server = PeerServer::new(index.clone(), documents.clone(), addr.clone());
        spawn_service(listener, server);
        (addr, index, documents)
    }

    fn node(root: &std::path::Path, advertised: PeerAddr, tracker: PeerAddr) -> PeerNode {
        PeerNode::new(
            "tester",
            advertised,
            tracker,
            timeouts(),
            Arc::new(Mutex::new(ContentIndex::new())),
            Arc::new(DocumentStore::open(root).unwrap()),
        )
    }

    /// Answers every fetch with a body that does not match its digest.
    struct Tamperer;

    impl Service for Tamperer {
        fn response_kind(&self) -> Kind {
            Kind::PeerResponse
        }

        fn hostname(&self) -> &str {
            "tamperer"
        }

        fn call(&self, _request: Message) -> impl Future<Output = Result<Message>> + Send {
            async {
                Ok(Message::response(Kind::PeerResponse, StatusCode::Success)
                    .with_header(HEADER_DIGEST, integrity::digest_hex(b"RFC TEXT"))
                    .with_payload("RFC TEXT, altered"))
            }
        }
    }

    #[tokio::test]
    async fn fetch_falls_back_to_second_host() {
        let dir = tempfile::tempdir().unwrap();
        let (first, second) = ordered_listeners().await;
        let p1 = addr_of(&first);
        drop(first);
        let (p2, _, _) = spawn_peer(second, &dir.path().join("p2"), &[("doc1", "RFC TEXT")]).await;

        let me = node(&dir.path().join("me"), PeerAddr::new("127.0.0.1", 1), dead_addr().await);
        {
            let mut index = me.index().lock().await;
            index.add_host("doc1", p1.clone());
            index.add_host("doc1", p2.clone());
            let order: Vec<PeerAddr> = index.hosting_peers_of("doc1").into_iter().collect();
            assert_eq!(order, vec![p1, p2]);
        }

        me.fetch("doc1").await.unwrap();
        assert!(me.index().lock().await.is_owned("doc1"));
        assert_eq!(me.documents.read("doc1").await.unwrap(), "RFC TEXT");
    }

    #[tokio::test]
    async fn unknown_document_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let me = node(dir.path(), PeerAddr::new("127.0.0.1", 1), dead_addr().await);
        let err = me.fetch("rfc404").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!me.index().lock().await.is_owned("rfc404"));
    }

    #[tokio::test]
    async fn all_hosts_failing_fails_the_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let me = node(dir.path(), PeerAddr::new("127.0.0.1", 1), dead_addr().await);
        me.index().lock().await.add_host("doc1", dead_addr().await);
        assert!(me.fetch("doc1").await.is_err());
        assert!(!me.index().lock().await.is_owned("doc1"));
    }

    #[tokio::test]
    async fn tampered_body_is_rejected_and_next_host_tried() {
        let dir = tempfile::tempdir().unwrap();
        let (first, second) = ordered_listeners().await;
        let liar = addr_of(&first);
        let _stop = spawn_service(first, Tamperer);
        let (honest, _, _) =
            spawn_peer(second, &dir.path().join("honest"), &[("doc1", "RFC TEXT")]).await;

        let me = node(&dir.path().join("me"), PeerAddr::new("127.0.0.1", 1), dead_addr().await);
        me.index().lock().await.add_host("doc1", liar);
        me.index().lock().await.add_host("doc1", honest);
        me.fetch("doc1").await.unwrap();
        assert_eq!(me.documents.read("doc1").await.unwrap(), "RFC TEXT");
    }

    #[tokio::test]
    async fn refresh_skips_unreachable_peers() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (live, _, _) = spawn_peer(listener, &dir.path().join("live"), &[("rfc1", "one")]).await;

        let me = node(&dir.path().join("me"), PeerAddr::new("127.0.0.1", 1), dead_addr().await);
        me.index().lock().await.mark_owned("rfc0");
        me.set_peers(vec![dead_addr().await, live.clone()]).await;
        assert_eq!(me.refresh_indices().await, 1);

        let index = me.index().lock().await;
        assert!(index.is_owned("rfc0"));
        assert!(!index.is_owned("rfc1"));
        assert!(index.hosting_peers_of("rfc1").contains(&live));
    }

    #[tokio::test]
    async fn directory_calls_need_registration() {
        let dir = tempfile::tempdir().unwrap();
        let me = node(dir.path(), PeerAddr::new("127.0.0.1", 1), dead_addr().await);
        assert!(matches!(me.heartbeat().await, Err(Error::NotRegistered)));
        assert!(matches!(me.refresh_peer_list().await, Err(Error::NotRegistered)));
        // unreachable directory: logged, reported, not fatal
        assert!(matches!(me.register_self().await, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn end_to_end_through_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tracker =
            Tracker::start("tracker", DEFAULT_TTL, Box::new(MemoryStore::new()), false).unwrap();
        let tracker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tracker_addr = addr_of(&tracker_listener);
        let _tracker_stop = spawn_service(tracker_listener, tracker);

        // alice serves rfc1
        let alice_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let alice_addr = addr_of(&alice_listener);
        let alice = Arc::new(PeerNode::new(
            "alice",
            alice_addr.clone(),
            tracker_addr.clone(),
            timeouts(),
            Arc::new(Mutex::new(ContentIndex::new())),
            Arc::new(DocumentStore::open(dir.path().join("alice")).unwrap()),
        ));
        alice.documents.write("rfc1", "RFC TEXT").await.unwrap();
        assert_eq!(alice.load_local_documents().await.unwrap(), 1);
        spawn_service(
            alice_listener,
            PeerServer::new(alice.index().clone(), alice.documents.clone(), alice_addr.clone()),
        );
        let alice_cookie = alice.register_self().await.unwrap();

        // re-registering keeps the cookie
        assert_eq!(alice.register_self().await.unwrap(), alice_cookie);

        let bob_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bob_addr = addr_of(&bob_listener);
        let bob = node(&dir.path().join("bob"), bob_addr.clone(), tracker_addr);
        spawn_service(
            bob_listener,
            PeerServer::new(bob.index().clone(), bob.documents.clone(), bob_addr.clone()),
        );
        bob.keep_alive().await.unwrap();
        assert!(bob.cookie().await.is_some());

        bob.fetch("rfc1").await.unwrap();
        assert_eq!(bob.known_peers().await, vec![alice_addr.clone()]);
        assert!(bob.index().lock().await.is_owned("rfc1"));

        // alice now learns that bob holds rfc1 too
        alice.refresh_peer_list().await.unwrap();
        assert_eq!(alice.refresh_indices().await, 1);
        let hosts = alice.index().lock().await.hosting_peers_of("rfc1");
        assert!(hosts.contains(&bob_addr));

        bob.heartbeat().await.unwrap();
        bob.leave().await.unwrap();
        alice.refresh_peer_list().await.unwrap();
        assert!(alice.known_peers().await.is_empty());
    }
}
