//! Peer directory checkpoint: records keyed by cookie, loaded wholesale on
//! resume and upserted on every mutation.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rfc_core::StoredPeer;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store format: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub trait PeerStore: Send {
    fn load_all(&self) -> Result<Vec<StoredPeer>, StoreError>;
    fn upsert(&mut self, peer: &StoredPeer) -> Result<(), StoreError>;
    /// Drop every record; used when the tracker starts clean.
    fn clear(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    peers: BTreeMap<String, StoredPeer>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<StoredPeer>, StoreError> {
        Ok(self.peers.values().cloned().collect())
    }

    fn upsert(&mut self, peer: &StoredPeer) -> Result<(), StoreError> {
        self.peers.insert(peer.cookie.clone(), peer.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.peers.clear();
        Ok(())
    }
}

/// JSON array on disk. Every write goes to a temp file first and is renamed
/// over the checkpoint so a crash never leaves half a file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    peers: BTreeMap<String, StoredPeer>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let peers = if path.exists() {
            let bytes = fs::read(&path)?;
            let list: Vec<StoredPeer> = serde_json::from_slice(&bytes)?;
            list.into_iter().map(|p| (p.cookie.clone(), p)).collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, peers })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        let list: Vec<&StoredPeer> = self.peers.values().collect();
        let json = serde_json::to_vec_pretty(&list)?;
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut f = File::create(&tmp_path)?;
        f.write_all(&json)?;
        f.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl PeerStore for JsonFileStore {
    fn load_all(&self) -> Result<Vec<StoredPeer>, StoreError> {
        Ok(self.peers.values().cloned().collect())
    }

    fn upsert(&mut self, peer: &StoredPeer) -> Result<(), StoreError> {
        self.peers.insert(peer.cookie.clone(), peer.clone());
        self.flush()
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.peers.clear();
        self.flush()
    }
}
