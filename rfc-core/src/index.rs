//! Content index: which documents a peer owns and which peers host the rest.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::protocol::PeerAddr;

/// Reject ids that cannot travel in the index payload or name a file safely.
pub fn validate_document_id(id: &str) -> Result<()> {
    let bad_char = |c: char| matches!(c, '/' | '\\' | '\0') || c.is_whitespace();
    if id.is_empty() || id.starts_with('.') || id.contains(bad_char) {
        return Err(Error::bad_format(format!("invalid document id {id:?}")));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// This peer stores the bytes. Its own address is then implied as a holder.
    pub owned: bool,
    pub hosts: BTreeSet<PeerAddr>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }

    pub fn is_owned(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|e| e.owned)
    }

    /// Hosts known to hold `id`, in address order. Empty when unknown.
    pub fn hosting_peers_of(&self, id: &str) -> BTreeSet<PeerAddr> {
        self.entries
            .get(id)
            .map(|e| e.hosts.clone())
            .unwrap_or_default()
    }

    /// Record a document stored locally (local load or completed fetch).
    pub fn mark_owned(&mut self, id: &str) {
        self.entries.entry(id.to_string()).or_default().owned = true;
    }

    pub fn add_host(&mut self, id: &str, host: PeerAddr) {
        self.entries
            .entry(id.to_string())
            .or_default()
            .hosts
            .insert(host);
    }

    /// Union `other`'s hosting sets into this index. Ownership stays local:
    /// entries new to this index arrive unowned and existing flags are untouched.
    pub fn merge(&mut self, other: &ContentIndex) {
        for (id, theirs) in &other.entries {
            let ours = self.entries.entry(id.clone()).or_default();
            ours.hosts.extend(theirs.hosts.iter().cloned());
        }
    }

    /// Payload of an `RFC_QUERY` response: `id<TAB>host:port,host:port` per line.
    /// `self_addr` is written into the hosting set of every owned entry.
    pub fn to_wire(&self, self_addr: &PeerAddr) -> String {
        let mut lines = Vec::with_capacity(self.entries.len());
        for (id, entry) in &self.entries {
            let mut hosts = entry.hosts.clone();
            if entry.owned {
                hosts.insert(self_addr.clone());
            }
            let hosts: Vec<String> = hosts.iter().map(PeerAddr::to_string).collect();
            lines.push(format!("{}\t{}", id, hosts.join(",")));
        }
        lines.join("\n")
    }

    pub fn from_wire(payload: &str) -> Result<Self> {
        let mut index = ContentIndex::new();
        for line in payload.lines().filter(|l| !l.is_empty()) {
            let (id, hosts) = line
                .split_once('\t')
                .ok_or_else(|| Error::bad_format(format!("malformed index line {line:?}")))?;
            validate_document_id(id)?;
            let entry = index.entries.entry(id.to_string()).or_default();
            for host in hosts.split(',').filter(|h| !h.is_empty()) {
                entry.hosts.insert(host.parse()?);
            }
        }
        Ok(index)
    }
}
