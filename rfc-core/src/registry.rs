//! Peer registry: the directory service's liveness state machine.
//! Host-driven like the rest of the core: no I/O, the caller passes in sweep times.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::PeerAddr;

/// Liveness budget granted on every renewing action.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7200);
/// Nominal period of the liveness sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Checkpointed form of a [`PeerRecord`], keyed by cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPeer {
    pub cookie: String,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    /// Unix seconds.
    pub last_active: u64,
    pub registration_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub cookie: String,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub last_active_at: SystemTime,
    pub ttl_remaining: Duration,
    pub active: bool,
    pub registration_count: u32,
}

impl PeerRecord {
    fn new(cookie: String, name: &str, hostname: &str, port: u16, ttl: Duration) -> Self {
        Self {
            cookie,
            name: name.to_string(),
            hostname: hostname.to_string(),
            port,
            last_active_at: SystemTime::now(),
            ttl_remaining: ttl,
            active: true,
            registration_count: 1,
        }
    }

    /// Restored records stay inactive until the peer shows up again.
    pub fn from_stored(stored: StoredPeer) -> Self {
        Self {
            cookie: stored.cookie,
            name: stored.name,
            hostname: stored.hostname,
            port: stored.port,
            last_active_at: UNIX_EPOCH + Duration::from_secs(stored.last_active),
            ttl_remaining: Duration::ZERO,
            active: false,
            registration_count: stored.registration_count,
        }
    }

    pub fn to_stored(&self) -> StoredPeer {
        let last_active = self
            .last_active_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        StoredPeer {
            cookie: self.cookie.clone(),
            name: self.name.clone(),
            hostname: self.hostname.clone(),
            port: self.port,
            last_active,
            registration_count: self.registration_count,
        }
    }

    pub fn address(&self) -> PeerAddr {
        PeerAddr::new(self.hostname.clone(), self.port)
    }

    fn renew(&mut self, ttl: Duration) {
        self.last_active_at = SystemTime::now();
        self.ttl_remaining = ttl;
        self.active = true;
    }

    fn mark_inactive(&mut self) {
        self.last_active_at = SystemTime::now();
        self.ttl_remaining = Duration::ZERO;
        self.active = false;
    }
}

/// All peers ever registered, keyed by cookie. Records are never removed;
/// expiry only flips them inactive.
pub struct Registry {
    records: HashMap<String, PeerRecord>,
    ttl: Duration,
    last_sweep: Instant,
}

impl Registry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: HashMap::new(),
            ttl,
            last_sweep: Instant::now(),
        }
    }

    /// Registry resumed from a checkpoint.
    pub fn with_records(ttl: Duration, stored: impl IntoIterator<Item = StoredPeer>) -> Self {
        let mut registry = Self::new(ttl);
        for peer in stored {
            registry
                .records
                .insert(peer.cookie.clone(), PeerRecord::from_stored(peer));
        }
        registry
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, cookie: &str) -> Option<&PeerRecord> {
        self.records.get(cookie)
    }

    /// Renew the record behind a known cookie, or mint a new cookie and record.
    pub fn register(
        &mut self,
        name: &str,
        hostname: &str,
        port: u16,
        cookie: Option<&str>,
    ) -> &PeerRecord {
        let ttl = self.ttl;
        let key = match cookie {
            Some(known) if self.records.contains_key(known) => {
                if let Some(record) = self.records.get_mut(known) {
                    record.renew(ttl);
                    record.port = port;
                    record.registration_count += 1;
                }
                known.to_string()
            }
            _ => {
                let fresh = self.mint_cookie();
                let record = PeerRecord::new(fresh.clone(), name, hostname, port, ttl);
                self.records.insert(fresh.clone(), record);
                fresh
            }
        };
        &self.records[&key]
    }

    pub fn heartbeat(&mut self, cookie: &str) -> Result<&PeerRecord> {
        let ttl = self.ttl;
        let record = self.records.get_mut(cookie).ok_or(Error::NotRegistered)?;
        record.renew(ttl);
        Ok(record)
    }

    pub fn leave(&mut self, cookie: &str) -> Result<&PeerRecord> {
        let record = self.records.get_mut(cookie).ok_or(Error::NotRegistered)?;
        record.mark_inactive();
        Ok(record)
    }

    /// Addresses of every active peer, sorted. Asking renews the caller.
    pub fn list_active(&mut self, cookie: &str) -> Result<Vec<PeerAddr>> {
        self.heartbeat(cookie)?;
        let mut active: Vec<PeerAddr> = self
            .records
            .values()
            .filter(|r| r.active)
            .map(PeerRecord::address)
            .collect();
        active.sort();
        active.dedup();
        Ok(active)
    }

    /// Charge every active record with the time elapsed since the previous
    /// sweep. Returns the records that expired in this pass.
    pub fn sweep_at(&mut self, now: Instant) -> Vec<PeerRecord> {
        let elapsed = now.saturating_duration_since(self.last_sweep);
        self.last_sweep = now;
        let mut expired = Vec::new();
        for record in self.records.values_mut().filter(|r| r.active) {
            record.ttl_remaining = record.ttl_remaining.saturating_sub(elapsed);
            if record.ttl_remaining.is_zero() {
                record.active = false;
                expired.push(record.clone());
            }
        }
        expired
    }

    fn mint_cookie(&self) -> String {
        loop {
            let cookie = uuid::Uuid::new_v4().simple().to_string();
            if !self.records.contains_key(&cookie) {
                return cookie;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_ports(registry: &mut Registry, cookie: &str) -> Vec<u16> {
        registry
            .list_active(cookie)
            .unwrap()
            .into_iter()
            .map(|a| a.port)
            .collect()
    }

    #[test]
    fn reregistration_keeps_cookie_and_counts() {
        let mut registry = Registry::new(DEFAULT_TTL);
        let c1 = registry.register("alice", "10.0.0.1", 5000, None).cookie.clone();
        assert_eq!(registry.get(&c1).unwrap().registration_count, 1);

        let again = registry.register("alice", "10.0.0.1", 5002, Some(&c1));
        assert_eq!(again.cookie, c1);
        assert_eq!(again.registration_count, 2);
        assert_eq!(again.port, 5002);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_cookie_mints_fresh_one() {
        let mut registry = Registry::new(DEFAULT_TTL);
        let c1 = registry.register("alice", "a", 1, None).cookie.clone();
        let c2 = registry.register("bob", "b", 2, Some("forged")).cookie.clone();
        let c3 = registry.register("carol", "c", 3, None).cookie.clone();
        assert_ne!(c2, "forged");
        assert!(c1 != c2 && c2 != c3 && c1 != c3);
        assert_eq!(registry.get(&c2).unwrap().registration_count, 1);
    }

    #[test]
    fn unknown_cookie_is_not_registered() {
        let mut registry = Registry::new(DEFAULT_TTL);
        assert!(matches!(registry.heartbeat("nope"), Err(Error::NotRegistered)));
        assert!(matches!(registry.leave("nope"), Err(Error::NotRegistered)));
        assert!(matches!(registry.list_active("nope"), Err(Error::NotRegistered)));
    }

    #[test]
    fn leave_hides_peer_but_keeps_record() {
        let mut registry = Registry::new(DEFAULT_TTL);
        let a = registry.register("alice", "a", 1, None).cookie.clone();
        let b = registry.register("bob", "b", 2, None).cookie.clone();
        registry.leave(&a).unwrap();
        assert_eq!(active_ports(&mut registry, &b), vec![2]);
        assert!(!registry.get(&a).unwrap().active);
        // still known, so the peer can come back
        registry.heartbeat(&a).unwrap();
        assert_eq!(active_ports(&mut registry, &b), vec![1, 2]);
    }

    #[test]
    fn ttl_expiry_after_silence() {
        let mut registry = Registry::new(DEFAULT_TTL);
        let start = Instant::now();
        let a = registry.register("alice", "a", 1, None).cookie.clone();
        let b = registry.register("bob", "b", 2, None).cookie.clone();

        assert!(registry.sweep_at(start + Duration::from_secs(3600)).is_empty());
        registry.heartbeat(&b).unwrap();
        let expired = registry.sweep_at(start + Duration::from_secs(7205));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].cookie, a);
        assert!(!registry.get(&a).unwrap().active);
        assert_eq!(active_ports(&mut registry, &b), vec![2]);
    }

    #[test]
    fn sweep_charges_elapsed_time_not_a_constant() {
        let mut registry = Registry::new(Duration::from_secs(30));
        let start = Instant::now();
        let a = registry.register("alice", "a", 1, None).cookie.clone();

        assert!(registry.sweep_at(start + Duration::from_secs(12)).is_empty());
        let left = registry.get(&a).unwrap().ttl_remaining;
        assert!(left <= Duration::from_secs(18), "{left:?}");
        assert!(left > Duration::from_secs(17), "{left:?}");

        assert!(registry.sweep_at(start + Duration::from_secs(29)).is_empty());
        assert!(registry.get(&a).unwrap().active);
        assert_eq!(registry.sweep_at(start + Duration::from_secs(31)).len(), 1);
        assert!(!registry.get(&a).unwrap().active);
    }

    #[test]
    fn query_renews_the_caller() {
        let mut registry = Registry::new(Duration::from_secs(10));
        let start = Instant::now();
        let a = registry.register("alice", "a", 1, None).cookie.clone();
        registry.sweep_at(start + Duration::from_secs(8));
        registry.list_active(&a).unwrap();
        assert_eq!(registry.get(&a).unwrap().ttl_remaining, Duration::from_secs(10));
    }

    #[test]
    fn restored_records_start_inactive() {
        let stored = StoredPeer {
            cookie: "c1".into(),
            name: "alice".into(),
            hostname: "10.0.0.1".into(),
            port: 5000,
            last_active: 1_700_000_000,
            registration_count: 4,
        };
        let mut registry = Registry::with_records(DEFAULT_TTL, vec![stored.clone()]);
        let record = registry.get("c1").unwrap();
        assert!(!record.active);
        assert_eq!(record.to_stored(), stored);

        let renewed = registry.register("alice", "10.0.0.1", 5001, Some("c1"));
        assert!(renewed.active);
        assert_eq!(renewed.registration_count, 5);
    }
}
