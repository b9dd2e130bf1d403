//! Load peer config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use rfc_core::Timeouts;

/// Peer configuration. File: ~/.config/rfcnet/peer.toml or /etc/rfcnet/peer.toml.
/// Env overrides: RFCNET_PEER_NAME, RFCNET_PEER_HOSTNAME, RFCNET_TRACKER_HOST,
/// RFCNET_TRACKER_PORT, RFCNET_DOCUMENT_DIR, RFCNET_HEARTBEAT_INTERVAL_SECS,
/// RFCNET_CONNECT_TIMEOUT_SECS, RFCNET_IO_TIMEOUT_SECS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base peer name; a random suffix is added at startup (default "peer").
    #[serde(default = "default_name")]
    pub name: String,
    /// Address other peers use to reach this node (default 127.0.0.1).
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_tracker_host")]
    pub tracker_host: String,
    #[serde(default = "default_tracker_port")]
    pub tracker_port: u16,
    /// Directory holding owned documents (default rfc_store).
    #[serde(default = "default_document_dir")]
    pub document_dir: PathBuf,
    /// Keep-alive period, seconds (default 60).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

fn default_name() -> String {
    "peer".to_string()
}
fn default_hostname() -> String {
    "127.0.0.1".to_string()
}
fn default_tracker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_tracker_port() -> u16 {
    65234
}
fn default_document_dir() -> PathBuf {
    PathBuf::from("rfc_store")
}
fn default_heartbeat_interval_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    Timeouts::default().connect.as_secs()
}
fn default_io_timeout_secs() -> u64 {
    Timeouts::default().io.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            hostname: default_hostname(),
            tracker_host: default_tracker_host(),
            tracker_port: default_tracker_port(),
            document_dir: default_document_dir(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

impl Config {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs.max(1)),
            io: Duration::from_secs(self.io_timeout_secs.max(1)),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("RFCNET_PEER_NAME") {
        c.name = s;
    }
    if let Some(s) = var("RFCNET_PEER_HOSTNAME") {
        c.hostname = s;
    }
    if let Some(s) = var("RFCNET_TRACKER_HOST") {
        c.tracker_host = s;
    }
    if let Some(p) = var("RFCNET_TRACKER_PORT").and_then(|s| s.parse().ok()) {
        c.tracker_port = p;
    }
    if let Some(s) = var("RFCNET_DOCUMENT_DIR") {
        c.document_dir = PathBuf::from(s);
    }
    if let Some(t) = var("RFCNET_HEARTBEAT_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
        c.heartbeat_interval_secs = t;
    }
    if let Some(t) = var("RFCNET_CONNECT_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
        c.connect_timeout_secs = t;
    }
    if let Some(t) = var("RFCNET_IO_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
        c.io_timeout_secs = t;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/rfcnet/peer.toml"));
    }
    out.push(PathBuf::from("/etc/rfcnet/peer.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p).map(|s| toml::from_str::<Config>(&s)) {
                Ok(Ok(c)) => return Some(c),
                Ok(Err(e)) => tracing::warn!("ignoring {}: {}", p.display(), e),
                Err(e) => tracing::warn!("cannot read {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.tracker_port, 65234);
        assert_eq!(c.document_dir, PathBuf::from("rfc_store"));
        assert_eq!(c.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(c.timeouts().connect, Duration::from_secs(5));
        assert_eq!(c.timeouts().io, Duration::from_secs(30));
    }

    #[test]
    fn partial_file() {
        let c: Config = toml::from_str("name = \"alice\"\ntracker_host = \"10.0.0.1\"").unwrap();
        assert_eq!(c.name, "alice");
        assert_eq!(c.tracker_host, "10.0.0.1");
        assert_eq!(c.hostname, "127.0.0.1");
        assert!(toml::from_str::<Config>("tracker_url = \"x\"").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RFCNET_PEER_NAME", "bob"),
            ("RFCNET_TRACKER_PORT", "not-a-port"),
            ("RFCNET_DOCUMENT_DIR", "/tmp/docs"),
            ("RFCNET_HEARTBEAT_INTERVAL_SECS", "0"),
            ("RFCNET_IO_TIMEOUT_SECS", "3"),
        ]);
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.name, "bob");
        assert_eq!(c.tracker_port, 65234);
        assert_eq!(c.document_dir, PathBuf::from("/tmp/docs"));
        assert_eq!(c.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(c.timeouts().io, Duration::from_secs(3));
    }
}
