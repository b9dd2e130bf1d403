//! Load tracker config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use rfc_core::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};

/// Tracker configuration. File: ~/.config/rfcnet/tracker.toml or /etc/rfcnet/tracker.toml.
/// Env overrides: RFCNET_TRACKER_HOST, RFCNET_TRACKER_HOSTNAME, RFCNET_TRACKER_PORT,
/// RFCNET_TTL_SECS, RFCNET_SWEEP_INTERVAL_SECS, RFCNET_STORE_PATH, RFCNET_RESUME.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Bind address (default 0.0.0.0).
    #[serde(default = "default_host")]
    pub host: String,
    /// Name sent in the `hostname` header of responses (default 127.0.0.1).
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Well-known listen port (default 65234).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Liveness budget per renewal, seconds (default 7200).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Sweep period, seconds (default 5).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Peer directory checkpoint (default rfcnet-peers.json).
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Reload the checkpoint at startup instead of starting clean.
    #[serde(default)]
    pub resume: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_hostname() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    65234
}
fn default_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("rfcnet-peers.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            hostname: default_hostname(),
            port: default_port(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            store_path: default_store_path(),
            resume: false,
        }
    }
}

impl Config {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Never zero; a zero period would make the sweeper spin.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("RFCNET_TRACKER_HOST") {
        c.host = s;
    }
    if let Some(s) = var("RFCNET_TRACKER_HOSTNAME") {
        c.hostname = s;
    }
    if let Some(p) = var("RFCNET_TRACKER_PORT").and_then(|s| s.parse().ok()) {
        c.port = p;
    }
    if let Some(t) = var("RFCNET_TTL_SECS").and_then(|s| s.parse().ok()) {
        c.ttl_secs = t;
    }
    if let Some(t) = var("RFCNET_SWEEP_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
        c.sweep_interval_secs = t;
    }
    if let Some(s) = var("RFCNET_STORE_PATH") {
        c.store_path = PathBuf::from(s);
    }
    if let Some(r) = var("RFCNET_RESUME").and_then(|s| s.parse().ok()) {
        c.resume = r;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/rfcnet/tracker.toml"));
    }
    out.push(PathBuf::from("/etc/rfcnet/tracker.toml"));
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
