//! Directory service (tracker) for the RFC sharing network.

pub mod config;
pub mod service;
pub mod store;

pub use service::{run_sweeper, Tracker};
pub use store::{JsonFileStore, MemoryStore, PeerStore, StoreError};
