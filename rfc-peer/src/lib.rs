//! Peer node for the RFC sharing network. Serves its content index and owned
//! documents to other peers, and fetches documents from them.

use std::sync::Arc;

use rfc_core::ContentIndex;
use tokio::sync::Mutex;

pub mod config;
pub mod documents;
pub mod node;
pub mod server;

pub use documents::DocumentStore;
pub use node::{run_keepalive, PeerNode};
pub use server::PeerServer;

/// Content index shared by the server and client roles of one node.
pub type SharedIndex = Arc<Mutex<ContentIndex>>;
