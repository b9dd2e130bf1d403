//! RFC sharing network core: wire framing, message protocol, content index
//! and the directory's peer registry, plus the async plumbing both roles share.

pub mod error;
pub mod index;
pub mod integrity;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod wire;

pub use error::{Error, Result};
pub use index::{validate_document_id, ContentIndex, IndexEntry};
pub use net::{exchange, serve, Service, Timeouts};
pub use protocol::{Kind, Message, Method, PeerAddr, StatusCode};
pub use registry::{PeerRecord, Registry, StoredPeer, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
pub use wire::{encode_frame, receive, send, FrameEncodeError, MAX_FRAME_LEN};
