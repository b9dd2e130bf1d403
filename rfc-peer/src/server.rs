//! Server role: answers index queries and document fetches from other peers.

use std::future::Future;
use std::sync::Arc;

use rfc_core::integrity;
use rfc_core::protocol::HEADER_DIGEST;
use rfc_core::{
    validate_document_id, Error, Kind, Message, Method, PeerAddr, Result, Service, StatusCode,
};
use tracing::debug;

use crate::documents::DocumentStore;
use crate::SharedIndex;

pub struct PeerServer {
    index: SharedIndex,
    documents: Arc<DocumentStore>,
    advertised: PeerAddr,
}

impl PeerServer {
    pub fn new(index: SharedIndex, documents: Arc<DocumentStore>, advertised: PeerAddr) -> Self {
        Self {
            index,
            documents,
            advertised,
        }
    }

    async fn dispatch(&self, request: Message) -> Result<Message> {
        if request.kind != Kind::PeerRequest {
            return Err(Error::BadFormat("expected a peer request".into()));
        }
        let ok = Message::response(Kind::PeerResponse, StatusCode::Success);
        match request.method {
            Some(Method::RfcQuery) => {
                // snapshot under the lock so local mutations never interleave
                let payload = self.index.lock().await.to_wire(&self.advertised);
                Ok(ok.with_payload(payload))
            }
            Some(Method::GetRfc) => {
                // ids never contain whitespace, so a trailing newline is just framing noise
                let id = request.payload.trim();
                validate_document_id(id)?;
                if !self.index.lock().await.is_owned(id) {
                    return Err(Error::NotFound(id.to_string()));
                }
                let body = self.documents.read(id).await?;
                debug!("serving {} ({} bytes)", id, body.len());
                Ok(ok
                    .with_header(HEADER_DIGEST, integrity::digest_hex(body.as_bytes()))
                    .with_payload(body))
            }
            Some(other) => Err(Error::BadFormat(format!("unsupported method {other}"))),
            None => Err(Error::BadFormat("missing method".into())),
        }
    }
}

impl Service for PeerServer {
    fn response_kind(&self) -> Kind {
        Kind::PeerResponse
    }

    fn hostname(&self) -> &str {
        &self.advertised.host
    }

    fn call(&self, request: Message) -> impl Future<Output = Result<Message>> + Send {
        self.dispatch(request)
    }
}
