//! Network plumbing shared by both server roles: one accept loop with a
//! pluggable per-role [`Service`], and the client side of a single exchange.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{Kind, Message, PeerAddr, HEADER_HOSTNAME};
use crate::wire;

/// Bounds on client-initiated exchanges and on reading inbound requests.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            io: Duration::from_secs(30),
        }
    }
}

/// What a server role does with one decoded request.
pub trait Service: Send + Sync + 'static {
    /// Kind stamped on every response, error responses included.
    fn response_kind(&self) -> Kind;

    /// Advertised name, sent in the `hostname` header of responses.
    fn hostname(&self) -> &str;

    fn call(&self, request: Message) -> impl Future<Output = Result<Message>> + Send;
}

/// Error turned into a response; handlers never let an error escape.
pub fn error_response(kind: Kind, err: &Error) -> Message {
    Message::response(kind, err.status()).with_payload(err.to_string())
}

/// Accept connections until `shutdown` fires, one task per connection.
/// In-flight connections are left to finish.
pub async fn serve<S: Service>(
    listener: TcpListener,
    service: Arc<S>,
    shutdown: Arc<Notify>,
    io_timeout: Duration,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("listening on {}", addr);
    }
    let stop = shutdown.notified();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, from)) => {
                    let service = service.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, from, service.as_ref(), io_timeout).await;
                    });
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                }
            },
            _ = &mut stop => {
                info!("shutdown requested, closing listener");
                break;
            }
        }
    }
}

async fn handle_connection<S: Service>(
    mut stream: TcpStream,
    from: SocketAddr,
    service: &S,
    io_timeout: Duration,
) {
    let response = match timeout(io_timeout, wire::receive(&mut stream)).await {
        Ok(Ok(bytes)) => respond(service, &bytes).await,
        Ok(Err(Error::Transport(e))) => {
            debug!("connection from {} dropped: {}", from, e);
            return;
        }
        Ok(Err(e)) => error_response(service.response_kind(), &e),
        Err(_) => {
            debug!("connection from {} timed out before sending a request", from);
            return;
        }
    };
    let mut bytes = response
        .with_header(HEADER_HOSTNAME, service.hostname())
        .to_bytes();
    if bytes.len() > wire::MAX_FRAME_LEN as usize {
        warn!("response to {} is {} bytes, over the frame limit", from, bytes.len());
        let err = Error::Internal(format!("response of {} bytes is too large", bytes.len()));
        bytes = error_response(service.response_kind(), &err)
            .with_header(HEADER_HOSTNAME, service.hostname())
            .to_bytes();
    }
    if let Err(e) = timeout(io_timeout, wire::send(&mut stream, &bytes))
        .await
        .map_err(Error::from)
        .and_then(|sent| sent)
    {
        debug!("failed to answer {}: {}", from, e);
    }
}

async fn respond<S: Service>(service: &S, bytes: &[u8]) -> Message {
    let request = match Message::from_bytes(bytes) {
        Ok(request) if request.kind.is_response() => {
            let err = Error::BadFormat("expected a request".into());
            return error_response(service.response_kind(), &err);
        }
        Ok(request) => request,
        Err(e) => return error_response(service.response_kind(), &e),
    };
    let method = request.method;
    match service.call(request).await {
        Ok(response) => response,
        Err(e) => {
            debug!("request {:?} failed: {}", method, e);
            error_response(service.response_kind(), &e)
        }
    }
}

/// Connect, send one request and wait for its response.
pub async fn exchange(addr: &PeerAddr, request: &Message, timeouts: Timeouts) -> Result<Message> {
    let mut stream = timeout(
        timeouts.connect,
        TcpStream::connect((addr.host.as_str(), addr.port)),
    )
    .await??;
    timeout(timeouts.io, wire::send(&mut stream, &request.to_bytes())).await??;
    let bytes = timeout(timeouts.io, wire::receive(&mut stream)).await??;
    let response = Message::from_bytes(&bytes)?;
    if !response.kind.is_response() {
        return Err(Error::BadFormat("expected a response".into()));
    }
    Ok(response)
}
