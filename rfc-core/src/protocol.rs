//! Wire protocol: message model and its line-delimited text encoding.
//!
//! A message is a sequence of `'key':'value'` fields joined by `<crlf>`:
//! headers first (sorted by key), then `message_type`, then the optional
//! `method`, `status_code` and `data` fields. Absent fields are never written.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Field delimiter on the wire.
pub const DELIMITER: &str = "<crlf>";

const FIELD_KIND: &str = "message_type";
const FIELD_METHOD: &str = "method";
const FIELD_STATUS: &str = "status_code";
const FIELD_DATA: &str = "data";

/// Header carrying the session cookie on directory requests.
pub const HEADER_COOKIE: &str = "cookie";
/// Header naming the responder.
pub const HEADER_HOSTNAME: &str = "hostname";
/// Header carrying the SHA-256 of a served document.
pub const HEADER_DIGEST: &str = "sha256";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    DirectoryRequest,
    PeerRequest,
    DirectoryResponse,
    PeerResponse,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::DirectoryRequest => "REQUEST_SERVER",
            Kind::PeerRequest => "REQUEST_PEER",
            Kind::DirectoryResponse => "SERVER_RESPONSE",
            Kind::PeerResponse => "PEER_RESPONSE",
        }
    }

    pub fn is_response(self) -> bool {
        matches!(self, Kind::DirectoryResponse | Kind::PeerResponse)
    }

    /// Response kind paired with a request kind.
    pub fn response(self) -> Kind {
        match self {
            Kind::DirectoryRequest | Kind::DirectoryResponse => Kind::DirectoryResponse,
            Kind::PeerRequest | Kind::PeerResponse => Kind::PeerResponse,
        }
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "REQUEST_SERVER" => Ok(Kind::DirectoryRequest),
            "REQUEST_PEER" => Ok(Kind::PeerRequest),
            "SERVER_RESPONSE" => Ok(Kind::DirectoryResponse),
            "PEER_RESPONSE" => Ok(Kind::PeerResponse),
            other => Err(Error::bad_format(format!("unknown message type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Register,
    Leave,
    KeepAlive,
    PQuery,
    RfcQuery,
    GetRfc,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Register => "REGISTER",
            Method::Leave => "LEAVE",
            Method::KeepAlive => "KEEP_ALIVE",
            Method::PQuery => "PQUERY",
            Method::RfcQuery => "RFC_QUERY",
            Method::GetRfc => "GET_RFC",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "REGISTER" => Ok(Method::Register),
            "LEAVE" => Ok(Method::Leave),
            "KEEP_ALIVE" => Ok(Method::KeepAlive),
            "PQUERY" => Ok(Method::PQuery),
            "RFC_QUERY" => Ok(Method::RfcQuery),
            "GET_RFC" => Ok(Method::GetRfc),
            other => Err(Error::bad_format(format!("unknown method {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    BadRequest,
    Forbidden,
    NotFound,
    InternalError,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Success => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalError => 500,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(StatusCode::Success),
            400 => Some(StatusCode::BadRequest),
            403 => Some(StatusCode::Forbidden),
            404 => Some(StatusCode::NotFound),
            500 => Some(StatusCode::InternalError),
            _ => None,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Address a peer is reachable at. Written `host:port` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// A host must survive the `host:port` peer list and the index's
    /// comma-separated hosting sets.
    pub fn validate_host(host: &str) -> Result<()> {
        if host.is_empty() || host.contains(|c: char| c == ',' || c.is_whitespace()) {
            return Err(Error::bad_format(format!("invalid host {host:?}")));
        }
        Ok(())
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::bad_format(format!("address without port: {s:?}")))?;
        PeerAddr::validate_host(host)?;
        let port = port
            .parse()
            .map_err(|_| Error::bad_format(format!("invalid port in {s:?}")))?;
        Ok(PeerAddr::new(host, port))
    }
}

/// Peer list payload of a `PQUERY` response: one `host:port` per line.
pub fn encode_peer_list(peers: &[PeerAddr]) -> String {
    peers
        .iter()
        .map(PeerAddr::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn decode_peer_list(payload: &str) -> Result<Vec<PeerAddr>> {
    payload
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::parse)
        .collect()
}

/// One request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: Kind,
    pub method: Option<Method>,
    pub headers: BTreeMap<String, String>,
    /// Present on responses only.
    pub status: Option<StatusCode>,
    pub payload: String,
}

impl Message {
    pub fn request(kind: Kind, method: Method) -> Self {
        Self {
            kind,
            method: Some(method),
            headers: BTreeMap::new(),
            status: None,
            payload: String::new(),
        }
    }

    pub fn response(kind: Kind, status: StatusCode) -> Self {
        Self {
            kind: kind.response(),
            method: None,
            headers: BTreeMap::new(),
            status: Some(status),
            payload: String::new(),
        }
    }

    /// Header keys must not be `message_type`; that field ends the header block.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        debug_assert_ne!(key, FIELD_KIND);
        self.headers.insert(key, value.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(StatusCode::Success)
    }

    /// Payload of a successful response; any other status becomes [`Error::Rejected`].
    pub fn into_success(self) -> Result<String> {
        match self.status {
            Some(StatusCode::Success) => Ok(self.payload),
            Some(status) => Err(Error::Rejected {
                status,
                reason: self.payload,
            }),
            None => Err(Error::bad_format("expected a response")),
        }
    }

    pub fn encode(&self) -> String {
        let mut fields: Vec<String> = self
            .headers
            .iter()
            .map(|(k, v)| field(k, v))
            .collect();
        fields.push(field(FIELD_KIND, self.kind.as_str()));
        if let Some(method) = self.method {
            fields.push(field(FIELD_METHOD, method.as_str()));
        }
        if let Some(status) = self.status {
            fields.push(field(FIELD_STATUS, &status.code().to_string()));
        }
        if !self.payload.is_empty() {
            fields.push(field(FIELD_DATA, &self.payload));
        }
        fields.join(DELIMITER)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    pub fn decode(text: &str) -> Result<Self> {
        let mut headers = BTreeMap::new();
        let mut kind = None;
        let mut method = None;
        let mut status = None;
        let mut payload = None;
        for line in text.split(DELIMITER) {
            let (key, value) = parse_field(line)?;
            if kind.is_none() {
                if key == FIELD_KIND {
                    kind = Some(value.parse::<Kind>()?);
                } else if headers.insert(key, value).is_some() {
                    return Err(Error::bad_format("duplicate header"));
                }
                continue;
            }
            match key.as_str() {
                FIELD_METHOD if method.is_none() && status.is_none() && payload.is_none() => {
                    method = Some(value.parse::<Method>()?);
                }
                FIELD_STATUS if status.is_none() && payload.is_none() => {
                    let code = value
                        .parse::<u16>()
                        .ok()
                        .and_then(StatusCode::from_code)
                        .ok_or_else(|| Error::bad_format(format!("unknown status {value:?}")))?;
                    status = Some(code);
                }
                FIELD_DATA if payload.is_none() => payload = Some(value),
                other => return Err(Error::bad_format(format!("unexpected field {other:?}"))),
            }
        }
        let kind = kind.ok_or_else(|| Error::bad_format("missing message_type"))?;
        if kind.is_response() {
            if status.is_none() {
                return Err(Error::bad_format("response without status_code"));
            }
        } else {
            if status.is_some() {
                return Err(Error::bad_format("request with status_code"));
            }
            if method.is_none() {
                return Err(Error::bad_format("request without method"));
            }
        }
        Ok(Self {
            kind,
            method,
            headers,
            status,
            payload: payload.unwrap_or_default(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::bad_format(e.to_string()))?;
        Self::decode(text)
    }
}

fn field(key: &str, value: &str) -> String {
    format!("'{}':'{}'", escape(key), escape(value))
}

fn parse_field(line: &str) -> Result<(String, String)> {
    let inner = line
        .strip_prefix('\'')
        .and_then(|l| l.strip_suffix('\''))
        .ok_or_else(|| Error::bad_format(format!("malformed field {line:?}")))?;
    let (key, value) = inner
        .split_once("':'")
        .ok_or_else(|| Error::bad_format(format!("malformed field {line:?}")))?;
    Ok((unescape(key)?, unescape(value)?))
}

// Escaped text never contains a quote or '<', so neither the field
// separator nor the delimiter can appear inside a field.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\q"),
            '<' => out.push_str("\\l"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\\') => out.push('\\'),
                Some('q') => out.push('\''),
                Some('l') => out.push('<'),
                _ => return Err(Error::bad_format("invalid escape")),
            },
            '\'' | '<' => return Err(Error::bad_format("unescaped delimiter character")),
            c => out.push(c),
        }
    }
    Ok(out)
}
