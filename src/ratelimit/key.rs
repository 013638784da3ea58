//! Client identity and rate limit key derivation.

use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

use super::rules::RateLimitConfig;

/// Address used when a request carries no usable client address.
pub const UNKNOWN_IP: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Hex characters of the token digest kept in a key.
const TOKEN_HASH_LEN: usize = 16;

/// An already-authenticated caller.
///
/// Authentication layers insert this into the request extensions; the
/// limiter only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The parts of an HTTP request the limiter looks at.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub remote_addr: Option<IpAddr>,
    pub identity: Option<Identity>,
}

impl RequestInfo {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            remote_addr: None,
            identity: None,
        }
    }

    /// Add a header. Names or values that are not valid HTTP are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A stable identifier for whoever is making requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Derive the key for a request.
    ///
    /// Authenticated users are keyed by id when `limit_per_user` is set.
    /// Everyone else is keyed by address, with bearer tokens hashed into
    /// the key so that several tokens behind one address get separate
    /// buckets.
    pub fn resolve(request: &RequestInfo, config: &RateLimitConfig) -> Self {
        if config.limit_per_user {
            if let Some(identity) = &request.identity {
                if !identity.id.is_empty() {
                    return Self(format!("user:{}", identity.id));
                }
            }
        }

        let ip = client_ip(request);
        match bearer_token(request) {
            Some(token) => Self(format!("ip:{},token:{}", ip, token_fingerprint(token))),
            None => Self(format!("ip:{}", ip)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Best guess at the originating client address.
///
/// Proxy headers win over the transport address: the first
/// `X-Forwarded-For` entry, then `X-Real-IP`, then the peer.
pub fn client_ip(request: &RequestInfo) -> String {
    if let Some(forwarded) = request.header(X_FORWARDED_FOR) {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }

    if let Some(real_ip) = request.header(X_REAL_IP).map(str::trim) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    request
        .remote_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// The token of a `Bearer` authorization header, possibly empty.
fn bearer_token(request: &RequestInfo) -> Option<&str> {
    let value = request.header(AUTHORIZATION.as_str())?.trim();
    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

fn token_fingerprint(token: &str) -> String {
    if token.is_empty() {
        return "anonymous".to_string();
    }
    let digest = Sha256::digest(token.as_bytes());
    let mut fingerprint = hex::encode(digest);
    fingerprint.truncate(TOKEN_HASH_LEN);
    fingerprint
}
