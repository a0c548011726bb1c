//! Per-request API key resolution.
//!
//! An explicitly constructed resolver instance is handed to the transport
//! endpoint; there is no process-wide singleton, so independent server
//! instances (and tests) can carry different default keys in one process.
//!
//! Precedence, first match wins:
//! 1. dedicated `x-google-maps-api-key` request header;
//! 2. `authorization: Bearer <key>` header;
//! 3. the session's stored key override;
//! 4. the process-wide default injected at construction.
//!
//! "No key" is represented (`None`), never signaled as an error: a present
//! but empty header still wins the race with `Some("")`, which downstream
//! code treats as a distinct (invalid) credential rather than absence.

use axum::http::HeaderMap;
use gmaps_common::API_KEY_HEADER;

#[derive(Debug, Clone)]
pub struct ApiKeyResolver {
    default_key: Option<String>,
}

impl ApiKeyResolver {
    pub fn new(default_key: Option<String>) -> Self {
        Self { default_key }
    }

    /// The key carried by the request itself (precedence steps 1-2 only).
    /// This is what refreshes a session's stored override.
    pub fn request_key(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(value) = header_str(headers, API_KEY_HEADER) {
            return Some(value.to_string());
        }
        bearer_token(headers)
    }

    /// Full four-step resolution. Pure: no I/O, no side effects, no panics.
    pub fn resolve(&self, headers: &HeaderMap, session_override: Option<&str>) -> Option<String> {
        if let Some(key) = self.request_key(headers) {
            return Some(key);
        }
        if let Some(key) = session_override {
            return Some(key.to_string());
        }
        self.default_key.clone()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = header_str(headers, "authorization")?;
    let (scheme, token) = auth.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim().to_string())
    } else {
        None
    }
}
