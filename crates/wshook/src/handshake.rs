//! WebSocket HTTP upgrade handshake (RFC 6455 Section 4.2).
//!
//! Extracts the client's `Sec-WebSocket-Key` from a raw request chunk,
//! computes the `Sec-WebSocket-Accept` value and builds the fixed
//! `101 Switching Protocols` response. Method, path and every other header
//! are ignored.
//!
//! - [`parse_client_key`]: First `Sec-WebSocket-Key` value in the request
//! - [`compute_accept_key`]: SHA-1 + Base64 computation per RFC 6455 Section 4.2.2
//! - [`build_response`]: The byte-exact 101 response
//! - [`HandshakeRequest`]: All `name: value` header lines of a request

use std::borrow::Cow;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;

/// RFC 6455 magic GUID concatenated with the client key for Sec-WebSocket-Accept.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "sec-websocket-key";

/// Iterate the `(name, value)` pairs of a raw request.
///
/// Lines are split on `\n` with trailing whitespace (including `\r`)
/// removed, then split once on the first `": "`. Lines without that
/// separator, such as the request line, are skipped.
fn header_lines(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.lines()
        .map(str::trim_end)
        .filter_map(|line| line.split_once(": "))
}

fn lossy(buf: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(buf)
}

/// Find the client key in a raw upgrade request.
///
/// The header name is matched case-insensitively and scanning stops at the
/// first match. An empty value counts as missing.
pub fn parse_client_key(buf: &[u8]) -> Result<String, HandshakeError> {
    let text = lossy(buf);
    let value = header_lines(&text)
        .find(|(name, _)| name.eq_ignore_ascii_case(KEY_HEADER))
        .map(|(_, value)| value.trim_end())
        .ok_or(HandshakeError::MissingKey)?;

    if value.is_empty() {
        return Err(HandshakeError::MissingKey);
    }
    Ok(value.to_string())
}

/// Compute the `Sec-WebSocket-Accept` value per RFC 6455 Section 4.2.2.
///
/// Concatenates `client_key` + [`WS_GUID`], SHA-1 hashes, then Base64 encodes.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// Build the `101 Switching Protocols` response.
pub fn build_response(accept_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key
    )
    .into_bytes()
}

/// Header lines of an upgrade request keyed by lower-cased name.
///
/// The first occurrence of a header wins, matching [`parse_client_key`].
#[derive(Debug, Default, Clone)]
pub struct HandshakeRequest {
    headers: FxHashMap<String, String>,
}

impl HandshakeRequest {
    pub fn parse(buf: &[u8]) -> HandshakeRequest {
        let text = lossy(buf);
        let mut headers = FxHashMap::default();
        for (name, value) in header_lines(&text) {
            headers
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.trim_end().to_string());
        }
        HandshakeRequest { headers }
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn client_key(&self) -> Result<&str, HandshakeError> {
        match self.header(KEY_HEADER) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(HandshakeError::MissingKey),
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}
