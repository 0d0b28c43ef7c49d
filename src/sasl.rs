//! SASL mechanism interface
//!
//! Mechanism implementations live outside this crate; the engine only
//! drives the AUTHENTICATE exchange: optional initial response (when
//! the server advertises SASL-IR), then one `respond` call per `+`
//! challenge line. All payloads cross the wire base64-encoded.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// One client-side SASL mechanism.
pub trait SaslMechanism: Send {
    /// The registered mechanism name, e.g. `PLAIN`, `XOAUTH2`.
    fn mechanism_name(&self) -> &str;

    /// Whether the mechanism can send data before the first server
    /// challenge (RFC 4959 initial response).
    fn supports_initial_response(&self) -> bool;

    /// Produce the reply to a server challenge. The initial response
    /// is requested with an empty challenge.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;

    /// Whether the exchange reached a state the mechanism considers
    /// complete.
    fn is_authenticated(&self) -> bool;
}

/// Decode the payload of a `+ <base64>` continuation line.
pub(crate) fn decode_challenge(line: &[u8]) -> Result<Vec<u8>> {
    let trimmed: Vec<u8> = line
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    STANDARD
        .decode(&trimmed)
        .map_err(|e| Error::Authentication(format!("malformed SASL challenge: {e}")))
}

pub(crate) fn encode_response(payload: &[u8]) -> Vec<u8> {
    STANDARD.encode(payload).into_bytes()
}
