//! Caller-facing observer traits
//!
//! `ProtocolLogger` receives the raw client/server byte traffic,
//! `ProgressCallback` reports upload progress for large message
//! literals, and `EngineObserver` receives out-of-band engine events
//! (alerts, folders appearing outside any LIST command).

use std::fmt::Write as _;

/// Sink for the raw protocol traffic of one connection.
pub trait ProtocolLogger: Send + Sync {
    fn log_connect(&self, host: &str, port: u16);
    /// Bytes written to the server, including literal bodies.
    fn log_client(&self, bytes: &[u8]);
    /// Bytes read from the server.
    fn log_server(&self, bytes: &[u8]);
}

/// Default logger: forwards the wire traffic to `tracing::trace!`,
/// escaping control bytes so log files stay line-oriented.
#[derive(Debug, Default)]
pub struct TracingLogger;

fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            0x20..=0x7e => out.push(b as char),
            other => {
                let _ = write!(out, "\\x{other:02x}");
            }
        }
    }
    out
}

impl ProtocolLogger for TracingLogger {
    fn log_connect(&self, host: &str, port: u16) {
        tracing::debug!("connected to {host}:{port}");
    }

    fn log_client(&self, bytes: &[u8]) {
        tracing::trace!("C: {}", escape(bytes));
    }

    fn log_server(&self, bytes: &[u8]) {
        tracing::trace!("S: {}", escape(bytes));
    }
}

/// Byte-count callback invoked while a large message literal is being
/// written to the server.
pub trait ProgressCallback: Send + Sync {
    fn report(&self, bytes_sent: u64, total: u64);
}

/// Out-of-band engine events.
///
/// All methods have empty default bodies so implementors only override
/// what they care about.
pub trait EngineObserver: Send + Sync {
    /// An `ALERT` response code arrived; RFC 3501 requires the text to
    /// be shown to the user.
    fn alert(&self, _text: &str) {}

    /// A folder was observed for the first time outside any
    /// caller-issued LIST (NOTIFY-style unsolicited LIST data).
    fn folder_created(&self, _encoded_name: &str) {}
}
