//! IMAP connection configuration

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// How the connection should be secured.
///
/// `Auto` picks `SslOnConnect` for port 993 and
/// `StartTlsWhenAvailable` for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureSocketOptions {
    /// Cleartext, never upgrade.
    None,
    /// Decide from the port number.
    Auto,
    /// TLS handshake immediately after the TCP connect.
    SslOnConnect,
    /// STARTTLS; fail if the server does not advertise it.
    StartTls,
    /// STARTTLS if the server advertises it, cleartext otherwise.
    StartTlsWhenAvailable,
}

impl SecureSocketOptions {
    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "auto" => Ok(Self::Auto),
            "ssl" | "ssl-on-connect" => Ok(Self::SslOnConnect),
            "starttls" => Ok(Self::StartTls),
            "starttls-when-available" => Ok(Self::StartTlsWhenAvailable),
            other => Err(Error::Argument(format!("unknown security mode: {other}"))),
        }
    }
}

/// IMAP connection configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    /// Port `0` selects the default for the security mode (993 for
    /// TLS-on-connect, 143 otherwise).
    pub port: u16,
    pub security: SecureSocketOptions,
    pub username: String,
    pub password: String,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl ImapConfig {
    /// Configuration with library defaults for everything but the
    /// endpoint and credentials.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            security: SecureSocketOptions::Auto,
            username: username.into(),
            password: password.into(),
            read_timeout: Some(Duration::from_secs(120)),
            write_timeout: Some(Duration::from_secs(120)),
        }
    }

    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_PORT` (default: `0`, i.e. derived from security mode)
    /// - `IMAP_SECURITY` (default: `auto`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("IMAP_PORT")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|e| Error::Argument(format!("Invalid IMAP_PORT: {e}")))?,
            security: env::var("IMAP_SECURITY")
                .map_or(Ok(SecureSocketOptions::Auto), |s| {
                    SecureSocketOptions::parse(&s)
                })?,
            username: env::var("IMAP_USERNAME")
                .map_err(|_| Error::Argument("IMAP_USERNAME not set".into()))?,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Argument("IMAP_PASSWORD not set".into()))?,
            read_timeout: Some(Duration::from_secs(120)),
            write_timeout: Some(Duration::from_secs(120)),
        })
    }

    /// The effective port and security mode after defaulting.
    ///
    /// Port 0 with `SslOnConnect` means 993, otherwise 143. `Auto` on
    /// port 993 means `SslOnConnect`, on any other port
    /// `StartTlsWhenAvailable`.
    pub fn resolve(&self) -> Result<(u16, SecureSocketOptions)> {
        if self.host.is_empty() {
            return Err(Error::Argument("host must not be empty".into()));
        }
        let security = match self.security {
            SecureSocketOptions::Auto => {
                if self.port == 993 {
                    SecureSocketOptions::SslOnConnect
                } else {
                    SecureSocketOptions::StartTlsWhenAvailable
                }
            }
            other => other,
        };
        let port = if self.port == 0 {
            if security == SecureSocketOptions::SslOnConnect {
                993
            } else {
                143
            }
        } else {
            self.port
        };
        Ok((port, security))
    }
}
