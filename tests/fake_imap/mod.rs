//! Fake IMAP server for integration testing
//!
//! An in-process server that speaks enough of the protocol to carry
//! `ImapEngine` through its full lifecycle:
//!
//! TCP -> greeting -> CAPABILITY -> STARTTLS -> TLS handshake ->
//! AUTHENTICATE/LOGIN -> commands -> IDLE -> LOGOUT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and the command loop
//! - `handlers/` -- one file per IMAP command
//! - `mailbox` -- test data model (folders, emails, builder)
//! - `io` -- shared write helpers

mod handlers;
mod server;

pub use mailbox::MailboxBuilder;
pub use server::FakeImapServer;
