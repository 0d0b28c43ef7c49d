#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! IMAP4rev1 client protocol engine
//!
//! The engine owns the network connection to a mail server, tokenises
//! the response stream, drives a request/response command pipeline,
//! and dispatches untagged events to the right mailbox context. It
//! deliberately stops below the message level: MIME parsing, SASL
//! mechanism implementations, and the high-level folder/message API
//! are consumers of this crate, not part of it.

mod body;
mod cache;
mod capability;
mod command;
mod config;
mod engine;
mod envelope;
mod error;
mod fetch;
mod flag;
mod folder;
mod format;
mod listing;
mod logger;
mod quirks;
mod response;
mod sasl;
mod stream;
mod thread;
mod token;
mod tokenizer;
mod uidset;
pub mod utf7;

pub use body::{BodyExtensions, BodyFields, BodyStructure, Multipart};
pub use capability::{AccessRights, Capabilities, CapabilitySets, ThreadAlgo};
pub use command::{Command, CommandStatus, UntaggedResponse};
pub use config::{ImapConfig, SecureSocketOptions};
pub use engine::{EngineState, ImapEngine, ProtocolVersion};
pub use envelope::{Address, Envelope, GroupAddress, MailboxAddress};
pub use error::{Error, Result};
pub use fetch::{BodySection, MessageAttributes};
pub use flag::{FlagSet, MessageFlags};
pub use folder::{Folder, FolderAttributes, FolderCache, FolderId};
pub use format::CommandArg;
pub use listing::{ListResponse, NamespaceEntry, NamespaceLists, StatusResponse};
pub use logger::{EngineObserver, ProgressCallback, ProtocolLogger, TracingLogger};
pub use quirks::QuirksMode;
pub use response::{MetadataCode, Response, ResponseCode, ResponseKind};
pub use sasl::SaslMechanism;
pub use stream::{CertificateValidator, TlsValidation, Transport};
pub use thread::ThreadNode;
pub use uidset::{UniqueId, UniqueIdSet};
