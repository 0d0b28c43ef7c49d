//! Queued commands and their per-command handlers

use crate::capability::CapabilitySets;
use crate::fetch::MessageAttributes;
use crate::flag::FlagSet;
use crate::folder::FolderId;
use crate::format::{CommandArg, Part, build_parts};
use crate::listing::{ListResponse, NamespaceLists, StatusResponse};
use crate::response::{Response, ResponseCode, ResponseKind};
use crate::thread::ThreadNode;
use crate::uidset::UniqueIdSet;
use crate::error::Result;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// One parsed untagged server response, routed to the active command's
/// handlers (or the engine defaults) in receipt order.
#[derive(Debug)]
pub enum UntaggedResponse {
    /// CAPABILITY data; already applied to the engine's sets when the
    /// handler runs.
    Capabilities(CapabilitySets),
    Enabled(Vec<String>),
    Flags(FlagSet),
    Exists(u32),
    Recent(u32),
    /// 1-based message sequence number being removed.
    Expunge(u32),
    Fetch(MessageAttributes),
    Vanished {
        earlier: bool,
        uids: UniqueIdSet,
    },
    List(ListResponse),
    Lsub(ListResponse),
    Status(StatusResponse),
    Namespace(NamespaceLists),
    Search(Vec<u32>),
    Sort(Vec<u32>),
    Thread(Vec<ThreadNode>),
    /// `* ID (key value ...)` or `* ID NIL`.
    Id(Option<Vec<(String, Option<String>)>>),
    Metadata {
        mailbox: String,
        entries: Vec<(String, Option<Vec<u8>>)>,
    },
    /// Untagged OK / NO / BAD carrying a response code and text.
    State {
        kind: ResponseKind,
        codes: Vec<ResponseCode>,
        text: String,
    },
    /// An atom the engine has no parser for; the line was skipped.
    Unknown(String),
}

impl UntaggedResponse {
    /// The atom a per-command handler registers under to receive this
    /// response.
    #[must_use]
    pub const fn routing_atom(&self) -> &'static str {
        match self {
            Self::Capabilities(_) => "CAPABILITY",
            Self::Enabled(_) => "ENABLED",
            Self::Flags(_) => "FLAGS",
            Self::Exists(_) => "EXISTS",
            Self::Recent(_) => "RECENT",
            Self::Expunge(_) => "EXPUNGE",
            Self::Fetch(_) => "FETCH",
            Self::Vanished { .. } => "VANISHED",
            Self::List(_) => "LIST",
            Self::Lsub(_) => "LSUB",
            Self::Status(_) => "STATUS",
            Self::Namespace(_) => "NAMESPACE",
            Self::Search(_) => "SEARCH",
            Self::Sort(_) => "SORT",
            Self::Thread(_) => "THREAD",
            Self::Id(_) => "ID",
            Self::Metadata { .. } => "METADATA",
            Self::State { .. } => "STATE",
            Self::Unknown(_) => "",
        }
    }
}

/// Per-command override for one untagged response atom. Overrides take
/// precedence over the engine defaults for the duration of the command.
pub type UntaggedHandler =
    Box<dyn FnMut(&mut Command, &UntaggedResponse) -> Result<()> + Send>;

/// Invoked for each `+` continuation line; the returned bytes are
/// written to the server followed by CRLF. Used by the SASL driver.
pub type ContinuationHandler = Box<dyn FnMut(&mut Command, &[u8]) -> Result<Vec<u8>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandStatus {
    Queued,
    Active,
    Complete,
}

/// One enqueued protocol command.
pub struct Command {
    pub(crate) tag: u32,
    pub(crate) tag_text: String,
    name: String,
    pub(crate) parts: Vec<Part>,
    pub(crate) status: CommandStatus,
    pub cancellation: CancellationToken,
    pub(crate) response: Option<Response>,
    handlers: HashMap<String, UntaggedHandler>,
    pub(crate) continuation: Option<ContinuationHandler>,
    /// Whether a LIST issued by this command asked the server for
    /// subscription state (RETURN (SUBSCRIBED)); controls the
    /// \Subscribed merge rule.
    pub list_returns_subscribed: bool,
    pub(crate) bye: bool,
    pub(crate) logout: bool,
    pub(crate) folder: Option<FolderId>,
    /// Response codes accumulated from untagged OK/NO/BAD lines seen
    /// while this command was in flight; merged into the final
    /// `Response`.
    pub(crate) resp_codes: Vec<ResponseCode>,
    /// Scratch space for handlers to accumulate results into.
    pub user_data: Option<Box<dyn Any + Send>>,
}

impl Command {
    /// Build a command from a template (see `format.rs`).
    ///
    /// `utf8_enabled` must reflect the engine's state so `%F` mailbox
    /// arguments pick the right encoding.
    pub fn new(template: &str, args: Vec<CommandArg>, utf8_enabled: bool) -> Result<Self> {
        if !template.ends_with("\r\n") {
            return Err(crate::error::Error::Argument(
                "command template must end with CRLF".into(),
            ));
        }
        let parts = build_parts(template, args, utf8_enabled)?;
        let name: String = template
            .split(|c: char| c == '%' || c == '\r')
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        let logout = name.eq_ignore_ascii_case("LOGOUT");
        Ok(Self {
            tag: 0,
            tag_text: String::new(),
            name,
            parts,
            status: CommandStatus::Queued,
            cancellation: CancellationToken::new(),
            response: None,
            handlers: HashMap::new(),
            continuation: None,
            list_returns_subscribed: false,
            bye: false,
            logout,
            folder: None,
            resp_codes: Vec::new(),
            user_data: None,
        })
    }

    /// The leading command words, e.g. `UID FETCH`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full tag string, assigned when the command is enqueued.
    #[must_use]
    pub fn tag_text(&self) -> &str {
        &self.tag_text
    }

    #[must_use]
    pub const fn status(&self) -> CommandStatus {
        self.status
    }

    #[must_use]
    pub const fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Whether the server said BYE while this command was in flight.
    #[must_use]
    pub const fn saw_bye(&self) -> bool {
        self.bye
    }

    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    /// Register an untagged handler for `atom` (case-insensitive),
    /// overriding the engine default for this command's lifetime.
    pub fn on_untagged(
        &mut self,
        atom: &str,
        handler: impl FnMut(&mut Self, &UntaggedResponse) -> Result<()> + Send + 'static,
    ) {
        self.handlers
            .insert(atom.to_ascii_uppercase(), Box::new(handler));
    }

    pub fn set_continuation(
        &mut self,
        handler: impl FnMut(&mut Self, &[u8]) -> Result<Vec<u8>> + Send + 'static,
    ) {
        self.continuation = Some(Box::new(handler));
    }

    /// Status only moves forward.
    pub(crate) fn advance_status(&mut self, status: CommandStatus) {
        debug_assert!(status >= self.status, "command status went backwards");
        self.status = status;
    }

    pub(crate) fn has_handler(&self, atom: &str) -> bool {
        self.handlers.contains_key(atom)
    }

    pub(crate) fn take_handler(&mut self, atom: &str) -> Option<UntaggedHandler> {
        self.handlers.remove(atom)
    }

    pub(crate) fn put_handler(&mut self, atom: String, handler: UntaggedHandler) {
        self.handlers.insert(atom, handler);
    }

    /// Typed access to `user_data`.
    pub fn user_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut()?.downcast_mut()
    }

    /// Take the accumulated user data out after the command completed.
    pub fn take_user_data<T: 'static>(&mut self) -> Option<Box<T>> {
        let data = self.user_data.take()?;
        match data.downcast() {
            Ok(t) => Some(t),
            Err(other) => {
                self.user_data = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("tag", &self.tag_text)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("parts", &self.parts.len())
            .finish()
    }
}
