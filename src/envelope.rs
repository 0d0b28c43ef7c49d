//! ENVELOPE parsing
//!
//! `ENVELOPE` is a fixed ten-slot parenthesised list: date, subject,
//! six address lists, in-reply-to, and message-id. Address lists use
//! RFC 2822 group syntax flattened into 4-tuples: a tuple with a
//! mailbox but a NIL domain opens a group, an all-NIL tuple closes it.
//!
//! Header text arrives as raw RFC 2047 words; decoding those is the
//! MIME library's job, so the fields keep the wire text.

use crate::error::{Error, Result};
use crate::token::{ImapToken, Specials};
use crate::tokenizer::Tokenizer;

/// A single RFC 2822 mailbox (`Name <mailbox@domain>`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxAddress {
    pub name: Option<String>,
    pub route: Option<String>,
    pub mailbox: String,
    pub domain: Option<String>,
}

impl MailboxAddress {
    /// The addr-spec, `mailbox@domain` or just the local part when the
    /// server withheld the domain.
    #[must_use]
    pub fn address(&self) -> String {
        self.domain.as_ref().map_or_else(
            || self.mailbox.clone(),
            |domain| format!("{}@{domain}", self.mailbox),
        )
    }
}

/// An RFC 2822 address group (`Name: member, member;`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupAddress {
    pub name: String,
    pub members: Vec<MailboxAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Mailbox(MailboxAddress),
    Group(GroupAddress),
}

/// The parsed ENVELOPE fetch attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

fn lossy(bytes: Option<Vec<u8>>) -> Option<String> {
    bytes.map(|b| String::from_utf8_lossy(&b).into_owned())
}

/// Dovecot substitutes these sentinels when a header address has no
/// domain; they are elided rather than surfaced to the caller.
fn elide_sentinel(domain: Option<String>) -> Option<String> {
    match domain.as_deref() {
        Some("MISSING_DOMAIN" | ".MISSING-HOST-NAME.") => None,
        _ => domain,
    }
}

async fn read_address_tuple(
    tokenizer: &mut Tokenizer,
) -> Result<(Option<String>, Option<String>, Option<String>, Option<String>)> {
    let name = lossy(tokenizer.read_nstring().await?);
    let route = lossy(tokenizer.read_nstring().await?);
    let mailbox = lossy(tokenizer.read_nstring().await?);
    let domain = lossy(tokenizer.read_nstring().await?);
    tokenizer.expect(&ImapToken::CloseParen).await?;
    Ok((name, route, mailbox, domain))
}

/// Parse one address list (`NIL` or a parenthesised list of 4-tuples),
/// reconstructing group structure.
pub async fn read_address_list(tokenizer: &mut Tokenizer) -> Result<Vec<Address>> {
    let mut addresses = Vec::new();
    match tokenizer.read_token(Specials::Default).await? {
        ImapToken::Nil => return Ok(addresses),
        ImapToken::OpenParen => {}
        other => {
            return Err(Error::Protocol(format!(
                "expected address list, got {}",
                other.describe()
            )));
        }
    }

    let mut group: Option<GroupAddress> = None;
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseParen => {
                // Unterminated group: keep what was collected.
                if let Some(g) = group.take() {
                    addresses.push(Address::Group(g));
                }
                return Ok(addresses);
            }
            ImapToken::OpenParen => {
                let (name, route, mailbox, domain) = read_address_tuple(tokenizer).await?;
                let starts_group = mailbox.is_some() && domain.is_none();
                let ends_group = mailbox.is_none() && domain.is_none();
                if ends_group {
                    if let Some(g) = group.take() {
                        addresses.push(Address::Group(g));
                    }
                } else if starts_group {
                    if let Some(g) = group.take() {
                        addresses.push(Address::Group(g));
                    }
                    group = Some(GroupAddress {
                        name: mailbox.unwrap_or_default(),
                        members: Vec::new(),
                    });
                } else {
                    let member = MailboxAddress {
                        name,
                        route,
                        mailbox: mailbox.unwrap_or_default(),
                        domain: elide_sentinel(domain),
                    };
                    if let Some(g) = &mut group {
                        g.members.push(member);
                    } else {
                        addresses.push(Address::Mailbox(member));
                    }
                }
            }
            // SmarterMail pads address lists with stray NILs.
            ImapToken::Nil => {}
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected {} in address list",
                    other.describe()
                )));
            }
        }
    }
}

/// Parse an ENVELOPE value; the opening paren has not been consumed.
pub async fn read_envelope(tokenizer: &mut Tokenizer) -> Result<Envelope> {
    tokenizer.expect(&ImapToken::OpenParen).await?;
    let envelope = Envelope {
        date: lossy(tokenizer.read_nstring().await?),
        subject: lossy(tokenizer.read_nstring().await?),
        from: read_address_list(tokenizer).await?,
        sender: read_address_list(tokenizer).await?,
        reply_to: read_address_list(tokenizer).await?,
        to: read_address_list(tokenizer).await?,
        cc: read_address_list(tokenizer).await?,
        bcc: read_address_list(tokenizer).await?,
        in_reply_to: lossy(tokenizer.read_nstring().await?),
        message_id: lossy(tokenizer.read_nstring().await?),
    };
    tokenizer.expect(&ImapToken::CloseParen).await?;
    Ok(envelope)
}
