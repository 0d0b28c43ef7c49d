//! Outgoing command formatting
//!
//! Commands are assembled from a small template language with typed
//! substitutions:
//!
//! | spec | argument | emitted as |
//! |------|----------|------------|
//! | `%d` | `Int`    | signed decimal |
//! | `%u` | `UInt`   | unsigned decimal |
//! | `%s` | `String` | atom, quoted string, or literal, whichever is the smallest legal form |
//! | `%S` | `String` | quoted string or literal, never a bare atom |
//! | `%F` | `Mailbox`| mailbox name, modified UTF-7 unless `UTF8=ACCEPT` is enabled |
//! | `%L` | `Literal`| counted literal |
//! | `%M` | `Message`| counted literal with upload progress reporting |
//! | `%%` | --       | a percent sign |
//!
//! Literals split the command into parts; the engine emits each
//! literal's `{n}` / `{n+}` header at send time, when the negotiated
//! capabilities are known.

use crate::error::{Error, Result};
use crate::logger::ProgressCallback;
use crate::utf7;
use std::fmt;
use std::sync::Arc;

/// A literal body within a command.
pub struct LiteralPart {
    pub bytes: Vec<u8>,
    pub progress: Option<Arc<dyn ProgressCallback>>,
}

impl LiteralPart {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for LiteralPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiteralPart")
            .field("len", &self.bytes.len())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// One segment of an outgoing command. Literals appear only at part
/// boundaries; the trailing CRLF always ends a text part.
#[derive(Debug)]
pub enum Part {
    Text(Vec<u8>),
    Literal(LiteralPart),
}

/// A typed substitution for one template specifier.
pub enum CommandArg {
    Int(i64),
    UInt(u64),
    String(String),
    Mailbox(String),
    Literal(Vec<u8>),
    Message {
        bytes: Vec<u8>,
        progress: Option<Arc<dyn ProgressCallback>>,
    },
}

impl fmt::Debug for CommandArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "Int({v})"),
            Self::UInt(v) => write!(f, "UInt({v})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Mailbox(s) => write!(f, "Mailbox({s:?})"),
            Self::Literal(b) => write!(f, "Literal({} octets)", b.len()),
            Self::Message { bytes, .. } => write!(f, "Message({} octets)", bytes.len()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StringForm {
    Atom,
    Quoted,
    Literal,
}

/// Decide the smallest legal wire form for a string argument.
fn classify(bytes: &[u8]) -> StringForm {
    if bytes.is_empty() {
        return StringForm::Quoted;
    }
    let mut quoted = false;
    for &b in bytes {
        match b {
            b'\r' | b'\n' | 0x80..=0xff | 0x00 => return StringForm::Literal,
            b'"' | b'\\' | b' ' | b'(' | b')' | b'{' | b'%' | b'*' | b'[' | b']'
            | 0x01..=0x1f | 0x7f => quoted = true,
            _ => {}
        }
    }
    if quoted {
        StringForm::Quoted
    } else {
        StringForm::Atom
    }
}

fn push_quoted(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'"');
    for &b in bytes {
        if b == b'"' || b == b'\\' {
            out.push(b'\\');
        }
        out.push(b);
    }
    out.push(b'"');
}

fn push_string(
    parts: &mut Vec<Part>,
    text: &mut Vec<u8>,
    bytes: Vec<u8>,
    allow_atom: bool,
) {
    match classify(&bytes) {
        StringForm::Atom if allow_atom => text.extend_from_slice(&bytes),
        StringForm::Atom | StringForm::Quoted => push_quoted(text, &bytes),
        StringForm::Literal => {
            parts.push(Part::Text(std::mem::take(text)));
            parts.push(Part::Literal(LiteralPart {
                bytes,
                progress: None,
            }));
        }
    }
}

/// Expand a command template into its wire parts.
///
/// `utf8_enabled` reflects a successful `ENABLE UTF8=ACCEPT`: mailbox
/// names are then sent as raw UTF-8 instead of modified UTF-7.
pub fn build_parts(
    template: &str,
    args: Vec<CommandArg>,
    utf8_enabled: bool,
) -> Result<Vec<Part>> {
    use std::fmt::Write as _;

    let mut parts = Vec::new();
    let mut text: Vec<u8> = Vec::new();
    let mut args = args.into_iter();
    let mut next_arg = |spec: char| {
        args.next()
            .ok_or_else(|| Error::Argument(format!("missing argument for %{spec}")))
    };

    let mut template_bytes = template.bytes();
    while let Some(byte) = template_bytes.next() {
        if byte != b'%' {
            text.push(byte);
            continue;
        }
        let Some(spec) = template_bytes.next() else {
            return Err(Error::Argument("dangling % in command template".into()));
        };
        match spec {
            b'%' => text.push(b'%'),
            b'd' => {
                let CommandArg::Int(value) = next_arg('d')? else {
                    return Err(Error::Argument("%d expects an Int argument".into()));
                };
                let mut s = String::new();
                let _ = write!(s, "{value}");
                text.extend_from_slice(s.as_bytes());
            }
            b'u' => {
                let CommandArg::UInt(value) = next_arg('u')? else {
                    return Err(Error::Argument("%u expects a UInt argument".into()));
                };
                let mut s = String::new();
                let _ = write!(s, "{value}");
                text.extend_from_slice(s.as_bytes());
            }
            b's' | b'S' => {
                let CommandArg::String(value) = next_arg(spec as char)? else {
                    return Err(Error::Argument("%s expects a String argument".into()));
                };
                push_string(&mut parts, &mut text, value.into_bytes(), spec == b's');
            }
            b'F' => {
                let CommandArg::Mailbox(name) = next_arg('F')? else {
                    return Err(Error::Argument("%F expects a Mailbox argument".into()));
                };
                let encoded = if utf8_enabled {
                    name.into_bytes()
                } else {
                    utf7::encode(&name)
                };
                push_string(&mut parts, &mut text, encoded, true);
            }
            b'L' => {
                let CommandArg::Literal(bytes) = next_arg('L')? else {
                    return Err(Error::Argument("%L expects a Literal argument".into()));
                };
                parts.push(Part::Text(std::mem::take(&mut text)));
                parts.push(Part::Literal(LiteralPart {
                    bytes,
                    progress: None,
                }));
            }
            b'M' => {
                let CommandArg::Message { bytes, progress } = next_arg('M')? else {
                    return Err(Error::Argument("%M expects a Message argument".into()));
                };
                parts.push(Part::Text(std::mem::take(&mut text)));
                parts.push(Part::Literal(LiteralPart { bytes, progress }));
            }
            other => {
                return Err(Error::Argument(format!(
                    "unknown template specifier %{}",
                    other as char
                )));
            }
        }
    }
    if args.next().is_some() {
        return Err(Error::Argument("too many command arguments".into()));
    }
    if !text.is_empty() {
        parts.push(Part::Text(text));
    }
    Ok(parts)
}

/// Serialized size estimate: text plus, for each literal, its body and
/// a `{nnn+}`-sized header. Used when splitting UID sets under the
/// per-server command length limit.
#[must_use]
pub fn estimated_length(parts: &[Part]) -> usize {
    parts
        .iter()
        .map(|part| match part {
            Part::Text(t) => t.len(),
            Part::Literal(l) => {
                let digits = l.len().max(1).ilog10() as usize + 1;
                l.len() + digits + 4
            }
        })
        .sum()
}
