//! THREAD response trees
//!
//! `* THREAD (2)(3 6 (4 23)(44 7 96))` -- each top-level parenthesised
//! group is a thread; nesting expresses the reply hierarchy. A parent
//! the server could not resolve appears as a node without a UID.

use crate::error::{Error, Result};
use crate::token::{ImapToken, Specials};
use crate::tokenizer::Tokenizer;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadNode {
    /// Missing for placeholder parents.
    pub uid: Option<u32>,
    pub children: Vec<ThreadNode>,
}

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

enum Item {
    Num(u32),
    Sub(ThreadNode),
}

/// Parse one parenthesised thread; the opening paren has been consumed.
///
/// Inside a thread, a bare number adopts everything after it as its
/// descendants ("3 6" means 6 answers 3), while parenthesised groups
/// at the same depth are siblings.
fn read_thread<'a>(tokenizer: &'a mut Tokenizer) -> BoxFut<'a, Result<ThreadNode>> {
    Box::pin(async move {
        let mut items = Vec::new();
        loop {
            match tokenizer.read_token(Specials::Default).await? {
                ImapToken::CloseParen => break,
                ImapToken::Atom(a) => {
                    let uid = a.as_str().parse().map_err(|_| {
                        Error::Protocol(format!("bad UID {:?} in thread tree", a.as_str()))
                    })?;
                    items.push(Item::Num(uid));
                }
                ImapToken::OpenParen => items.push(Item::Sub(read_thread(tokenizer).await?)),
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} in thread tree",
                        other.describe()
                    )));
                }
            }
        }

        let mut siblings: Vec<ThreadNode> = Vec::new();
        for item in items.into_iter().rev() {
            match item {
                Item::Sub(node) => siblings.insert(0, node),
                Item::Num(uid) => {
                    siblings = vec![ThreadNode {
                        uid: Some(uid),
                        children: std::mem::take(&mut siblings),
                    }];
                }
            }
        }
        if siblings.len() == 1 {
            Ok(siblings.remove(0))
        } else {
            Ok(ThreadNode {
                uid: None,
                children: siblings,
            })
        }
    })
}

/// Parse the remainder of a `* THREAD` line into its root threads.
pub async fn read_thread_response(tokenizer: &mut Tokenizer) -> Result<Vec<ThreadNode>> {
    let mut roots = Vec::new();
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::Eoln => {
                tokenizer.unget_token(ImapToken::Eoln);
                return Ok(roots);
            }
            ImapToken::OpenParen => roots.push(read_thread(tokenizer).await?),
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected {} in THREAD response",
                    other.describe()
                )));
            }
        }
    }
}
