//! IMAP command handlers for the fake server.
//!
//! One file per command family: CAPABILITY, LOGIN/AUTHENTICATE,
//! LOGOUT, NOOP, LIST, SELECT/EXAMINE, STATUS, APPEND, IDLE, UID
//! SEARCH, UID FETCH, UID STORE, UID COPY, EXPUNGE.

mod append;
mod expunge;
mod idle;
mod list;
mod login;
mod logout;
mod select;
mod status;
mod uid_copy;
mod uid_search;
mod uid_store;

pub use append::handle_append;
pub use capability::handle_capability;
pub use expunge::handle_expunge;
pub use idle::handle_idle;
pub use list::handle_list;
pub use login::{handle_authenticate, handle_login};
pub use logout::handle_logout;
pub use noop::handle_noop;
pub use select::handle_select;
pub use status::handle_status;
pub use uid_copy::handle_uid_copy;
pub use uid_fetch::handle_uid_fetch;
pub use uid_search::handle_uid_search;
pub use uid_store::{StoreArgs, handle_uid_store};
