//! OAuth credential storage, encryption and refresh

mod cipher;
mod store;

pub use cipher::{CipherError, TokenCipher};
pub use store::{Credentials, MailboxSession, TokenError, TokenStore};
