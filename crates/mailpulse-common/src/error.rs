//! Error types for MailPulse

use thiserror::Error;

/// Main error type for MailPulse
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Mailbox not connected for user {0}")]
    NotConnected(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias for MailPulse
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::NotConnected(_) => 409,
            Error::Crypto(_) => 500,
            Error::NotFound(_) => 404,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::NotConnected(_) => "NOT_CONNECTED",
            Error::Crypto(_) => "CRYPTO_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotConnected("u".into()).status_code(), 409);
        assert_eq!(Error::NotFound("campaign".into()).status_code(), 404);
        assert_eq!(Error::Crypto("bad tag".into()).code(), "CRYPTO_ERROR");
        assert_eq!(Error::Database("down".into()).status_code(), 500);
    }
}
