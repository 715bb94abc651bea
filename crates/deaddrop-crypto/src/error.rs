use std::path::PathBuf;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures surfaced by identity, keypair, encryption, and erase operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Input contained a character outside the allow-list. Only the offset
    /// is reported; the value may be a passphrase.
    #[error("invalid input: disallowed character at byte offset {offset}")]
    InvalidInput { offset: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key listing failed: {0}")]
    KeyListing(String),

    #[error("secure erase of {} failed ({status}): {diagnostic}", path.display())]
    Erase {
        path: PathBuf,
        status: String,
        diagnostic: String,
    },

    #[error("path rejected: {}: {reason}", path.display())]
    PathRejected { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Missing or incompatible external tooling, detected once at startup.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("encryption engine binary not found (tried: {tried})")]
    MissingEngine { tried: String },

    #[error("{binary} reports version {found}; major version {required} is required")]
    EngineVersion {
        binary: String,
        found: String,
        required: u32,
    },

    #[error("secure erase utility {program} is not available: {reason}")]
    MissingUtility { program: String, reason: String },
}

/// Single error returned when the crypto services cannot be constructed.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("environment precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("word list: {0}")]
    WordList(String),

    #[error("hmac secret: {0}")]
    Secret(String),

    #[error("keyring {}: {reason}", path.display())]
    Keyring { path: PathBuf, reason: String },

    #[error("store root {}: {reason}", path.display())]
    Store { path: PathBuf, reason: String },
}
