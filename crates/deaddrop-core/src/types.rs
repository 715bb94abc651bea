use serde::{Deserialize, Serialize};
use std::fmt;

/// Which asymmetric-encryption backend holds the per-identity keypairs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// External GnuPG 2.x binary with its own keyring under `keys.key_dir`
    #[default]
    Gpg,
    /// In-process age keyring (X25519 identities, scrypt-wrapped)
    Age,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Gpg => f.write_str("gpg"),
            EngineKind::Age => f.write_str("age"),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}
