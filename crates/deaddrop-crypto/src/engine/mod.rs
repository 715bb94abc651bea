//! Asymmetric-encryption engine capability.
//!
//! The core never implements the cipher itself. It drives an [`Engine`]:
//! generate a passphrase-protected keypair, list keys with their user ids,
//! encrypt to fingerprints (buffer or stream), and decrypt with a passphrase.
//!
//! Backends:
//! - [`gpg::GpgEngine`]: external GnuPG 2.x binary with its own homedir
//! - [`age::AgeEngine`]: in-process age keyring, one JSON record per key
//!
//! Each engine also carries a mutable list of extra arguments consulted by
//! every encrypt call. The only argument the core ever injects is
//! [`SET_FILENAME_ARG`]; the gateway owns the critical section around it.

pub mod age;
pub mod gpg;

use secrecy::SecretString;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Extra argument that embeds the original filename in the ciphertext.
pub const SET_FILENAME_ARG: &str = "--set-filename";

/// Engine-assigned public key identifier. Whitespace stripped, uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(raw: &str) -> Self {
        Self(
            raw.chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_uppercase(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters for a new keypair. The key algorithm is fixed per engine.
pub struct KeyRequest {
    pub name_real: String,
    pub name_email: String,
    pub passphrase: SecretString,
}

impl fmt::Debug for KeyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRequest")
            .field("name_real", &self.name_real)
            .field("name_email", &self.name_email)
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// One entry of the engine's key listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyListing {
    pub fingerprint: Fingerprint,
    pub uids: Vec<String>,
}

/// Whether recipients must be trusted by the keyring's trust database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Encrypt to any listed key regardless of its trust level
    Always,
    /// Defer to the engine's trust model
    Keyring,
}

/// Successful decryption result.
#[derive(Clone, PartialEq, Eq)]
pub struct Plaintext {
    pub data: Vec<u8>,
    /// Original filename embedded at encryption time, if any
    pub filename: Option<String>,
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plaintext")
            .field("len", &self.data.len())
            .field("filename", &self.filename)
            .finish()
    }
}

/// Engine-reported failure; `diagnostic` is the engine's own text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    pub diagnostic: String,
}

impl EngineFailure {
    pub fn new(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
        }
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.diagnostic)
    }
}

impl std::error::Error for EngineFailure {}

pub type EngineResult<T> = Result<T, EngineFailure>;

/// The asymmetric-encryption capability.
///
/// All calls block until the engine finishes. When `output` is given the
/// ciphertext is written there and the returned buffer is empty.
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate_key(&self, request: &KeyRequest) -> EngineResult<Fingerprint>;

    fn list_keys(&self) -> EngineResult<Vec<KeyListing>>;

    fn encrypt(
        &self,
        data: &[u8],
        recipients: &[Fingerprint],
        output: Option<&Path>,
        trust: TrustPolicy,
    ) -> EngineResult<Vec<u8>>;

    fn encrypt_stream(
        &self,
        input: &mut (dyn Read + Send),
        recipients: &[Fingerprint],
        output: Option<&Path>,
        trust: TrustPolicy,
    ) -> EngineResult<Vec<u8>>;

    /// `key_hint` narrows which secret key the engine tries, where the
    /// backend supports it.
    fn decrypt(
        &self,
        data: &[u8],
        passphrase: &SecretString,
        key_hint: Option<&Fingerprint>,
    ) -> EngineResult<Plaintext>;

    /// Snapshot of the extra arguments consulted by encrypt calls.
    fn extra_args(&self) -> Vec<String>;

    /// Replace the extra arguments. Shared state: callers must serialize
    /// mutation against concurrent encryptions.
    fn set_extra_args(&self, args: Vec<String>);
}

/// Value following `--set-filename` in an argument list, if present.
pub(crate) fn filename_from_args(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == SET_FILENAME_ARG)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
