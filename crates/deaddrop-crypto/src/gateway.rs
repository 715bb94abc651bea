//! Encryption and decryption for identities.
//!
//! The engine's extra-argument list is process-wide state shared by every
//! caller. Embedding an original filename means mutating it, so the gateway
//! serializes that mutation:
//!
//! - annotated encryptions hold the write side of `annotation` for the whole
//!   save, mutate, encrypt, restore sequence
//! - plain encryptions hold the read side, so they run alongside each other
//!   but never while an annotation is in place
//!
//! The mutation lives in [`FilenameAnnotation`], which restores the previous
//! arguments on drop (including unwinding).

use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::engine::{Engine, EngineResult, Fingerprint, Plaintext, TrustPolicy, SET_FILENAME_ARG};
use crate::error::{CryptoError, CryptoResult};
use crate::keypair::KeypairManager;
use crate::sanitize::clean;
use crate::store::PathVerifier;

/// Data to encrypt.
pub enum Payload<'a> {
    /// UTF-8 text, encrypted as its bytes
    Text(&'a str),
    /// In-memory binary data
    Bytes(&'a [u8]),
    /// Streamed input (typically an uploaded file)
    Stream(&'a mut (dyn Read + Send)),
}

impl std::fmt::Debug for Payload<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Text(t) => write!(f, "Text({} bytes)", t.len()),
            Payload::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Payload::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Where the ciphertext ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ciphertext {
    /// ASCII-armored ciphertext returned in memory
    Inline(Vec<u8>),
    /// Ciphertext written to this verified path
    Written(PathBuf),
}

pub struct EncryptionGateway {
    engine: Arc<dyn Engine>,
    keypairs: KeypairManager,
    verifier: Arc<dyn PathVerifier>,
    annotation: RwLock<()>,
}

impl EncryptionGateway {
    pub fn new(
        engine: Arc<dyn Engine>,
        keypairs: KeypairManager,
        verifier: Arc<dyn PathVerifier>,
    ) -> Self {
        Self {
            engine,
            keypairs,
            verifier,
            annotation: RwLock::new(()),
        }
    }

    /// Encrypt `payload` to the key `fingerprint`.
    ///
    /// With a `destination`, the path is verified first and the ciphertext is
    /// written there atomically; otherwise it is returned in memory. With an
    /// `original_filename`, the name is embedded in the ciphertext.
    pub fn encrypt(
        &self,
        fingerprint: &str,
        payload: Payload<'_>,
        destination: Option<&Path>,
        original_filename: Option<&str>,
    ) -> CryptoResult<Ciphertext> {
        if let Some(dest) = destination {
            self.verifier.verify(dest)?;
        }

        let recipient = Fingerprint::new(fingerprint);
        if recipient.as_str().is_empty() {
            return Err(CryptoError::Encryption("no recipient fingerprint given".into()));
        }

        let staging = destination.map(Staging::beside).transpose()?;
        let output = staging.as_ref().map(Staging::file);
        let result = match original_filename {
            Some(name) => {
                let _section = self
                    .annotation
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                let _annotation = FilenameAnnotation::apply(self.engine.as_ref(), name);
                self.run(&recipient, payload, output)
            }
            None => {
                let _section = self
                    .annotation
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                self.run(&recipient, payload, output)
            }
        };

        let ciphertext = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(
                    engine = self.engine.name(),
                    recipient = %recipient,
                    "encryption failed: {e}"
                );
                return Err(CryptoError::Encryption(e.diagnostic));
            }
        };

        match (destination, staging) {
            (Some(dest), Some(staging)) => {
                staging.persist(dest)?;
                tracing::debug!(
                    recipient = %recipient,
                    annotated = original_filename.is_some(),
                    "wrote ciphertext to {}",
                    dest.display()
                );
                Ok(Ciphertext::Written(dest.to_path_buf()))
            }
            _ => {
                tracing::debug!(
                    recipient = %recipient,
                    annotated = original_filename.is_some(),
                    bytes = ciphertext.len(),
                    "encrypted in memory"
                );
                Ok(Ciphertext::Inline(ciphertext))
            }
        }
    }

    /// Decrypt `ciphertext` with the keypair of `identifier`, unlocked by `secret`.
    ///
    /// Never returns partial output: any engine failure, missing key, or
    /// unverifiable result is [`CryptoError::Decryption`].
    pub fn decrypt(
        &self,
        identifier: &str,
        secret: &SecretString,
        ciphertext: &[u8],
    ) -> CryptoResult<Plaintext> {
        clean(identifier, "")?;
        clean(secret.expose_secret(), " ")?;

        let key = self
            .keypairs
            .lookup_fingerprint(identifier)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?
            .ok_or_else(|| CryptoError::Decryption("no keypair for identity".into()))?;

        self.engine
            .decrypt(ciphertext, secret, Some(&key))
            .map_err(|e| {
                tracing::warn!(engine = self.engine.name(), fingerprint = %key, "decryption failed");
                CryptoError::Decryption(e.diagnostic)
            })
    }

    fn run(
        &self,
        recipient: &Fingerprint,
        payload: Payload<'_>,
        output: Option<&Path>,
    ) -> EngineResult<Vec<u8>> {
        let recipients = std::slice::from_ref(recipient);
        match payload {
            Payload::Text(text) => {
                self.engine
                    .encrypt(text.as_bytes(), recipients, output, TrustPolicy::Always)
            }
            Payload::Bytes(bytes) => {
                self.engine
                    .encrypt(bytes, recipients, output, TrustPolicy::Always)
            }
            Payload::Stream(reader) => {
                self.engine
                    .encrypt_stream(reader, recipients, output, TrustPolicy::Always)
            }
        }
    }
}

impl std::fmt::Debug for EncryptionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionGateway")
            .field("engine", &self.engine.name())
            .field("keypairs", &self.keypairs)
            .finish_non_exhaustive()
    }
}

/// Private scratch directory next to a destination.
///
/// The directory gets a random name and is created exclusively (mode 0700 on
/// unix), so nothing can be planted at the path the engine writes to. The
/// finished ciphertext is renamed onto the destination; the directory and any
/// partial output go away on drop.
struct Staging {
    dir: tempfile::TempDir,
    file: PathBuf,
}

impl Staging {
    fn beside(destination: &Path) -> CryptoResult<Self> {
        let (Some(parent), Some(name)) = (destination.parent(), destination.file_name()) else {
            return Err(CryptoError::PathRejected {
                path: destination.to_path_buf(),
                reason: "no parent directory or file name".into(),
            });
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix(".deaddrop-").suffix(".tmp");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o700));
        }
        let dir = builder.tempdir_in(parent).map_err(|e| {
            CryptoError::Encryption(format!("creating staging area in {}: {e}", parent.display()))
        })?;

        let file = dir.path().join(name);
        Ok(Self { dir, file })
    }

    fn file(&self) -> &Path {
        &self.file
    }

    fn persist(self, destination: &Path) -> CryptoResult<()> {
        fs::rename(&self.file, destination).map_err(|e| {
            CryptoError::Encryption(format!("moving ciphertext to {}: {e}", destination.display()))
        })?;
        if let Err(e) = self.dir.close() {
            tracing::warn!("removing staging area: {e}");
        }
        Ok(())
    }
}

/// `--set-filename <name>` installed on the engine for the guard's lifetime.
/// Must only exist while the gateway's write lock is held.
struct FilenameAnnotation<'a> {
    engine: &'a dyn Engine,
    previous: Option<Vec<String>>,
}

impl<'a> FilenameAnnotation<'a> {
    fn apply(engine: &'a dyn Engine, filename: &str) -> Self {
        let previous = engine.extra_args();

        let mut args = Vec::with_capacity(previous.len() + 2);
        let mut iter = previous.iter();
        while let Some(arg) = iter.next() {
            if arg == SET_FILENAME_ARG {
                iter.next();
            } else {
                args.push(arg.clone());
            }
        }
        args.push(SET_FILENAME_ARG.to_string());
        args.push(filename.to_string());

        engine.set_extra_args(args);
        Self {
            engine,
            previous: Some(previous),
        }
    }
}

impl Drop for FilenameAnnotation<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.engine.set_extra_args(previous);
        }
    }
}
