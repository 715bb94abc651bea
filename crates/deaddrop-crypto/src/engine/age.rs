//! age backend: an on-disk keyring of X25519 identities.
//!
//! Each key is one JSON record `<FINGERPRINT>.json` in the keyring
//! directory. The secret half is stored as an ASCII-armored age file
//! encrypted to an scrypt recipient derived from the passphrase, so the
//! keyring at rest reveals nothing without the codename.
//!
//! Message layout inside the age payload:
//!
//! ```text
//! "DDLIT1" | filename length (u16 BE) | filename (UTF-8) | data
//! ```
//!
//! The filename comes from the `--set-filename` extra argument, mirroring
//! the literal-data packet an OpenPGP engine would produce.

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use age::x25519;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use zeroize::Zeroizing;

use deaddrop_core::config::AgeConfig;

use super::{
    filename_from_args, Engine, EngineFailure, EngineResult, Fingerprint, KeyListing, KeyRequest,
    Plaintext, TrustPolicy, SET_FILENAME_ARG,
};
use crate::error::StartupError;

const FRAME_MAGIC: &[u8; 6] = b"DDLIT1";

/// Bytes of SHA-256(recipient) kept as the fingerprint
const FINGERPRINT_BYTES: usize = 20;

/// Stored key record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    fingerprint: String,
    uids: Vec<String>,
    /// age public key (age1...)
    recipient: String,
    /// Unix timestamp of generation
    created_at: u64,
    /// Armored age file holding the AGE-SECRET-KEY, scrypt-protected
    secret_key: String,
}

pub struct AgeEngine {
    keyring: PathBuf,
    work_factor: u8,
    extra_args: RwLock<Vec<String>>,
}

impl AgeEngine {
    /// Open (creating if needed) the keyring directory.
    pub fn open(keyring: &Path, config: &AgeConfig) -> Result<Self, StartupError> {
        fs::create_dir_all(keyring).map_err(|e| StartupError::Keyring {
            path: keyring.to_path_buf(),
            reason: e.to_string(),
        })?;
        restrict_permissions(keyring, 0o700).map_err(|e| StartupError::Keyring {
            path: keyring.to_path_buf(),
            reason: format!("setting permissions: {e}"),
        })?;

        Ok(Self {
            keyring: keyring.to_path_buf(),
            work_factor: config.scrypt_work_factor,
            extra_args: RwLock::new(Vec::new()),
        })
    }

    /// Keyring file for `fingerprint`. Only well-formed fingerprints map to
    /// a path, so a caller-supplied value can never leave the keyring.
    fn record_path(&self, fingerprint: &Fingerprint) -> EngineResult<PathBuf> {
        let fp = fingerprint.as_str();
        if fp.len() != FINGERPRINT_BYTES * 2 || !fp.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(EngineFailure::new(format!("malformed fingerprint: {fp:?}")));
        }
        Ok(self.keyring.join(format!("{fp}.json")))
    }

    fn load_record(&self, path: &Path) -> EngineResult<KeyRecord> {
        let content = fs::read_to_string(path)
            .map_err(|e| EngineFailure::new(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| EngineFailure::new(format!("parsing {}: {e}", path.display())))
    }

    fn load_records(&self) -> EngineResult<Vec<KeyRecord>> {
        let entries = fs::read_dir(&self.keyring).map_err(|e| {
            EngineFailure::new(format!("reading keyring {}: {e}", self.keyring.display()))
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EngineFailure::new(format!("reading keyring: {e}")))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            match self.load_record(&entry.path()) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("skipping unreadable key record: {e}"),
            }
        }
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(records)
    }

    /// Write a record via temp file + rename so listings never see a partial file.
    fn store_record(&self, record: &KeyRecord) -> EngineResult<()> {
        let fingerprint = Fingerprint::new(&record.fingerprint);
        let path = self.record_path(&fingerprint)?;
        let tmp = self.keyring.join(format!(".{fingerprint}.json.tmp"));
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| EngineFailure::new(format!("serializing key record: {e}")))?;

        fs::write(&tmp, json)
            .and_then(|()| restrict_permissions(&tmp, 0o600))
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = fs::remove_file(&tmp);
                EngineFailure::new(format!("writing {}: {e}", path.display()))
            })
    }

    /// Validate extra args and return the filename to embed, if any.
    fn annotation(&self) -> EngineResult<Option<String>> {
        let args = self.extra_args();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == SET_FILENAME_ARG {
                iter.next();
            } else {
                return Err(EngineFailure::new(format!(
                    "unsupported engine argument: {arg}"
                )));
            }
        }
        Ok(filename_from_args(&args).map(str::to_string))
    }

    fn recipients(&self, fingerprints: &[Fingerprint]) -> EngineResult<Vec<x25519::Recipient>> {
        if fingerprints.is_empty() {
            return Err(EngineFailure::new("no recipients given"));
        }
        fingerprints
            .iter()
            .map(|fp| {
                let path = self.record_path(fp)?;
                if !path.exists() {
                    return Err(EngineFailure::new(format!("{fp}: no public key")));
                }
                let record = self.load_record(&path)?;
                record.recipient.parse::<x25519::Recipient>().map_err(|e| {
                    EngineFailure::new(format!("{fp}: invalid recipient: {e:?}"))
                })
            })
            .collect()
    }

    /// Frame `input` and encrypt it to `recipients`, armored, into `sink`.
    fn seal<W: Write>(
        &self,
        recipients: &[x25519::Recipient],
        filename: Option<&str>,
        input: &mut dyn Read,
        sink: W,
    ) -> EngineResult<W> {
        let name = filename.unwrap_or_default().as_bytes();
        let name_len = u16::try_from(name.len())
            .map_err(|_| EngineFailure::new("embedded filename is too long"))?;

        let encryptor =
            age::Encryptor::with_recipients(recipients.iter().map(|r| r as &dyn age::Recipient))
                .map_err(|e| EngineFailure::new(format!("creating age encryptor: {e}")))?;

        let armor = ArmoredWriter::wrap_output(sink, Format::AsciiArmor).map_err(io_failure)?;
        let mut writer = encryptor.wrap_output(armor).map_err(io_failure)?;
        writer.write_all(FRAME_MAGIC).map_err(io_failure)?;
        writer.write_all(&name_len.to_be_bytes()).map_err(io_failure)?;
        writer.write_all(name).map_err(io_failure)?;
        io::copy(input, &mut writer).map_err(io_failure)?;
        writer
            .finish()
            .and_then(|armor| armor.finish())
            .map_err(io_failure)
    }

    fn encrypt_reader(
        &self,
        input: &mut dyn Read,
        fingerprints: &[Fingerprint],
        output: Option<&Path>,
    ) -> EngineResult<Vec<u8>> {
        let filename = self.annotation()?;
        let recipients = self.recipients(fingerprints)?;

        match output {
            Some(path) => {
                let file = fs::File::create(path).map_err(|e| {
                    EngineFailure::new(format!("creating {}: {e}", path.display()))
                })?;
                let file = self.seal(&recipients, filename.as_deref(), input, file)?;
                file.sync_all().map_err(io_failure)?;
                Ok(Vec::new())
            }
            None => self.seal(&recipients, filename.as_deref(), input, Vec::new()),
        }
    }

    /// Decrypt the stored secret key of `record` with `passphrase`.
    fn unlock(&self, record: &KeyRecord, passphrase: &SecretString) -> EngineResult<x25519::Identity> {
        let mut scrypt = age::scrypt::Identity::new(copy_secret(passphrase));
        scrypt.set_max_work_factor(self.work_factor);

        let decryptor = age::Decryptor::new(ArmoredReader::new(record.secret_key.as_bytes()))
            .map_err(|e| EngineFailure::new(format!("reading stored key: {e}")))?;
        let mut reader = decryptor
            .decrypt(std::iter::once(&scrypt as &dyn age::Identity))
            .map_err(|e| EngineFailure::new(format!("{}: {e}", record.fingerprint)))?;

        let mut secret = Zeroizing::new(String::new());
        reader.read_to_string(&mut secret).map_err(io_failure)?;
        secret
            .trim()
            .parse::<x25519::Identity>()
            .map_err(|e| EngineFailure::new(format!("{}: corrupt secret key: {e}", record.fingerprint)))
    }
}

impl Engine for AgeEngine {
    fn name(&self) -> &'static str {
        "age"
    }

    fn generate_key(&self, request: &KeyRequest) -> EngineResult<Fingerprint> {
        let identity = x25519::Identity::generate();
        let recipient = identity.to_public().to_string();
        let digest = Sha256::digest(recipient.as_bytes());
        let fingerprint = Fingerprint::new(&hex::encode_upper(&digest[..FINGERPRINT_BYTES]));

        let mut scrypt = age::scrypt::Recipient::new(copy_secret(&request.passphrase));
        scrypt.set_work_factor(self.work_factor);
        let encryptor = age::Encryptor::with_recipients(std::iter::once(&scrypt as &dyn age::Recipient))
            .map_err(|e| EngineFailure::new(format!("creating age encryptor: {e}")))?;

        let armor =
            ArmoredWriter::wrap_output(Vec::new(), Format::AsciiArmor).map_err(io_failure)?;
        let mut writer = encryptor.wrap_output(armor).map_err(io_failure)?;
        writer
            .write_all(identity.to_string().expose_secret().as_bytes())
            .map_err(io_failure)?;
        let armored = writer
            .finish()
            .and_then(|armor| armor.finish())
            .map_err(io_failure)?;
        let secret_key = String::from_utf8(armored)
            .map_err(|e| EngineFailure::new(format!("armored key is not UTF-8: {e}")))?;

        let record = KeyRecord {
            fingerprint: fingerprint.to_string(),
            uids: vec![format!("{} <{}>", request.name_real, request.name_email)],
            recipient,
            created_at: now_epoch(),
            secret_key,
        };
        self.store_record(&record)?;

        tracing::debug!(fingerprint = %fingerprint, "generated age keypair");
        Ok(fingerprint)
    }

    fn list_keys(&self) -> EngineResult<Vec<KeyListing>> {
        Ok(self
            .load_records()?
            .into_iter()
            .map(|r| KeyListing {
                fingerprint: Fingerprint::new(&r.fingerprint),
                uids: r.uids,
            })
            .collect())
    }

    fn encrypt(
        &self,
        data: &[u8],
        recipients: &[Fingerprint],
        output: Option<&Path>,
        _trust: TrustPolicy,
    ) -> EngineResult<Vec<u8>> {
        let mut input = data;
        self.encrypt_reader(&mut input, recipients, output)
    }

    fn encrypt_stream(
        &self,
        input: &mut (dyn Read + Send),
        recipients: &[Fingerprint],
        output: Option<&Path>,
        _trust: TrustPolicy,
    ) -> EngineResult<Vec<u8>> {
        self.encrypt_reader(input, recipients, output)
    }

    fn decrypt(
        &self,
        data: &[u8],
        passphrase: &SecretString,
        key_hint: Option<&Fingerprint>,
    ) -> EngineResult<Plaintext> {
        let records = match key_hint {
            Some(fp) => {
                let path = self.record_path(fp)?;
                if !path.exists() {
                    return Err(EngineFailure::new(format!("{fp}: no secret key")));
                }
                vec![self.load_record(&path)?]
            }
            None => self.load_records()?,
        };

        let mut last_error = EngineFailure::new("no secret key available");
        for record in &records {
            let identity = match self.unlock(record, passphrase) {
                Ok(identity) => identity,
                Err(e) => {
                    last_error = e;
                    continue;
                }
            };

            let decryptor = age::Decryptor::new(ArmoredReader::new(data))
                .map_err(|e| EngineFailure::new(format!("reading ciphertext: {e}")))?;
            let mut reader = match decryptor.decrypt(std::iter::once(&identity as &dyn age::Identity)) {
                Ok(reader) => reader,
                Err(e) => {
                    last_error = EngineFailure::new(format!("{}: {e}", record.fingerprint));
                    continue;
                }
            };

            let mut payload = Vec::new();
            reader.read_to_end(&mut payload).map_err(io_failure)?;
            return unframe(payload);
        }
        Err(last_error)
    }

    fn extra_args(&self) -> Vec<String> {
        self.extra_args
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_extra_args(&self, args: Vec<String>) {
        *self
            .extra_args
            .write()
            .unwrap_or_else(PoisonError::into_inner) = args;
    }
}

/// Split a decrypted payload into filename and data.
fn unframe(mut payload: Vec<u8>) -> EngineResult<Plaintext> {
    let header = FRAME_MAGIC.len() + 2;
    if payload.len() < header || &payload[..FRAME_MAGIC.len()] != FRAME_MAGIC {
        return Err(EngineFailure::new("decrypted payload has no literal-data frame"));
    }
    let name_len = u16::from_be_bytes([payload[FRAME_MAGIC.len()], payload[FRAME_MAGIC.len() + 1]])
        as usize;
    if payload.len() < header + name_len {
        return Err(EngineFailure::new("literal-data frame is truncated"));
    }

    let filename = match name_len {
        0 => None,
        _ => Some(
            String::from_utf8(payload[header..header + name_len].to_vec())
                .map_err(|_| EngineFailure::new("embedded filename is not UTF-8"))?,
        ),
    };
    let data = payload.split_off(header + name_len);
    Ok(Plaintext { data, filename })
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

fn io_failure(e: io::Error) -> EngineFailure {
    EngineFailure::new(e.to_string())
}

fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
