//! GnuPG backend: drives a `gpg2`/`gpg` binary in batch mode.
//!
//! Every invocation runs with `--homedir <key_dir> --batch --no-tty
//! --status-fd 2`, so machine-readable `[GNUPG:]` status lines arrive on
//! stderr interleaved with human diagnostics. Success is decided from the
//! exit status and the status lines, never from stdout alone.

use secrecy::{ExposeSecret, SecretString};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{PoisonError, RwLock};
use zeroize::Zeroizing;

use deaddrop_core::config::GpgConfig;

use super::{
    Engine, EngineFailure, EngineResult, Fingerprint, KeyListing, KeyRequest, Plaintext,
    TrustPolicy,
};
use crate::error::PreconditionError;

const STATUS_PREFIX: &str = "[GNUPG:] ";

/// Binaries tried, in order, when none is configured.
const DEFAULT_BINARIES: [&str; 2] = ["gpg2", "gpg"];

/// Parsed `gpg --version` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpgVersion {
    pub major: u32,
    pub minor: u32,
    pub raw: String,
}

impl GpgVersion {
    /// Parse the first line of `gpg --version`, e.g. `gpg (GnuPG) 2.2.40`.
    pub fn parse(first_line: &str) -> Option<Self> {
        let raw = first_line.split_whitespace().last()?;
        let mut parts = raw.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts
            .next()
            .and_then(|m| m.chars().take_while(char::is_ascii_digit).collect::<String>().parse().ok())
            .unwrap_or(0);
        Some(Self {
            major,
            minor,
            raw: raw.to_string(),
        })
    }

    /// Loopback pinentry is required for `--passphrase-fd` from 2.1 on.
    fn needs_loopback(&self) -> bool {
        self.major > 2 || (self.major == 2 && self.minor >= 1)
    }
}

/// Parse a `--version` banner and require the given major version.
fn check_version(
    binary: &Path,
    first_line: &str,
    required: u32,
) -> Result<GpgVersion, PreconditionError> {
    match GpgVersion::parse(first_line) {
        Some(version) if version.major == required => Ok(version),
        Some(version) => Err(PreconditionError::EngineVersion {
            binary: binary.display().to_string(),
            found: version.raw,
            required,
        }),
        None => Err(PreconditionError::EngineVersion {
            binary: binary.display().to_string(),
            found: first_line.to_string(),
            required,
        }),
    }
}

pub struct GpgEngine {
    binary: PathBuf,
    homedir: PathBuf,
    version: GpgVersion,
    key_type: String,
    key_length: u32,
    extra_args: RwLock<Vec<String>>,
}

impl GpgEngine {
    /// Locate the GnuPG binary and verify its major version.
    ///
    /// The configured binary is used if set; otherwise `gpg2` is tried and
    /// `gpg` is the fallback when `gpg2` cannot be spawned.
    pub fn detect(homedir: &Path, config: &GpgConfig) -> Result<Self, PreconditionError> {
        let candidates: Vec<PathBuf> = match &config.binary {
            Some(binary) => vec![binary.clone()],
            None => DEFAULT_BINARIES.iter().map(PathBuf::from).collect(),
        };

        for binary in &candidates {
            let output = match Command::new(binary)
                .arg("--version")
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output()
            {
                Ok(output) => output,
                Err(e) => {
                    tracing::debug!("cannot run {}: {e}", binary.display());
                    continue;
                }
            };

            let stdout = String::from_utf8_lossy(&output.stdout);
            let first_line = stdout.lines().next().unwrap_or_default();
            let version = check_version(binary, first_line, config.required_major)?;

            tracing::info!(binary = %binary.display(), version = %version.raw, "using GnuPG");
            return Ok(Self {
                binary: binary.clone(),
                homedir: homedir.to_path_buf(),
                version,
                key_type: config.key_type.clone(),
                key_length: config.key_length,
                extra_args: RwLock::new(Vec::new()),
            });
        }

        Err(PreconditionError::MissingEngine {
            tried: candidates
                .iter()
                .map(|c| c.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    pub fn version(&self) -> &GpgVersion {
        &self.version
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--homedir")
            .arg(&self.homedir)
            .args(["--batch", "--no-tty", "--status-fd", "2"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Spawn `cmd`, feed stdin from a scoped thread, and collect the output.
    fn run<F>(&self, mut cmd: Command, feed: F) -> EngineResult<GpgOutput>
    where
        F: FnOnce(&mut ChildStdin) -> io::Result<()> + Send,
    {
        let mut child = cmd
            .spawn()
            .map_err(|e| EngineFailure::new(format!("spawning {}: {e}", self.binary.display())))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineFailure::new("gpg stdin was not captured"))?;

        let (fed, output) = std::thread::scope(|s| {
            let writer = s.spawn(move || {
                let result = feed(&mut stdin);
                drop(stdin);
                result
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output =
            output.map_err(|e| EngineFailure::new(format!("waiting for gpg: {e}")))?;
        let output = GpgOutput::from_process(output.status, output.stdout, &output.stderr);

        match fed {
            Ok(Ok(())) => Ok(output),
            Ok(Err(e)) => Err(EngineFailure::new(format!(
                "writing to gpg stdin: {e}; {}",
                output.diagnostic()
            ))),
            Err(_) => Err(EngineFailure::new("gpg stdin writer panicked")),
        }
    }

    fn encrypt_with<F>(
        &self,
        recipients: &[Fingerprint],
        output: Option<&Path>,
        trust: TrustPolicy,
        feed: F,
    ) -> EngineResult<Vec<u8>>
    where
        F: FnOnce(&mut ChildStdin) -> io::Result<()> + Send,
    {
        let mut cmd = self.command();
        cmd.args(self.extra_args());
        cmd.args(["--encrypt", "--armor"]);
        if trust == TrustPolicy::Always {
            cmd.args(["--trust-model", "always"]);
        }
        for fp in recipients {
            cmd.arg("--recipient").arg(fp.as_str());
        }
        if let Some(path) = output {
            cmd.arg("--yes").arg("--output").arg(path);
        }

        let out = self.run(cmd, feed)?;
        if out.status.success() && out.has_status("END_ENCRYPTION") {
            Ok(out.stdout)
        } else {
            Err(EngineFailure::new(out.diagnostic()))
        }
    }
}

impl Engine for GpgEngine {
    fn name(&self) -> &'static str {
        "gpg"
    }

    fn generate_key(&self, request: &KeyRequest) -> EngineResult<Fingerprint> {
        let params = Zeroizing::new(format!(
            "Key-Type: {}\nKey-Length: {}\nName-Real: {}\nName-Email: {}\nExpire-Date: 0\nPassphrase: {}\n%commit\n",
            self.key_type,
            self.key_length,
            request.name_real,
            request.name_email,
            request.passphrase.expose_secret(),
        ));

        let mut cmd = self.command();
        cmd.arg("--gen-key");
        let out = self.run(cmd, |stdin| stdin.write_all(params.as_bytes()))?;
        out.created_key()
    }

    fn list_keys(&self) -> EngineResult<Vec<KeyListing>> {
        let mut cmd = self.command();
        cmd.args([
            "--list-keys",
            "--with-colons",
            "--fixed-list-mode",
            "--with-fingerprint",
        ]);
        let out = self.run(cmd, |_| Ok(()))?;
        if !out.status.success() {
            return Err(EngineFailure::new(out.diagnostic()));
        }
        Ok(parse_colon_listing(&String::from_utf8_lossy(&out.stdout)))
    }

    fn encrypt(
        &self,
        data: &[u8],
        recipients: &[Fingerprint],
        output: Option<&Path>,
        trust: TrustPolicy,
    ) -> EngineResult<Vec<u8>> {
        self.encrypt_with(recipients, output, trust, |stdin| stdin.write_all(data))
    }

    fn encrypt_stream(
        &self,
        input: &mut (dyn Read + Send),
        recipients: &[Fingerprint],
        output: Option<&Path>,
        trust: TrustPolicy,
    ) -> EngineResult<Vec<u8>> {
        self.encrypt_with(recipients, output, trust, move |stdin| {
            io::copy(input, stdin).map(|_| ())
        })
    }

    fn decrypt(
        &self,
        data: &[u8],
        passphrase: &SecretString,
        _key_hint: Option<&Fingerprint>,
    ) -> EngineResult<Plaintext> {
        let mut cmd = self.command();
        cmd.args(["--decrypt", "--passphrase-fd", "0"]);
        if self.version.needs_loopback() {
            cmd.args(["--pinentry-mode", "loopback"]);
        }

        // The first stdin line is the passphrase, the rest is ciphertext.
        let mut line = Zeroizing::new(passphrase.expose_secret().as_bytes().to_vec());
        line.push(b'\n');
        let out = self.run(cmd, |stdin| {
            stdin.write_all(&line)?;
            stdin.write_all(data)
        })?;

        out.into_plaintext()
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

/// Collected output of one gpg invocation.
struct GpgOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    /// `[GNUPG:]` lines with the prefix removed
    status_lines: Vec<String>,
    /// Remaining stderr lines
    messages: Vec<String>,
}

impl GpgOutput {
    fn from_process(status: ExitStatus, stdout: Vec<u8>, stderr: &[u8]) -> Self {
        let (status_lines, messages) = split_status(&String::from_utf8_lossy(stderr));
        Self {
            status,
            stdout,
            status_lines,
            messages,
        }
    }

    fn has_status(&self, keyword: &str) -> bool {
        self.status_args(keyword).next().is_some()
    }

    /// Arguments of every status line whose keyword is `keyword`.
    fn status_args<'a>(&'a self, keyword: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.status_lines.iter().filter_map(move |line| {
            let (kw, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            (kw == keyword).then_some(rest)
        })
    }

    /// Fingerprint from `KEY_CREATED`, which gpg can omit even on exit 0.
    fn created_key(&self) -> EngineResult<Fingerprint> {
        let created = self
            .status_args("KEY_CREATED")
            .find_map(|args| args.split_whitespace().nth(1).map(Fingerprint::new));
        match created {
            Some(fp) if self.status.success() => Ok(fp),
            _ => Err(EngineFailure::new(self.diagnostic())),
        }
    }

    /// Decrypted data, only when gpg exited cleanly, reported
    /// `DECRYPTION_OKAY`, and reported none of the failure keywords.
    /// gpg can exit 0 after a bad passphrase on some versions.
    fn into_plaintext(self) -> EngineResult<Plaintext> {
        let failed = ["DECRYPTION_FAILED", "BAD_PASSPHRASE", "NO_SECKEY"]
            .iter()
            .any(|keyword| self.has_status(keyword));
        if !self.status.success() || failed || !self.has_status("DECRYPTION_OKAY") {
            return Err(EngineFailure::new(self.diagnostic()));
        }

        let filename = self
            .status_args("PLAINTEXT")
            .find_map(|args| args.split_whitespace().nth(2).map(percent_decode))
            .filter(|name| !name.is_empty());
        Ok(Plaintext {
            data: self.stdout,
            filename,
        })
    }

    fn diagnostic(&self) -> String {
        let text = if self.messages.is_empty() {
            self.status_lines.join("\n")
        } else {
            self.messages.join("\n")
        };
        format!("gpg exited with {}: {text}", self.status)
    }
}

fn split_status(stderr: &str) -> (Vec<String>, Vec<String>) {
    let mut status = Vec::new();
    let mut messages = Vec::new();
    for line in stderr.lines() {
        match line.strip_prefix(STATUS_PREFIX) {
            Some(rest) => status.push(rest.to_string()),
            None if !line.trim().is_empty() => messages.push(line.to_string()),
            None => {}
        }
    }
    (status, messages)
}

/// Parse `--list-keys --with-colons` output into primary keys and user ids.
fn parse_colon_listing(text: &str) -> Vec<KeyListing> {
    let mut keys = Vec::new();
    let mut current: Option<KeyListing> = None;
    let mut in_primary = false;

    for line in text.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("pub") => {
                keys.extend(current.take());
                current = Some(KeyListing {
                    fingerprint: Fingerprint::new(""),
                    uids: Vec::new(),
                });
                in_primary = true;
            }
            Some("sub") => in_primary = false,
            Some("fpr") if in_primary => {
                if let (Some(key), Some(fpr)) = (current.as_mut(), fields.get(9)) {
                    key.fingerprint = Fingerprint::new(fpr);
                }
                in_primary = false;
            }
            Some("uid") => {
                if let (Some(key), Some(uid)) = (current.as_mut(), fields.get(9)) {
                    key.uids.push(decode_c_escapes(uid));
                }
            }
            _ => {}
        }
    }
    keys.extend(current);
    keys.retain(|k| !k.fingerprint.as_str().is_empty());
    keys
}

/// Decode `\xNN` escapes used in colon listings.
fn decode_c_escapes(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            if let Some(b) = s.get(i + 2..i + 4).and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode `%XX` escapes used in status line arguments.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(b) = s.get(i + 1..i + 3).and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
