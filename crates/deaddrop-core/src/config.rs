use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DeaddropError, DeaddropResult};
use crate::types::{EngineKind, LogFormat};

/// Top-level configuration (loaded from deaddrop.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeaddropConfig {
    pub identity: IdentityConfig,
    pub keys: KeysConfig,
    pub gpg: GpgConfig,
    pub age: AgeConfig,
    pub store: StoreConfig,
    pub erase: EraseConfig,
    pub logging: LoggingConfig,
    /// Warn if the config file is world-readable (default: true)
    #[serde(default = "default_true")]
    pub config_file_mode_check: bool,
}

fn default_true() -> bool {
    true
}

/// Codename and identifier material
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Word list, one word per line (default: built-in BIP-39 English list)
    pub word_list: Option<PathBuf>,
    /// File holding the HMAC secret used to derive identifiers.
    /// Overridden by $CREDENTIALS_DIRECTORY/hmac-secret and the
    /// DEADDROP_HMAC_SECRET_FILE / DEADDROP_HMAC_SECRET env vars.
    pub hmac_secret_file: Option<PathBuf>,
}

/// Keypair storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Backend holding the per-identity keypairs
    pub engine: EngineKind,
    /// Keyring directory (GnuPG homedir or age keyring)
    pub key_dir: PathBuf,
    /// Pseudo-domain bound into every key's user id
    pub pseudo_domain: String,
}

/// GnuPG backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpgConfig {
    /// Explicit binary; when unset `gpg2` is tried, then `gpg`
    pub binary: Option<PathBuf>,
    /// Major version the binary must report
    pub required_major: u32,
    /// Key-Type for generated keys
    pub key_type: String,
    /// Key-Length for generated keys
    pub key_length: u32,
}

/// age backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeConfig {
    /// log2 of the scrypt work factor protecting stored identities
    pub scrypt_work_factor: u8,
}

/// Store root that encryption output and erasure are confined to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
}

/// Secure overwrite-and-unlink utility
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EraseConfig {
    /// Program to run (default: srm)
    pub program: PathBuf,
    /// Arguments placed before the target path
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: LogFormat,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Gpg,
            key_dir: PathBuf::from("~/.local/share/deaddrop/keys"),
            pseudo_domain: "deaddrop.example.com".into(),
        }
    }
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            binary: None,
            required_major: 2,
            key_type: "RSA".into(),
            key_length: 4096,
        }
    }
}

impl Default for AgeConfig {
    fn default() -> Self {
        Self {
            scrypt_work_factor: 18,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.local/share/deaddrop/store"),
        }
    }
}

impl Default for EraseConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("srm"),
            args: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Json,
        }
    }
}

impl DeaddropConfig {
    /// Load configuration from `path`, falling back to defaults if it is absent.
    pub fn load(path: &Path) -> DeaddropResult<Self> {
        if !path.exists() {
            tracing::debug!("config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DeaddropError::Config(format!("parsing {}: {e}", path.display())))?;

        if config.config_file_mode_check && is_world_readable(path) {
            tracing::warn!(
                "config file {} is world-readable; it may reference secret material",
                path.display()
            );
        }
        Ok(config)
    }

    /// Copy of this config with every `~/` path expanded against $HOME.
    pub fn expanded(&self) -> Self {
        let mut config = self.clone();
        config.identity.word_list = config.identity.word_list.as_deref().map(expand_tilde);
        config.identity.hmac_secret_file =
            config.identity.hmac_secret_file.as_deref().map(expand_tilde);
        config.keys.key_dir = expand_tilde(&config.keys.key_dir);
        config.store.root = expand_tilde(&config.store.root);
        config
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        return home.join(rest);
    }
    path.to_path_buf()
}

#[cfg(unix)]
fn is_world_readable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o004 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_world_readable(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
config_file_mode_check = false

[identity]
word_list = "/usr/share/deaddrop/wordlist"
hmac_secret_file = "/etc/deaddrop/hmac-secret"

[keys]
engine = "age"
key_dir = "/var/lib/deaddrop/keys"
pseudo_domain = "drop.example.org"

[gpg]
binary = "/usr/bin/gpg2"
required_major = 2
key_type = "RSA"
key_length = 3072

[age]
scrypt_work_factor = 16

[store]
root = "/var/lib/deaddrop/store"

[erase]
program = "shred"
args = ["-u", "-z"]

[logging]
level = "debug"
format = "text"
"#;
        let config: DeaddropConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(
            config.identity.word_list,
            Some(PathBuf::from("/usr/share/deaddrop/wordlist"))
        );
        assert_eq!(config.keys.engine, EngineKind::Age);
        assert_eq!(config.keys.pseudo_domain, "drop.example.org");
        assert_eq!(config.gpg.binary, Some(PathBuf::from("/usr/bin/gpg2")));
        assert_eq!(config.gpg.key_length, 3072);
        assert_eq!(config.age.scrypt_work_factor, 16);
        assert_eq!(config.store.root, PathBuf::from("/var/lib/deaddrop/store"));
        assert_eq!(config.erase.program, PathBuf::from("shred"));
        assert_eq!(config.erase.args, vec!["-u", "-z"]);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(!config.config_file_mode_check);
    }

    #[test]
    fn test_parse_defaults() {
        let config: DeaddropConfig = toml::from_str("").unwrap();

        assert_eq!(config.identity.word_list, None);
        assert_eq!(config.keys.engine, EngineKind::Gpg);
        assert_eq!(config.keys.pseudo_domain, "deaddrop.example.com");
        assert_eq!(config.gpg.required_major, 2);
        assert_eq!(config.gpg.key_type, "RSA");
        assert_eq!(config.gpg.key_length, 4096);
        assert_eq!(config.erase.program, PathBuf::from("srm"));
        assert!(config.erase.args.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(config.config_file_mode_check);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[keys]
engine = "age"
"#;
        let config: DeaddropConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.keys.engine, EngineKind::Age);
        // Defaults
        assert_eq!(config.keys.pseudo_domain, "deaddrop.example.com");
        assert_eq!(config.age.scrypt_work_factor, 18);
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let result: Result<DeaddropConfig, _> = toml::from_str("[keys]\nengine = \"pgp\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeaddropConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.keys.engine, EngineKind::Gpg);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deaddrop.toml");
        std::fs::write(&path, "[keys\nengine = ").unwrap();

        let err = DeaddropConfig::load(&path).unwrap_err();
        assert!(matches!(err, DeaddropError::Config(_)));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/.local/share/deaddrop/keys"));
        assert!(!expanded.to_str().unwrap().starts_with("~/"));
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = DeaddropConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: DeaddropConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.keys.key_dir, parsed.keys.key_dir);
        assert_eq!(config.erase.program, parsed.erase.program);
        assert_eq!(config.logging.format, parsed.logging.format);
    }
}
