//! HMAC secret discovery chain

use secrecy::SecretSlice;
use std::path::{Path, PathBuf};

use deaddrop_core::config::{expand_tilde, IdentityConfig};

use crate::error::StartupError;

/// The shared secret keying the identifier hasher, and where it came from.
pub struct HmacSecret {
    pub secret: SecretSlice<u8>,
    pub source: String,
}

impl std::fmt::Debug for HmacSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSecret")
            .field("secret", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// Discover the HMAC secret using the priority chain:
///   1. $CREDENTIALS_DIRECTORY/hmac-secret  (systemd credential injection)
///   2. $DEADDROP_HMAC_SECRET_FILE  (explicit path env var)
///   3. $DEADDROP_HMAC_SECRET  (literal secret in env var)
///   4. config.hmac_secret_file path (from config.toml)
pub fn find_hmac_secret(config: &IdentityConfig) -> Result<HmacSecret, StartupError> {
    find_hmac_secret_with(config, |name| std::env::var(name).ok())
}

/// Same chain with an injectable environment.
pub fn find_hmac_secret_with<F>(config: &IdentityConfig, env: F) -> Result<HmacSecret, StartupError>
where
    F: Fn(&str) -> Option<String>,
{
    // 1. systemd credentials directory
    if let Some(cred_dir) = env("CREDENTIALS_DIRECTORY") {
        let path = PathBuf::from(cred_dir).join("hmac-secret");
        if path.exists() {
            return read_secret_file(&path, format!("systemd:{}", path.display()));
        }
    }

    // 2. explicit file
    if let Some(secret_file) = env("DEADDROP_HMAC_SECRET_FILE") {
        let path = PathBuf::from(secret_file);
        if path.exists() {
            return read_secret_file(&path, format!("DEADDROP_HMAC_SECRET_FILE:{}", path.display()));
        }
    }

    // 3. literal
    if let Some(literal) = env("DEADDROP_HMAC_SECRET") {
        if !literal.is_empty() {
            return Ok(HmacSecret {
                secret: SecretSlice::from(literal.into_bytes()),
                source: "DEADDROP_HMAC_SECRET (env)".into(),
            });
        }
    }

    // 4. config path
    if let Some(path) = &config.hmac_secret_file {
        let expanded = expand_tilde(path);
        if expanded.exists() {
            return read_secret_file(&expanded, format!("config:{}", expanded.display()));
        }
    }

    Err(StartupError::Secret(
        "no hmac secret found. Tried: $CREDENTIALS_DIRECTORY/hmac-secret, \
         $DEADDROP_HMAC_SECRET_FILE, $DEADDROP_HMAC_SECRET, and identity.hmac_secret_file"
            .into(),
    ))
}

fn read_secret_file(path: &Path, source: String) -> Result<HmacSecret, StartupError> {
    let mut bytes = std::fs::read(path)
        .map_err(|e| StartupError::Secret(format!("reading {}: {e}", path.display())))?;
    while matches!(bytes.last(), Some(b'\n' | b'\r')) {
        bytes.pop();
    }
    if bytes.is_empty() {
        return Err(StartupError::Secret(format!("{} is empty", path.display())));
    }
    tracing::debug!(source = %source, "loaded hmac secret");
    Ok(HmacSecret {
        secret: SecretSlice::from(bytes),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, String)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn nothing_configured_is_an_error() {
        let err = find_hmac_secret_with(&IdentityConfig::default(), env_from(&[])).unwrap_err();
        assert!(matches!(err, StartupError::Secret(_)));
    }

    #[test]
    fn config_file_trims_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "s3cret\n").unwrap();
        let config = IdentityConfig {
            hmac_secret_file: Some(path),
            ..Default::default()
        };

        let found = find_hmac_secret_with(&config, env_from(&[])).unwrap();
        assert_eq!(found.secret.expose_secret(), b"s3cret");
        assert!(found.source.starts_with("config:"));
    }

    #[test]
    fn credentials_directory_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hmac-secret"), "from-systemd\n").unwrap();
        let env = env_from(&[
            ("CREDENTIALS_DIRECTORY", dir.path().display().to_string()),
            ("DEADDROP_HMAC_SECRET", "from-env".into()),
        ]);

        let found = find_hmac_secret_with(&IdentityConfig::default(), env).unwrap();
        assert_eq!(found.secret.expose_secret(), b"from-systemd");
    }

    #[test]
    fn literal_env_beats_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "from-config").unwrap();
        let config = IdentityConfig {
            hmac_secret_file: Some(path),
            ..Default::default()
        };
        let env = env_from(&[("DEADDROP_HMAC_SECRET", "from-env".into())]);

        let found = find_hmac_secret_with(&config, env).unwrap();
        assert_eq!(found.secret.expose_secret(), b"from-env");
    }

    #[test]
    fn missing_files_fall_through() {
        let env = env_from(&[
            ("DEADDROP_HMAC_SECRET_FILE", "/nonexistent/hmac".into()),
            ("DEADDROP_HMAC_SECRET", "fallback".into()),
        ]);
        let found = find_hmac_secret_with(&IdentityConfig::default(), env).unwrap();
        assert_eq!(found.secret.expose_secret(), b"fallback");
    }

    #[test]
    fn empty_secret_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "\n").unwrap();
        let config = IdentityConfig {
            hmac_secret_file: Some(path),
            ..Default::default()
        };
        assert!(find_hmac_secret_with(&config, env_from(&[])).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let env = env_from(&[("DEADDROP_HMAC_SECRET", "hunter2".into())]);
        let found = find_hmac_secret_with(&IdentityConfig::default(), env).unwrap();
        assert!(!format!("{found:?}").contains("hunter2"));
    }
}
