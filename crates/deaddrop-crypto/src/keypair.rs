//! One engine keypair per identity, bound to `{identifier}@{pseudo_domain}`.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::engine::{Engine, Fingerprint, KeyRequest};
use crate::error::{CryptoError, CryptoResult};
use crate::sanitize::clean;

/// Real-name field of every generated key
pub const KEY_REAL_NAME: &str = "Autogenerated Key";

/// Result of a successful key generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGeneration {
    pub fingerprint: Fingerprint,
}

/// Generates and locates identity keypairs on a shared engine.
#[derive(Clone)]
pub struct KeypairManager {
    engine: Arc<dyn Engine>,
    pseudo_domain: String,
}

impl KeypairManager {
    pub fn new(engine: Arc<dyn Engine>, pseudo_domain: impl Into<String>) -> Self {
        Self {
            engine,
            pseudo_domain: pseudo_domain.into(),
        }
    }

    pub fn pseudo_domain(&self) -> &str {
        &self.pseudo_domain
    }

    /// `{identifier}@{pseudo_domain}`
    pub fn uid_email(&self, identifier: &str) -> String {
        format!("{identifier}@{}", self.pseudo_domain)
    }

    /// Full user id keys are bound to.
    pub fn uid_for(&self, identifier: &str) -> String {
        format!("{KEY_REAL_NAME} <{}>", self.uid_email(identifier))
    }

    /// Generate a keypair protected by `secret`.
    ///
    /// Does not check for an existing key; see [`ensure_keypair`](Self::ensure_keypair).
    pub fn generate_keypair(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> CryptoResult<KeyGeneration> {
        let identifier = clean(identifier, "")?;
        clean(secret.expose_secret(), " ")?;

        let request = KeyRequest {
            name_real: KEY_REAL_NAME.to_string(),
            name_email: self.uid_email(identifier),
            passphrase: SecretString::from(secret.expose_secret().to_string()),
        };

        let fingerprint = self.engine.generate_key(&request).map_err(|e| {
            tracing::error!(engine = self.engine.name(), "key generation failed: {e}");
            CryptoError::KeyGeneration(e.diagnostic)
        })?;

        tracing::info!(
            engine = self.engine.name(),
            fingerprint = %fingerprint,
            "generated keypair"
        );
        Ok(KeyGeneration { fingerprint })
    }

    /// First key whose uid mentions `identifier`, if any.
    pub fn lookup_fingerprint(&self, identifier: &str) -> CryptoResult<Option<Fingerprint>> {
        let needle = format!(" <{identifier}@");
        let keys = self
            .engine
            .list_keys()
            .map_err(|e| CryptoError::KeyListing(e.diagnostic))?;

        Ok(keys
            .into_iter()
            .find(|key| key.uids.iter().any(|uid| uid.contains(&needle)))
            .map(|key| key.fingerprint))
    }

    /// Existing fingerprint for `identifier`, generating a keypair if none.
    pub fn ensure_keypair(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> CryptoResult<Fingerprint> {
        if let Some(existing) = self.lookup_fingerprint(identifier)? {
            tracing::debug!(fingerprint = %existing, "keypair already present");
            return Ok(existing);
        }
        self.generate_keypair(identifier, secret)
            .map(|generated| generated.fingerprint)
    }
}

impl std::fmt::Debug for KeypairManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairManager")
            .field("engine", &self.engine.name())
            .field("pseudo_domain", &self.pseudo_domain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::age::AgeEngine;
    use deaddrop_core::config::AgeConfig;

    const ID: &str = "0f3a9c21d4e5b6a7980112233445566778899aabbccddeeff00112233445566";

    fn manager() -> (tempfile::TempDir, KeypairManager) {
        let dir = tempfile::tempdir().unwrap();
        let engine = AgeEngine::open(
            &dir.path().join("keys"),
            &AgeConfig {
                scrypt_work_factor: 10,
            },
        )
        .unwrap();
        (dir, KeypairManager::new(Arc::new(engine), "deaddrop.example.com"))
    }

    #[test]
    fn uid_format() {
        let (_dir, keys) = manager();
        assert_eq!(
            keys.uid_for("abc"),
            "Autogenerated Key <abc@deaddrop.example.com>"
        );
        assert!(keys.uid_for("abc").contains(" <abc@"));
    }

    #[test]
    fn lookup_before_and_after_generation() {
        let (_dir, keys) = manager();
        let secret = SecretString::from("alpha bravo charlie delta");

        assert_eq!(keys.lookup_fingerprint(ID).unwrap(), None);
        let generated = keys.generate_keypair(ID, &secret).unwrap();
        assert_eq!(
            keys.lookup_fingerprint(ID).unwrap(),
            Some(generated.fingerprint)
        );
    }

    #[test]
    fn lookup_does_not_match_prefixes() {
        let (_dir, keys) = manager();
        let secret = SecretString::from("alpha bravo charlie delta");
        keys.generate_keypair("abcdef", &secret).unwrap();

        assert!(keys.lookup_fingerprint("abc").unwrap().is_none());
        assert!(keys.lookup_fingerprint("abcdef").unwrap().is_some());
    }

    #[test]
    fn ensure_keypair_is_idempotent() {
        let (_dir, keys) = manager();
        let secret = SecretString::from("alpha bravo charlie delta");

        let first = keys.ensure_keypair(ID, &secret).unwrap();
        let second = keys.ensure_keypair(ID, &secret).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn generation_rejects_unsanitary_input() {
        let (_dir, keys) = manager();
        let err = keys
            .generate_keypair("abc@evil", &SecretString::from("alpha bravo"))
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidInput { offset: 3 }));

        let err = keys
            .generate_keypair("abc", &SecretString::from("alpha\nKey-Type: DSA"))
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidInput { .. }));
        assert_eq!(keys.lookup_fingerprint("abc").unwrap(), None);
    }
}
