//! Process bootstrap: every component built once from one configuration.

use std::path::Path;
use std::sync::Arc;

use deaddrop_core::{DeaddropConfig, EngineKind};

use crate::codename::WordList;
use crate::engine::age::AgeEngine;
use crate::engine::gpg::GpgEngine;
use crate::engine::Engine;
use crate::erase::SecureEraser;
use crate::error::StartupError;
use crate::gateway::EncryptionGateway;
use crate::hash::IdentityHasher;
use crate::keypair::KeypairManager;
use crate::secret::{find_hmac_secret, HmacSecret};
use crate::store::{PathVerifier, StoreVerifier};

/// The constructed core. Cheap to share behind an `Arc`; every component is
/// safe for concurrent use.
pub struct CryptoServices {
    pub words: WordList,
    pub hasher: IdentityHasher,
    pub keypairs: KeypairManager,
    pub gateway: EncryptionGateway,
    pub eraser: SecureEraser,
    pub store: Arc<StoreVerifier>,
    engine: Arc<dyn Engine>,
}

impl CryptoServices {
    /// Check preconditions and construct everything, discovering the HMAC
    /// secret from the environment and config.
    pub fn bootstrap(config: &DeaddropConfig) -> Result<Self, StartupError> {
        let secret = find_hmac_secret(&config.expanded().identity)?;
        Self::bootstrap_with_secret(config, secret)
    }

    /// As [`bootstrap`](Self::bootstrap) with an already-resolved secret.
    pub fn bootstrap_with_secret(
        config: &DeaddropConfig,
        secret: HmacSecret,
    ) -> Result<Self, StartupError> {
        let config = config.expanded();

        let words = match &config.identity.word_list {
            Some(path) => WordList::load(path)?,
            None => WordList::bip39_english(),
        };
        let hasher = IdentityHasher::new(&secret.secret);
        tracing::info!(source = %secret.source, words = words.len(), "identity material loaded");

        let engine: Arc<dyn Engine> = match config.keys.engine {
            EngineKind::Gpg => {
                prepare_homedir(&config.keys.key_dir)?;
                Arc::new(GpgEngine::detect(&config.keys.key_dir, &config.gpg)?)
            }
            EngineKind::Age => Arc::new(AgeEngine::open(&config.keys.key_dir, &config.age)?),
        };

        SecureEraser::probe(&config.erase)?;

        let store = Arc::new(StoreVerifier::new(&config.store.root)?);
        let verifier: Arc<dyn PathVerifier> = store.clone();
        let keypairs = KeypairManager::new(engine.clone(), config.keys.pseudo_domain.clone());
        let gateway = EncryptionGateway::new(engine.clone(), keypairs.clone(), verifier.clone());
        let eraser = SecureEraser::new(&config.erase, verifier);

        tracing::info!(
            engine = engine.name(),
            key_dir = %config.keys.key_dir.display(),
            store = %store.root().display(),
            "crypto services ready"
        );

        Ok(Self {
            words,
            hasher,
            keypairs,
            gateway,
            eraser,
            store,
            engine,
        })
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }
}

impl std::fmt::Debug for CryptoServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoServices")
            .field("engine", &self.engine.name())
            .field("words", &self.words.len())
            .field("keypairs", &self.keypairs)
            .field("store", &self.store.root())
            .finish_non_exhaustive()
    }
}

/// GnuPG refuses homedirs other users can read.
fn prepare_homedir(path: &Path) -> Result<(), StartupError> {
    let keyring_err = |reason: String| StartupError::Keyring {
        path: path.to_path_buf(),
        reason,
    };
    std::fs::create_dir_all(path).map_err(|e| keyring_err(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| keyring_err(format!("setting permissions: {e}")))?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::PreconditionError;
    use secrecy::SecretSlice;

    fn secret() -> HmacSecret {
        HmacSecret {
            secret: SecretSlice::from(b"services-tests".to_vec()),
            source: "test".into(),
        }
    }

    fn age_config(dir: &Path) -> DeaddropConfig {
        let mut config = DeaddropConfig::default();
        config.keys.engine = EngineKind::Age;
        config.keys.key_dir = dir.join("keys");
        config.age.scrypt_work_factor = 10;
        config.store.root = dir.join("store");
        config.erase.program = "rm".into();
        config.erase.args = vec!["-f".into()];
        config
    }

    #[test]
    fn bootstrap_age_services() {
        let dir = tempfile::tempdir().unwrap();
        let services = CryptoServices::bootstrap_with_secret(&age_config(dir.path()), secret()).unwrap();

        assert_eq!(services.engine().name(), "age");
        assert_eq!(services.words.len(), 2048);
        assert!(services.store.root().ends_with("store"));
        assert!(dir.path().join("keys").is_dir());
    }

    #[test]
    fn custom_word_list_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let words = dir.path().join("words.txt");
        std::fs::write(&words, "alpha\nbravo\n").unwrap();
        let mut config = age_config(dir.path());
        config.identity.word_list = Some(words);

        let services = CryptoServices::bootstrap_with_secret(&config, secret()).unwrap();
        assert_eq!(services.words.len(), 2);
    }

    #[test]
    fn missing_word_list_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = age_config(dir.path());
        config.identity.word_list = Some(dir.path().join("absent.txt"));

        let err = CryptoServices::bootstrap_with_secret(&config, secret()).unwrap_err();
        assert!(matches!(err, StartupError::WordList(_)));
    }

    #[test]
    fn missing_erase_utility_is_precondition_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = age_config(dir.path());
        config.erase.program = "/nonexistent/deaddrop-srm".into();

        let err = CryptoServices::bootstrap_with_secret(&config, secret()).unwrap_err();
        assert!(matches!(
            err,
            StartupError::Precondition(PreconditionError::MissingUtility { .. })
        ));
    }

    #[test]
    fn missing_gpg_binary_is_precondition_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = age_config(dir.path());
        config.keys.engine = EngineKind::Gpg;
        config.gpg.binary = Some("/nonexistent/deaddrop-gpg".into());

        let err = CryptoServices::bootstrap_with_secret(&config, secret()).unwrap_err();
        assert!(matches!(
            err,
            StartupError::Precondition(PreconditionError::MissingEngine { .. })
        ));
    }
}
