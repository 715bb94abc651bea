//! deaddrop-crypto: pseudonymous identities and the cryptography bound to them
//!
//! Flow: codename → HMAC-SHA256 identifier → per-identity keypair → encrypt/decrypt
//!
//! ```text
//! WordList
//!   ├── random_codename()      OS CSPRNG, secret, never reconstructible
//!   └── display_codename(id)   seeded PCG, reproducible UI label, NOT secret
//! IdentityHasher::stable_hash(codename) → Identifier (64 lowercase hex)
//! KeypairManager   "Autogenerated Key <{identifier}@{pseudo_domain}>", passphrase = codename
//! EncryptionGateway
//!   ├── encrypt(fingerprint, payload, destination?, filename?)
//!   └── decrypt(identifier, codename, ciphertext)
//! SecureEraser::secure_delete(path)   verified by PathVerifier first
//! ```
//!
//! Engines: [`engine::gpg::GpgEngine`] (external GnuPG 2.x) and
//! [`engine::age::AgeEngine`] (in-process age keyring).

pub mod codename;
pub mod engine;
pub mod erase;
pub mod error;
pub mod gateway;
pub mod hash;
pub mod keypair;
pub mod sanitize;
pub mod secret;
pub mod services;
pub mod store;

pub use codename::{Codename, DisplayCodename, WordList, WORDS_IN_CODENAME};
pub use engine::{Engine, EngineFailure, Fingerprint, KeyListing, Plaintext, TrustPolicy};
pub use erase::SecureEraser;
pub use error::{CryptoError, CryptoResult, PreconditionError, StartupError};
pub use gateway::{Ciphertext, EncryptionGateway, Payload};
pub use hash::{Identifier, IdentityHasher};
pub use keypair::{KeyGeneration, KeypairManager};
pub use sanitize::clean;
pub use secret::{find_hmac_secret, HmacSecret};
pub use services::CryptoServices;
pub use store::{PathVerifier, StoreVerifier};
