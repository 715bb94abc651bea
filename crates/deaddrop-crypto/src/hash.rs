//! Identifier derivation: HMAC-SHA256 over a codename, keyed by the
//! process-wide shared secret.
//!
//! The identifier is the public handle for an identity (keypair lookup,
//! database key). Without the secret it cannot be inverted back to the
//! codename, and rotating the secret orphans every identifier it produced.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretSlice};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Hex length of an identifier (256-bit digest)
pub const IDENTIFIER_LEN: usize = 64;

/// Stable, non-secret identity handle: lowercase hex HMAC-SHA256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identifier {
    type Err = CryptoError;

    /// Accepts exactly 64 lowercase hex characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((offset, _)) = s
            .char_indices()
            .find(|&(_, c)| !matches!(c, '0'..='9' | 'a'..='f'))
        {
            return Err(CryptoError::InvalidInput { offset });
        }
        if s.len() != IDENTIFIER_LEN {
            return Err(CryptoError::InvalidInput { offset: s.len().min(IDENTIFIER_LEN) });
        }
        Ok(Identifier(s.to_string()))
    }
}

/// Keyed hasher turning codenames into identifiers.
///
/// The HMAC state is keyed once at construction and cloned per call.
#[derive(Clone)]
pub struct IdentityHasher {
    mac: HmacSha256,
}

impl IdentityHasher {
    pub fn new(secret: &SecretSlice<u8>) -> Self {
        // HMAC accepts keys of any length; new_from_slice cannot fail here.
        let mac = <HmacSha256 as Mac>::new_from_slice(secret.expose_secret())
            .unwrap_or_else(|_| unreachable!("HMAC key length is unrestricted"));
        Self { mac }
    }

    /// Deterministic keyed digest of `value`, lowercase hex.
    pub fn stable_hash(&self, value: &str) -> Identifier {
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        Identifier(hex::encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for IdentityHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityHasher")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hasher(secret: &[u8]) -> IdentityHasher {
        IdentityHasher::new(&SecretSlice::from(secret.to_vec()))
    }

    #[test]
    fn regression_vector() {
        let h = hasher(b"deaddrop-regression-secret");
        assert_eq!(
            h.stable_hash("Hello, world!").as_str(),
            "06e13fe9900ed7509446da208b86d4c984480dcb8fb0c95e277ca17e6343ea04"
        );
    }

    #[test]
    fn empty_key_and_message() {
        // RFC 4231-style sanity check: HMAC-SHA256("", "")
        assert_eq!(
            hasher(b"").stable_hash("").as_str(),
            "b613679a0814d9ec772f95d778c35fc5ff1697c493715653c6c712144292c5ad"
        );
    }

    #[test]
    fn secret_changes_digest() {
        let a = hasher(b"secret-a").stable_hash("randomid");
        let b = hasher(b"secret-b").stable_hash("randomid");
        assert_ne!(a, b);
    }

    #[test]
    fn identifier_parse() {
        let id = hasher(b"k").stable_hash("v");
        let parsed: Identifier = id.as_str().parse().unwrap();
        assert_eq!(parsed, id);

        assert!("ABCDEF".parse::<Identifier>().is_err());
        assert!("abc".parse::<Identifier>().is_err());
        assert!(format!("{}0", id).parse::<Identifier>().is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let h = hasher(b"top-secret");
        assert!(!format!("{h:?}").contains("top-secret"));
    }

    proptest! {
        #[test]
        fn deterministic(value in ".{0,64}") {
            let h = hasher(b"deaddrop-regression-secret");
            let first = h.stable_hash(&value);
            prop_assert_eq!(&first, &h.stable_hash(&value));
            prop_assert_eq!(first.as_str().len(), IDENTIFIER_LEN);
            prop_assert!(first.as_str().parse::<Identifier>().is_ok());
        }
    }
}
