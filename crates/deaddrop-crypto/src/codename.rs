//! Codename generation over a shared word list.
//!
//! Two disciplines, deliberately kept apart by their return types:
//!
//! - [`WordList::random_codename`] draws from the OS CSPRNG. The result *is*
//!   the source's secret and cannot be reconstructed from anything stored.
//! - [`WordList::display_codename`] draws from a PCG generator seeded by the
//!   identifier. Anyone holding the identifier can recompute it, so it is a
//!   UI label only and must never stand in for the secret.

use rand::rngs::OsRng;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

use crate::error::StartupError;
use crate::hash::Identifier;

/// Words per codename, regardless of list size
pub const WORDS_IN_CODENAME: usize = 4;

/// Immutable, non-empty list of candidate words.
#[derive(Debug, Clone)]
pub struct WordList {
    words: Vec<String>,
}

impl WordList {
    /// Build from an iterator of words; blank entries are dropped.
    pub fn new<I, S>(words: I) -> Result<Self, StartupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Err(StartupError::WordList("word list is empty".into()));
        }
        Ok(Self { words })
    }

    /// Load a word list file, one word per line.
    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StartupError::WordList(format!("reading {}: {e}", path.display())))?;
        let list = Self::new(content.lines())?;
        tracing::debug!(words = list.len(), "loaded word list from {}", path.display());
        Ok(list)
    }

    /// The BIP-39 English list (2048 words).
    pub fn bip39_english() -> Self {
        Self {
            words: bip39::Language::English
                .word_list()
                .iter()
                .map(|w| w.to_string())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }

    /// Fresh secret codename for a new source.
    pub fn random_codename(&self) -> Codename {
        Codename(SecretString::from(self.draw(&mut OsRng)))
    }

    /// Reproducible display label for an existing identity. Not a secret.
    pub fn display_codename(&self, identifier: &Identifier) -> DisplayCodename {
        self.display_codename_for(identifier.as_str())
    }

    /// Display label seeded from an arbitrary string.
    pub fn display_codename_for(&self, seed: &str) -> DisplayCodename {
        // SHA-256 only widens the seed to the generator's 32-byte state.
        let seed: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
        let mut rng = Pcg64::from_seed(seed);
        DisplayCodename(self.draw(&mut rng))
    }

    /// Draw `WORDS_IN_CODENAME` words with replacement.
    fn draw<R: Rng>(&self, rng: &mut R) -> String {
        (0..WORDS_IN_CODENAME)
            .map(|_| self.words[rng.gen_range(0..self.words.len())].as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Secret four-word codename. Redacted in `Debug`, zeroized on drop.
pub struct Codename(SecretString);

impl Codename {
    /// Wrap a codename supplied by a returning source.
    pub fn from_secret(secret: SecretString) -> Self {
        Self(secret)
    }

    pub fn secret(&self) -> &SecretString {
        &self.0
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Codename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Codename").field(&"[REDACTED]").finish()
    }
}

/// Non-secret display label derived from an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayCodename(String);

impl DisplayCodename {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayCodename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
