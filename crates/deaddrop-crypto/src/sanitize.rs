//! Allow-list validation for identity material and passphrases.

use crate::error::{CryptoError, CryptoResult};

/// Return `value` unchanged if every character is ASCII alphanumeric or
/// appears in `extra_allowed`.
///
/// Guards identifiers and passphrases before they reach the engine, whose
/// batch parameter files and argument vectors are line and space delimited.
pub fn clean<'a>(value: &'a str, extra_allowed: &str) -> CryptoResult<&'a str> {
    match value
        .char_indices()
        .find(|&(_, c)| !c.is_ascii_alphanumeric() && !extra_allowed.contains(c))
    {
        Some((offset, _)) => Err(CryptoError::InvalidInput { offset }),
        None => Ok(value),
    }
}
