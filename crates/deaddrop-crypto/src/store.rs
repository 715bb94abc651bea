//! Path verification: every filesystem target (encryption output, erase
//! target) must pass a [`PathVerifier`] first.

use std::path::{Component, Path, PathBuf};

use crate::error::{CryptoError, CryptoResult, StartupError};

/// Decides whether a path is a legitimate target for writing or erasing.
pub trait PathVerifier: Send + Sync {
    fn verify(&self, path: &Path) -> CryptoResult<()>;
}

/// Confines targets to regular files inside a store root.
#[derive(Debug, Clone)]
pub struct StoreVerifier {
    root: PathBuf,
}

impl StoreVerifier {
    /// Create the root if needed and pin its canonical form.
    pub fn new(root: &Path) -> Result<Self, StartupError> {
        let store_err = |reason: String| StartupError::Store {
            path: root.to_path_buf(),
            reason,
        };
        std::fs::create_dir_all(root).map_err(|e| store_err(e.to_string()))?;
        let root = root
            .canonicalize()
            .map_err(|e| store_err(format!("canonicalizing: {e}")))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PathVerifier for StoreVerifier {
    fn verify(&self, path: &Path) -> CryptoResult<()> {
        let reject = |reason: &str| {
            Err(CryptoError::PathRejected {
                path: path.to_path_buf(),
                reason: reason.to_string(),
            })
        };

        if !path.is_absolute() {
            return reject("path is not absolute");
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        {
            return reject("path contains relative components");
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return reject("path has no usable file name");
        };
        if name.starts_with('.')
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return reject("file name has disallowed characters");
        }

        let Some(parent) = path.parent() else {
            return reject("path has no parent directory");
        };
        match parent.canonicalize() {
            Ok(parent) if parent.starts_with(&self.root) => {}
            Ok(_) => return reject("path is outside the store"),
            Err(_) => return reject("parent directory does not exist"),
        }

        if let Ok(meta) = std::fs::symlink_metadata(path) {
            if meta.file_type().is_symlink() {
                return reject("path is a symlink");
            }
            if !meta.is_file() {
                return reject("path is not a regular file");
            }
        }
        Ok(())
    }
}
