//! Secure deletion of plaintext files through an external overwrite utility.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use deaddrop_core::config::EraseConfig;

use crate::error::{CryptoError, CryptoResult, PreconditionError};
use crate::store::PathVerifier;

/// Runs the configured overwrite-and-unlink utility on verified paths.
pub struct SecureEraser {
    program: PathBuf,
    args: Vec<String>,
    verifier: Arc<dyn PathVerifier>,
}

impl SecureEraser {
    pub fn new(config: &EraseConfig, verifier: Arc<dyn PathVerifier>) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            verifier,
        }
    }

    /// Check that the utility can be spawned at all.
    ///
    /// The exit status is ignored: `srm` without operands exits non-zero.
    pub fn probe(config: &EraseConfig) -> Result<(), PreconditionError> {
        Command::new(&config.program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|_| ())
            .map_err(|e| PreconditionError::MissingUtility {
                program: config.program.display().to_string(),
                reason: e.to_string(),
            })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Overwrite and unlink `path`. The path is verified before anything runs.
    pub fn secure_delete(&self, path: &Path) -> CryptoResult<()> {
        self.verifier.verify(path)?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            let diagnostic = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(
                program = %self.program.display(),
                status = %output.status,
                "secure erase of {} failed",
                path.display()
            );
            return Err(CryptoError::Erase {
                path: path.to_path_buf(),
                status: output.status.to_string(),
                diagnostic,
            });
        }

        tracing::debug!("securely erased {}", path.display());
        Ok(())
    }
}

impl std::fmt::Debug for SecureEraser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureEraser")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::store::StoreVerifier;

    fn eraser(program: &str, args: &[&str]) -> (tempfile::TempDir, Arc<StoreVerifier>, SecureEraser) {
        let dir = tempfile::tempdir().unwrap();
        let verifier = Arc::new(StoreVerifier::new(&dir.path().join("store")).unwrap());
        let config = EraseConfig {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        };
        let eraser = SecureEraser::new(&config, verifier.clone());
        (dir, verifier, eraser)
    }

    #[test]
    fn deletes_verified_file() {
        let (_dir, verifier, eraser) = eraser("rm", &["-f"]);
        let target = verifier.root().join("plaintext.txt");
        std::fs::write(&target, b"attack at dawn").unwrap();

        eraser.secure_delete(&target).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn rejected_path_is_untouched() {
        let (dir, _verifier, eraser) = eraser("rm", &["-f"]);
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, b"keep me").unwrap();

        let err = eraser.secure_delete(&outside).unwrap_err();
        assert!(matches!(err, CryptoError::PathRejected { .. }));
        assert_eq!(std::fs::read(&outside).unwrap(), b"keep me");
    }

    #[test]
    fn failing_utility_reports_erase_error() {
        let (_dir, verifier, eraser) = eraser("false", &[]);
        let target = verifier.root().join("plaintext.txt");
        std::fs::write(&target, b"x").unwrap();

        match eraser.secure_delete(&target) {
            Err(CryptoError::Erase { path, .. }) => assert_eq!(path, target),
            other => panic!("expected erase error, got {other:?}"),
        }
        assert!(target.exists());
    }

    #[test]
    fn probe_reports_missing_utility() {
        let config = EraseConfig {
            program: "/nonexistent/deaddrop-srm".into(),
            args: Vec::new(),
        };
        assert!(matches!(
            SecureEraser::probe(&config),
            Err(PreconditionError::MissingUtility { .. })
        ));
    }

    #[test]
    fn probe_ignores_exit_status() {
        let config = EraseConfig {
            program: "false".into(),
            args: Vec::new(),
        };
        SecureEraser::probe(&config).unwrap();
    }
}
