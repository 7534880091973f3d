use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::error::{FingerprintError, Result};
use crate::fingerprint::FingerprintResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Match,
    Mismatch { expected: String, actual: String },
}

/// Compares a fresh result with a previously written `project_fingerprint.txt`.
///
/// Surrounding whitespace and hex case in the stored digest are ignored. A
/// stored digest whose length does not fit `result.algorithm` is still a
/// plain mismatch, with a hint logged.
///
/// # Errors
///
/// `NotFound` or `Io` if the stored digest cannot be read.
pub fn verify(expected_digest_file: &Path, result: &FingerprintResult) -> Result<VerifyOutcome> {
    let stored = fs::read_to_string(expected_digest_file)
        .map_err(|e| FingerprintError::from_io(expected_digest_file, e))?;
    let expected = stored.trim().to_ascii_lowercase();

    if expected == result.combined_digest {
        info!("Fingerprint matches {}", expected_digest_file.display());
        Ok(VerifyOutcome::Match)
    } else {
        warn!(
            "Fingerprint mismatch: expected {}, got {}",
            expected, result.combined_digest
        );
        if expected.len() != result.algorithm.hex_len() {
            warn!(
                "Stored digest has {} hex digits but {} produces {}; was it written with another --hash-algo?",
                expected.len(),
                result.algorithm,
                result.algorithm.hex_len()
            );
        }
        Ok(VerifyOutcome::Mismatch {
            expected,
            actual: result.combined_digest.clone(),
        })
    }
}
