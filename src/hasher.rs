use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::{FingerprintError, Result};

const BUFFER_SIZE: usize = 8192;

/// The closed set of digest algorithms a fingerprint can be computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Blake3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Length of the hex-encoded digest.
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha224 => 56,
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => 64,
            HashAlgorithm::Sha384 => 96,
            HashAlgorithm::Sha512 => 128,
        }
    }

    /// A fresh streaming hasher for this algorithm.
    pub fn hasher(self) -> Box<dyn StreamHasher> {
        match self {
            HashAlgorithm::Sha1 => Box::new(RustCrypto(sha1::Sha1::new())),
            HashAlgorithm::Sha224 => Box::new(RustCrypto(sha2::Sha224::new())),
            HashAlgorithm::Sha256 => Box::new(RustCrypto(sha2::Sha256::new())),
            HashAlgorithm::Sha384 => Box::new(RustCrypto(sha2::Sha384::new())),
            HashAlgorithm::Sha512 => Box::new(RustCrypto(sha2::Sha512::new())),
            HashAlgorithm::Blake3 => Box::new(blake3::Hasher::new()),
        }
    }

    fn supported_names() -> String {
        Self::ALL
            .iter()
            .map(|algorithm| algorithm.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = FingerprintError;

    /// Accepts names case-insensitively, with or without a dash (`SHA-256`).
    fn from_str(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "");
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.name() == normalized)
            .ok_or_else(|| FingerprintError::UnsupportedAlgorithm {
                name: name.to_string(),
                supported: Self::supported_names(),
            })
    }
}

/// Uniform incremental hashing interface shared by every algorithm.
pub trait StreamHasher: Send {
    fn update(&mut self, bytes: &[u8]);

    /// Consumes the hasher and returns the lowercase hex digest.
    fn finalize_hex(self: Box<Self>) -> String;
}

struct RustCrypto<D>(D);

impl<D: Digest + Send> StreamHasher for RustCrypto<D> {
    fn update(&mut self, bytes: &[u8]) {
        Digest::update(&mut self.0, bytes);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        let RustCrypto(digest) = *self;
        hex::encode(digest.finalize())
    }
}

impl StreamHasher for blake3::Hasher {
    fn update(&mut self, bytes: &[u8]) {
        blake3::Hasher::update(self, bytes);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        blake3::Hasher::finalize(&self).to_hex().to_string()
    }
}

/// Hashes an in-memory byte string.
pub fn hash_bytes(bytes: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(bytes);
    hasher.finalize_hex()
}

/// Streams a file through `algorithm` in fixed-size chunks.
///
/// # Errors
///
/// `NotFound` if the file is gone when it is opened, `Io` for any other
/// open or read failure.
pub fn hash_file(file_path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let file = File::open(file_path).map_err(|e| FingerprintError::from_io(file_path, e))?;

    let mut reader = BufReader::new(file);
    let mut hasher = algorithm.hasher();
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut total_bytes = 0u64;

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| FingerprintError::from_io(file_path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total_bytes += bytes_read as u64;
    }

    let hash = hasher.finalize_hex();
    debug!(
        "{} of '{}': {} ({} bytes)",
        algorithm,
        file_path.display(),
        hash,
        total_bytes
    );
    Ok(hash)
}
