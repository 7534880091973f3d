use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::error::{FingerprintError, Result};
use crate::fingerprint::FingerprintResult;
use crate::hasher::HashAlgorithm;

pub const FILE_HASHES_NAME: &str = "file_hashes.txt";
pub const PROJECT_FINGERPRINT_NAME: &str = "project_fingerprint.txt";
pub const METADATA_JSON_NAME: &str = "fingerprint.json";

/// Destination for a finished fingerprint.
pub trait OutputSink {
    /// # Errors
    ///
    /// `Output` when an artifact cannot be written.
    fn emit(&self, result: &FingerprintResult) -> Result<()>;
}

/// Writes the artifacts into one directory, replacing earlier runs.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    pub output_dir: PathBuf,
    pub write_json: bool,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            write_json: false,
        }
    }

    pub fn with_json(mut self, write_json: bool) -> Self {
        self.write_json = write_json;
        self
    }

    pub fn file_hashes_path(&self) -> PathBuf {
        self.output_dir.join(FILE_HASHES_NAME)
    }

    pub fn project_fingerprint_path(&self) -> PathBuf {
        self.output_dir.join(PROJECT_FINGERPRINT_NAME)
    }

    pub fn metadata_json_path(&self) -> PathBuf {
        self.output_dir.join(METADATA_JSON_NAME)
    }
}

impl OutputSink for ArtifactWriter {
    fn emit(&self, result: &FingerprintResult) -> Result<()> {
        fs::create_dir_all(&self.output_dir).map_err(|source| FingerprintError::Output {
            path: self.output_dir.clone(),
            source,
        })?;

        write_atomic(&self.file_hashes_path(), result.listing().as_bytes())?;
        write_atomic(
            &self.project_fingerprint_path(),
            result.combined_digest.as_bytes(),
        )?;
        if self.write_json {
            let document = MetadataDocument::from(result);
            let json = serde_json::to_vec_pretty(&document)
                .map_err(|e| FingerprintError::Output {
                    path: self.metadata_json_path(),
                    source: e.into(),
                })?;
            write_atomic(&self.metadata_json_path(), &json)?;
        }

        info!("Wrote fingerprint artifacts to {}", self.output_dir.display());
        Ok(())
    }
}

/// Writes `contents` next to `path` and renames it into place, so readers
/// never observe a half-written artifact.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let output_error = |source| FingerprintError::Output {
        path: path.to_path_buf(),
        source,
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = path.with_file_name(format!(".{file_name}.partial"));

    let mut file = fs::File::create(&staging).map_err(output_error)?;
    file.write_all(contents).map_err(output_error)?;
    file.sync_all().map_err(output_error)?;
    drop(file);
    fs::rename(&staging, path).map_err(output_error)?;

    debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

/// `fingerprint.json` layout.
#[derive(Debug, Serialize)]
pub struct MetadataDocument<'a> {
    pub algorithm: HashAlgorithm,
    pub file_hashes: Vec<MetadataEntry<'a>>,
    pub combined_hash: &'a str,
}

#[derive(Debug, Serialize)]
pub struct MetadataEntry<'a> {
    pub file_path: &'a str,
    pub hash: &'a str,
    pub size: u64,
    pub modified_time: Option<String>,
}

impl<'a> From<&'a FingerprintResult> for MetadataDocument<'a> {
    fn from(result: &'a FingerprintResult) -> Self {
        Self {
            algorithm: result.algorithm,
            file_hashes: result
                .records
                .iter()
                .map(|record| MetadataEntry {
                    file_path: &record.relative_path,
                    hash: &record.digest,
                    size: record.size,
                    modified_time: record.modified_rfc3339(),
                })
                .collect(),
            combined_hash: &result.combined_digest,
        }
    }
}
