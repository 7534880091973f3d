pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hasher;
pub mod output;
pub mod progress;
pub mod scanner;
pub mod utils;
pub mod verify;

pub use cli::Cli;
pub use config::{FileConfig, Settings};
pub use error::FingerprintError;
pub use fingerprint::{
    FileRecord, FingerprintOptions, FingerprintResult, RecordLayout, SkippedFile, fingerprint,
    serialize_records,
};
pub use hasher::{HashAlgorithm, StreamHasher, hash_bytes, hash_file};
pub use output::{ArtifactWriter, OutputSink};
pub use progress::{BarProgress, NoProgress, ProgressSink};
pub use scanner::{ExclusionFilter, scan_directory};
pub use utils::format_human_elapsed;
pub use verify::{VerifyOutcome, verify};
