use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{HumanBytes, HumanCount};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{FingerprintError, Result};
use crate::hasher::{HashAlgorithm, hash_bytes, hash_file};
use crate::progress::ProgressSink;
use crate::scanner::{ExclusionFilter, ScannedFile, scan_directory};

const FIELD_DELIMITER: &str = "  ";
const RECORD_DELIMITER: &str = "\n";

/// Which fields of a record go into the listing and the combined digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLayout {
    /// `digest  path`. Touching a file without changing it keeps the fingerprint.
    #[default]
    Content,
    /// `digest  path  size  modified_time`.
    Extended,
}

/// One retained file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub relative_path: String,
    pub digest: String,
    pub size: u64,
    /// Modification time truncated to whole seconds, UTC.
    pub modified: Option<OffsetDateTime>,
}

impl FileRecord {
    pub fn modified_rfc3339(&self) -> Option<String> {
        self.modified.and_then(|t| t.format(&Rfc3339).ok())
    }

    /// The serialized form of this record under `layout`.
    pub fn to_line(&self, layout: RecordLayout) -> String {
        match layout {
            RecordLayout::Content => {
                [self.digest.as_str(), self.relative_path.as_str()].join(FIELD_DELIMITER)
            }
            RecordLayout::Extended => [
                self.digest.clone(),
                self.relative_path.clone(),
                self.size.to_string(),
                self.modified_rfc3339().unwrap_or_else(|| "-".to_string()),
            ]
            .join(FIELD_DELIMITER),
        }
    }
}

/// A file that could not be hashed and was left out of the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub relative_path: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FingerprintResult {
    /// Sorted by `relative_path`, byte-wise.
    pub records: Vec<FileRecord>,
    pub combined_digest: String,
    pub algorithm: HashAlgorithm,
    pub layout: RecordLayout,
    pub excluded: usize,
    pub skipped: Vec<SkippedFile>,
}

impl FingerprintResult {
    /// Sorts `records` and combines them. Input order does not matter.
    pub fn from_records(
        mut records: Vec<FileRecord>,
        algorithm: HashAlgorithm,
        layout: RecordLayout,
    ) -> Self {
        records.sort_unstable_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let combined_digest = hash_bytes(serialize_records(&records, layout).as_bytes(), algorithm);
        Self {
            records,
            combined_digest,
            algorithm,
            layout,
            excluded: 0,
            skipped: Vec::new(),
        }
    }

    /// The exact byte string the combined digest was computed over.
    pub fn listing(&self) -> String {
        serialize_records(&self.records, self.layout)
    }
}

/// Joins records into one line each, no trailing newline.
pub fn serialize_records(records: &[FileRecord], layout: RecordLayout) -> String {
    records
        .iter()
        .map(|record| record.to_line(layout))
        .collect::<Vec<_>>()
        .join(RECORD_DELIMITER)
}

#[derive(Debug, Clone, Default)]
pub struct FingerprintOptions {
    pub layout: RecordLayout,
    pub follow_symlinks: bool,
    /// Log every exclusion at info level instead of debug.
    pub verbose: bool,
    /// Hashing threads. `None` uses every core, `Some(1)` hashes inline.
    pub threads: Option<usize>,
    /// Show a spinner during the directory walk.
    pub show_progress: bool,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl FingerprintOptions {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Fingerprints every retained file under `root`.
///
/// Files that fail to hash, or whose names are not UTF-8, are logged once,
/// listed in [`FingerprintResult::skipped`] and otherwise ignored. Hashing
/// failures are also reported to `progress`.
///
/// # Errors
///
/// `InvalidRoot`, `InvalidPattern` or `Interrupted`. Nothing is hashed when
/// the root or a pattern is invalid.
pub fn fingerprint<S: AsRef<str>>(
    root: &Path,
    exclusions: &[S],
    algorithm: HashAlgorithm,
    options: &FingerprintOptions,
    progress: &dyn ProgressSink,
) -> Result<FingerprintResult> {
    if !root.is_dir() {
        return Err(FingerprintError::InvalidRoot {
            path: root.to_path_buf(),
        });
    }
    let filter = ExclusionFilter::new(exclusions)?;

    let scan = scan_directory(root, &filter, options)?;
    progress.on_scan_complete(scan.files.len(), scan.total_size);

    info!(
        "Hashing {} files ({}) with {}",
        HumanCount(scan.files.len() as u64),
        HumanBytes(scan.total_size),
        algorithm
    );
    let outcomes = hash_files(&scan.files, algorithm, options, progress);
    if options.is_cancelled() {
        progress.on_finish();
        return Err(FingerprintError::Interrupted);
    }

    let mut records = Vec::with_capacity(outcomes.len());
    let mut skipped = scan.skipped;
    for (file, outcome) in scan.files.iter().zip(outcomes) {
        match outcome {
            Ok(record) => records.push(record),
            Err(e) if e.is_fatal() => {
                progress.on_finish();
                return Err(e);
            }
            Err(e) => {
                warn!("Skipping '{}': {}", file.relative_path, e);
                progress.on_file_failed(&file.relative_path, &e);
                skipped.push(SkippedFile {
                    relative_path: file.relative_path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    progress.on_finish();

    let mut result = FingerprintResult::from_records(records, algorithm, options.layout);
    result.excluded = scan.excluded;
    result.skipped = skipped;

    info!(
        "Fingerprinted {} files ({} skipped, {} excluded)",
        HumanCount(result.records.len() as u64),
        HumanCount(result.skipped.len() as u64),
        HumanCount(result.excluded as u64)
    );
    Ok(result)
}

/// Hashes `files`, returning one outcome per file in input order.
fn hash_files(
    files: &[ScannedFile],
    algorithm: HashAlgorithm,
    options: &FingerprintOptions,
    progress: &dyn ProgressSink,
) -> Vec<Result<FileRecord>> {
    let hash = |file: &ScannedFile| hash_one(file, algorithm, options, progress);

    if options.threads == Some(1) {
        return files.iter().map(hash).collect();
    }

    match rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads.unwrap_or(0))
        .build()
    {
        Ok(pool) => pool.install(|| files.par_iter().map(hash).collect()),
        Err(e) => {
            warn!("Failed to start hashing threads ({}), hashing sequentially", e);
            files.iter().map(hash).collect()
        }
    }
}

fn hash_one(
    file: &ScannedFile,
    algorithm: HashAlgorithm,
    options: &FingerprintOptions,
    progress: &dyn ProgressSink,
) -> Result<FileRecord> {
    if options.is_cancelled() {
        return Err(FingerprintError::Interrupted);
    }
    progress.on_file_start(&file.relative_path);

    let metadata = fs::metadata(&file.path).map_err(|e| FingerprintError::from_io(&file.path, e))?;
    let digest = hash_file(&file.path, algorithm)?;
    let modified = metadata
        .modified()
        .ok()
        .map(OffsetDateTime::from)
        .and_then(|t| t.replace_nanosecond(0).ok());

    progress.on_file_done(&file.relative_path, metadata.len());
    Ok(FileRecord {
        relative_path: file.relative_path.clone(),
        digest,
        size: metadata.len(),
        modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::sync::{Mutex, Once};
    use tempfile::{TempDir, tempdir};

    const SHA256_HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const SHA256_WORLD: &str = "486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7";
    const SHA256_EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const NO_EXCLUSIONS: &[&str] = &[];

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn hello_world_tree() -> TempDir {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "hello");
        write(dir.path(), "sub/b.txt", "world");
        dir
    }

    fn sequential() -> FingerprintOptions {
        FingerprintOptions {
            threads: Some(1),
            ..FingerprintOptions::default()
        }
    }

    fn record(path: &str, digest: &str) -> FileRecord {
        FileRecord {
            relative_path: path.to_string(),
            digest: digest.to_string(),
            size: 5,
            modified: None,
        }
    }

    #[test]
    fn hello_world_round_trip() {
        let dir = hello_world_tree();
        let result = fingerprint(
            dir.path(),
            NO_EXCLUSIONS,
            HashAlgorithm::Sha256,
            &sequential(),
            &NoProgress,
        )
        .unwrap();

        let expected_listing = format!("{SHA256_HELLO}  a.txt\n{SHA256_WORLD}  sub/b.txt");
        assert_eq!(result.listing(), expected_listing);
        assert_eq!(
            result.combined_digest,
            "938754cee615272b5d60796e8e3825eed5062b88e3a985037ed668da081531a9"
        );
        assert_eq!(result.records[1].size, 5);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn repeated_runs_agree() {
        let dir = hello_world_tree();
        write(dir.path(), "sub/deeper/c.bin", "c");
        let parallel = FingerprintOptions {
            threads: Some(4),
            ..FingerprintOptions::default()
        };

        let first = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &sequential(), &NoProgress)
            .unwrap();
        let second = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &parallel, &NoProgress)
            .unwrap();

        assert_eq!(first.combined_digest, second.combined_digest);
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn record_order_does_not_matter() {
        let sorted = vec![
            record("a.txt", SHA256_HELLO),
            record("b/c.txt", SHA256_WORLD),
            record("b/d.txt", SHA256_EMPTY),
            record("z.txt", SHA256_HELLO),
        ];
        let mut shuffled = sorted.clone();
        shuffled.reverse();
        shuffled.swap(0, 2);

        let expected = FingerprintResult::from_records(sorted, HashAlgorithm::Sha256, RecordLayout::Content);
        let actual = FingerprintResult::from_records(shuffled, HashAlgorithm::Sha256, RecordLayout::Content);

        assert_eq!(actual.records, expected.records);
        assert_eq!(actual.combined_digest, expected.combined_digest);
    }

    #[test]
    fn sort_is_bytewise() {
        let result = FingerprintResult::from_records(
            vec![record("b", "1"), record("B", "2"), record("a/b", "3"), record("a-b", "4")],
            HashAlgorithm::Sha256,
            RecordLayout::Content,
        );
        let order: Vec<&str> = result.records.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(order, vec!["B", "a-b", "a/b", "b"]);
    }

    #[test]
    fn excluded_files_do_not_affect_digest() {
        let dir = hello_world_tree();
        let baseline = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &sequential(), &NoProgress)
            .unwrap();

        write(dir.path(), "build/out.o", "object");
        write(dir.path(), "sub/debug.log", "noise");
        let filtered = fingerprint(
            dir.path(),
            &["build/*", "*.log"],
            HashAlgorithm::Sha256,
            &sequential(),
            &NoProgress,
        )
        .unwrap();

        assert_eq!(filtered.combined_digest, baseline.combined_digest);
        assert_eq!(filtered.excluded, 2);
        assert!(!filtered.listing().contains("build/out.o"));
    }

    static WARNINGS: Mutex<Vec<String>> = Mutex::new(Vec::new());

    struct WarningLog;

    impl log::Log for WarningLog {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                WARNINGS.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    fn capture_warnings() {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| {
            log::set_logger(&WarningLog).unwrap();
            log::set_max_level(log::LevelFilter::Warn);
        });
    }

    /// Warnings emitted so far that mention `needle`. Tests run in parallel,
    /// so callers pass something unique such as their temp dir.
    fn warnings_mentioning(needle: &str) -> Vec<String> {
        WARNINGS
            .lock()
            .unwrap()
            .iter()
            .filter(|message| message.contains(needle))
            .cloned()
            .collect()
    }

    #[derive(Default)]
    struct Recorder {
        started: Mutex<Vec<String>>,
        failed: Mutex<Vec<String>>,
        remove_on_start: Option<std::path::PathBuf>,
    }

    impl ProgressSink for Recorder {
        fn on_file_start(&self, relative_path: &str) {
            self.started.lock().unwrap().push(relative_path.to_string());
            if let Some(path) = &self.remove_on_start {
                if path.ends_with(relative_path) {
                    let _ = fs::remove_file(path);
                }
            }
        }

        fn on_file_failed(&self, relative_path: &str, _error: &FingerprintError) {
            self.failed.lock().unwrap().push(relative_path.to_string());
        }
    }

    #[test]
    fn vanished_file_is_skipped_not_fatal() {
        capture_warnings();
        let dir = hello_world_tree();
        write(dir.path(), "c.txt", "gone soon");
        let progress = Recorder {
            remove_on_start: Some(dir.path().join("c.txt")),
            ..Recorder::default()
        };

        let result = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &sequential(), &progress)
            .unwrap();

        assert_eq!(result.records.len(), 2);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].relative_path, "c.txt");
        assert!(result.skipped[0].reason.contains("not found"));
        assert_eq!(*progress.failed.lock().unwrap(), vec!["c.txt".to_string()]);
        assert_eq!(
            result.combined_digest,
            "938754cee615272b5d60796e8e3825eed5062b88e3a985037ed668da081531a9"
        );

        let warnings = warnings_mentioning(&dir.path().display().to_string());
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("c.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_skipped_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        capture_warnings();
        let dir = hello_world_tree();
        let locked = dir.path().join("locked.txt");
        fs::write(&locked, "secret").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&locked).is_ok() {
            // Running as root: permissions are not enforced.
            return;
        }

        let progress = Recorder::default();
        let result = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &sequential(), &progress)
            .unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(result.records.len(), 2);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].relative_path, "locked.txt");
        assert!(result.skipped[0].reason.starts_with("failed to read"));
        assert_eq!(*progress.failed.lock().unwrap(), vec!["locked.txt".to_string()]);
        assert_eq!(
            result.combined_digest,
            "938754cee615272b5d60796e8e3825eed5062b88e3a985037ed668da081531a9"
        );

        let warnings = warnings_mentioning(&dir.path().display().to_string());
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("locked.txt"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_names_never_share_a_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        capture_warnings();
        let dir = hello_world_tree();
        fs::write(dir.path().join(OsStr::from_bytes(b"\xff")), "one").unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"\xfe")), "two").unwrap();

        let result = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &sequential(), &NoProgress)
            .unwrap();

        let paths: Vec<&str> = result.records.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.txt"]);
        assert_eq!(result.skipped.len(), 2);
        assert_eq!(
            result.combined_digest,
            "938754cee615272b5d60796e8e3825eed5062b88e3a985037ed668da081531a9"
        );
        assert_eq!(
            warnings_mentioning(&dir.path().display().to_string()).len(),
            2
        );
    }

    #[cfg(unix)]
    #[test]
    fn line_breaks_in_names_are_flagged() {
        capture_warnings();
        let dir = tempdir().unwrap();
        let marker = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        let name = format!("{marker}\nforged");
        write(dir.path(), &name, "x");

        let result = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &sequential(), &NoProgress)
            .unwrap();

        assert_eq!(result.records.len(), 1);
        let warnings = warnings_mentioning(&marker);
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("line break"));
    }

    #[test]
    fn excluded_files_are_never_opened() {
        let dir = hello_world_tree();
        let progress = Recorder::default();
        fingerprint(dir.path(), &["sub/*"], HashAlgorithm::Sha256, &sequential(), &progress).unwrap();
        assert_eq!(*progress.started.lock().unwrap(), vec!["a.txt".to_string()]);
    }

    #[test]
    fn algorithm_changes_digest_length() {
        let dir = hello_world_tree();
        let sha1 = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha1, &sequential(), &NoProgress)
            .unwrap();
        let sha256 = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &sequential(), &NoProgress)
            .unwrap();

        assert_eq!(sha1.combined_digest.len(), 40);
        assert_eq!(sha256.combined_digest.len(), 64);
        assert!(sha1.records.iter().all(|r| r.digest.len() == 40));
        assert_ne!(sha1.combined_digest, sha256.combined_digest[..40]);
    }

    #[test]
    fn empty_tree_hashes_empty_string() {
        let dir = tempdir().unwrap();
        let result = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &sequential(), &NoProgress)
            .unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.listing(), "");
        assert_eq!(result.combined_digest, SHA256_EMPTY);
    }

    #[test]
    fn invalid_root_fails_before_hashing() {
        let dir = tempdir().unwrap();
        let progress = Recorder::default();
        let err = fingerprint(
            &dir.path().join("missing"),
            NO_EXCLUSIONS,
            HashAlgorithm::Sha256,
            &sequential(),
            &progress,
        )
        .unwrap_err();
        assert!(matches!(err, FingerprintError::InvalidRoot { .. }));
        assert!(progress.started.lock().unwrap().is_empty());
    }

    #[test]
    fn file_root_is_invalid() {
        let dir = tempdir().unwrap();
        write(dir.path(), "file.txt", "x");
        let err = fingerprint(
            &dir.path().join("file.txt"),
            NO_EXCLUSIONS,
            HashAlgorithm::Sha256,
            &sequential(),
            &NoProgress,
        )
        .unwrap_err();
        assert!(matches!(err, FingerprintError::InvalidRoot { .. }));
    }

    #[test]
    fn invalid_pattern_is_fatal() {
        let dir = hello_world_tree();
        let err = fingerprint(dir.path(), &["[oops"], HashAlgorithm::Sha256, &sequential(), &NoProgress)
            .unwrap_err();
        assert!(matches!(err, FingerprintError::InvalidPattern { .. }));
    }

    #[test]
    fn extended_layout_includes_size_and_time() {
        let dir = hello_world_tree();
        let options = FingerprintOptions {
            layout: RecordLayout::Extended,
            ..sequential()
        };
        let content = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &sequential(), &NoProgress)
            .unwrap();
        let extended = fingerprint(dir.path(), NO_EXCLUSIONS, HashAlgorithm::Sha256, &options, &NoProgress)
            .unwrap();

        let first = extended.listing().lines().next().unwrap().to_string();
        let fields: Vec<&str> = first.split("  ").collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[1], "a.txt");
        assert_eq!(fields[2], "5");
        assert!(fields[3].ends_with('Z'));
        assert_ne!(content.combined_digest, extended.combined_digest);
    }

    #[test]
    fn unknown_mtime_serializes_as_dash() {
        let line = record("x", "abc").to_line(RecordLayout::Extended);
        assert_eq!(line, "abc  x  5  -");
    }
}
