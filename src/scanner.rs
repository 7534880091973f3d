use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use indicatif::{HumanBytes, HumanCount, ProgressBar};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{FingerprintError, Result};
use crate::fingerprint::{FingerprintOptions, SkippedFile};

/// A file that survived exclusion filtering and is waiting to be hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub size: u64,
}

/// Outcome of the enumeration pass.
#[derive(Debug, Default)]
pub struct Scan {
    /// Retained files, in walk order (entries sorted by name per directory).
    pub files: Vec<ScannedFile>,
    pub excluded: usize,
    /// Files that cannot be given a relative path.
    pub skipped: Vec<SkippedFile>,
    pub total_size: u64,
}

/// Compiled exclusion globs, matched against whole relative paths.
///
/// `*` is allowed to cross `/`, so `build/*` excludes everything below
/// `build`, and `*.log` excludes log files at any depth.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl ExclusionFilter {
    /// # Errors
    ///
    /// `InvalidPattern` for the first pattern that is not a valid glob.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern)
                .literal_separator(false)
                .build()
                .map_err(|source| FingerprintError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
            kept.push(pattern.to_string());
        }
        let set = builder
            .build()
            .map_err(|source| FingerprintError::InvalidPattern {
                pattern: kept.join(", "),
                source,
            })?;
        Ok(Self {
            patterns: kept,
            set,
        })
    }

    /// The first pattern matching `relative_path`, if any.
    pub fn matching_pattern(&self, relative_path: &str) -> Option<&str> {
        self.set
            .matches(relative_path)
            .first()
            .map(|&index| self.patterns[index].as_str())
    }
}

/// Path of `path` relative to `root`, always joined with `/`.
///
/// `None` when a component is not valid UTF-8. Lossy decoding would let two
/// distinct names share one relative path.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_str()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// Enumerates every regular file under an already validated `root`,
/// dropping excluded ones.
///
/// Directory symlinks are only descended with `follow_symlinks`. A symlink
/// that resolves to a regular file counts as that file. Unreadable entries
/// are logged and skipped; files whose names are not UTF-8 are logged and
/// listed in [`Scan::skipped`].
///
/// # Errors
///
/// `Interrupted` if the cancel flag is raised mid-walk.
pub fn scan_directory(
    root: &Path,
    filter: &ExclusionFilter,
    options: &FingerprintOptions,
) -> Result<Scan> {
    info!("Scanning {}", root.display());

    let pb = if options.show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_message("Scanning files and directories...");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut scan = Scan::default();
    let mut total_dirs = 0usize;

    let walker = WalkDir::new(root)
        .follow_links(options.follow_symlinks)
        .sort_by_file_name();

    for entry in walker {
        if options.is_cancelled() {
            pb.finish_and_clear();
            return Err(FingerprintError::Interrupted);
        }
        pb.tick();

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_dir() {
            if entry.depth() > 0 {
                total_dirs += 1;
            }
            continue;
        }
        if !path.is_file() {
            debug!("Not a regular file: '{}'", path.display());
            continue;
        }

        let Some(relative_path) = relative_path(root, path) else {
            let err = FingerprintError::NonUtf8Path {
                path: path.to_path_buf(),
            };
            let shown = path.strip_prefix(root).unwrap_or(path).to_string_lossy();
            warn!("Skipping '{}': {}", shown, err);
            scan.skipped.push(SkippedFile {
                relative_path: shown.into_owned(),
                reason: err.to_string(),
            });
            continue;
        };
        if let Some(pattern) = filter.matching_pattern(&relative_path) {
            if options.verbose {
                info!("Excluding: {} (matches '{}')", relative_path, pattern);
            } else {
                debug!("Excluding: {} (matches '{}')", relative_path, pattern);
            }
            scan.excluded += 1;
            continue;
        }

        if relative_path.contains(['\n', '\r']) {
            warn!(
                "{:?} contains a line break, its listing line can be confused with another record",
                relative_path
            );
        }

        let size = path.metadata().map(|m| m.len()).unwrap_or(0);
        scan.total_size += size;
        scan.files.push(ScannedFile {
            path: path.to_path_buf(),
            relative_path,
            size,
        });
    }
    pb.finish_and_clear();

    info!(
        "Found {} files and {} directories ({}), {} excluded",
        HumanCount(scan.files.len() as u64),
        HumanCount(total_dirs as u64),
        HumanBytes(scan.total_size),
        HumanCount(scan.excluded as u64)
    );

    Ok(scan)
}
