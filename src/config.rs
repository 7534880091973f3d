use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::cli::Cli;
use crate::fingerprint::{FingerprintOptions, RecordLayout};
use crate::hasher::HashAlgorithm;

/// Defaults read from a TOML file.
///
/// ```toml
/// exclude = [".git/*", "target/*"]
/// hash_algo = "blake3"
/// json = true
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub exclude: Vec<String>,
    pub hash_algo: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub json: Option<bool>,
    pub hash_metadata: Option<bool>,
    pub follow_symlinks: Option<bool>,
    pub threads: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: '{}'", path.display()))?;
        let config: FileConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: '{}'", path.display()))?;
        debug!("Loaded config from '{}': {:?}", path.display(), config);
        Ok(config)
    }
}

/// Effective settings for one run: CLI flags over config file over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub exclude: Vec<String>,
    pub algorithm: HashAlgorithm,
    pub output_dir: PathBuf,
    pub json: bool,
    pub layout: RecordLayout,
    pub follow_symlinks: bool,
    pub threads: Option<usize>,
    pub verbose: bool,
    pub show_progress: bool,
    pub verify: Option<PathBuf>,
}

impl Settings {
    /// # Errors
    ///
    /// Fails with `UnsupportedAlgorithm` when neither source names a known
    /// algorithm.
    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self> {
        let algorithm = match cli.hash_algo.or(file.hash_algo) {
            Some(name) => name.parse::<HashAlgorithm>()?,
            None => HashAlgorithm::default(),
        };

        let mut exclude = file.exclude;
        for pattern in cli.exclude {
            if !exclude.contains(&pattern) {
                exclude.push(pattern);
            }
        }

        let hash_metadata = cli.hash_metadata || file.hash_metadata.unwrap_or(false);

        Ok(Self {
            root: cli.root,
            exclude,
            algorithm,
            output_dir: cli
                .output_dir
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            json: cli.json || file.json.unwrap_or(false),
            layout: if hash_metadata {
                RecordLayout::Extended
            } else {
                RecordLayout::Content
            },
            follow_symlinks: cli.follow_symlinks || file.follow_symlinks.unwrap_or(false),
            threads: cli.threads.or(file.threads).filter(|&n| n > 0),
            verbose: cli.verbose,
            show_progress: !cli.no_progress,
            verify: cli.verify,
        })
    }

    pub fn fingerprint_options(&self) -> FingerprintOptions {
        FingerprintOptions {
            layout: self.layout,
            follow_symlinks: self.follow_symlinks,
            verbose: self.verbose,
            threads: self.threads,
            show_progress: self.show_progress,
            cancel: None,
        }
    }
}
