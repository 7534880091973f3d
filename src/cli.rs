use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fingerprint", version)]
#[command(about = "Compute a deterministic fingerprint for a directory tree")]
pub struct Cli {
    /// Directory to fingerprint
    pub root: PathBuf,

    /// Glob patterns to exclude, matched against paths relative to ROOT
    /// (`*` also matches `/`)
    #[arg(short, long, num_args = 0.., value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Log every exclusion and per-file detail
    #[arg(short, long)]
    pub verbose: bool,

    /// Hash algorithm: sha1, sha224, sha256, sha384, sha512 or blake3 (default: sha256)
    #[arg(long, value_name = "NAME")]
    pub hash_algo: Option<String>,

    /// Directory the artifacts are written to (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Also write fingerprint.json with sizes and modification times
    #[arg(long)]
    pub json: bool,

    /// Include size and modification time in the hashed listing
    #[arg(long)]
    pub hash_metadata: bool,

    /// Descend into symlinked directories
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Number of parallel threads for hashing (default: number of CPU cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// TOML file with default settings
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Compare against a stored project_fingerprint.txt instead of writing artifacts
    #[arg(long, value_name = "FILE")]
    pub verify: Option<PathBuf>,
}
