use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::HumanCount;
use log::{LevelFilter, debug, error, info, warn};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use time::macros::format_description;

use dir_fingerprint::{
    ArtifactWriter, BarProgress, Cli, FileConfig, NoProgress, OutputSink, ProgressSink, Settings,
    VerifyOutcome, fingerprint, format_human_elapsed, verify,
};

fn init_logging(verbose: bool) -> Result<()> {
    let mut builder = ConfigBuilder::new();
    // UTC timestamps when the local offset cannot be determined
    let _ = builder.set_time_offset_to_local();
    builder.set_time_format_custom(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        builder.build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")
}

fn run(cli: Cli) -> Result<ExitCode> {
    let start_time = Instant::now();

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(cli, file_config)?;
    debug!("Effective settings: {:?}", settings);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))
            .context("Failed to install Ctrl-C handler")?;
    }
    let mut options = settings.fingerprint_options();
    options.cancel = Some(cancel);

    info!("Target directory: '{}'", settings.root.display());

    let progress: Box<dyn ProgressSink> = if settings.show_progress {
        Box::new(BarProgress::new())
    } else {
        Box::new(NoProgress)
    };
    let result = fingerprint(
        &settings.root,
        &settings.exclude,
        settings.algorithm,
        &options,
        progress.as_ref(),
    )?;

    if !result.skipped.is_empty() {
        warn!(
            "{} files could not be read and are not part of the fingerprint",
            HumanCount(result.skipped.len() as u64)
        );
    }

    let exit_code = match &settings.verify {
        Some(expected) => match verify(expected, &result)? {
            VerifyOutcome::Match => {
                println!("{}", "Fingerprint verified.".green());
                ExitCode::SUCCESS
            }
            VerifyOutcome::Mismatch { expected, actual } => {
                println!("{}", "Fingerprint mismatch!".red());
                println!("Expected: {expected}");
                println!("Actual:   {actual}");
                ExitCode::from(1)
            }
        },
        None => {
            ArtifactWriter::new(&settings.output_dir)
                .with_json(settings.json)
                .emit(&result)?;
            println!("{}", "Fingerprinting complete.".green());
            println!("Project Fingerprint: {}", result.combined_digest);
            ExitCode::SUCCESS
        }
    };

    info!(
        "Completed in {}",
        format_human_elapsed(start_time.elapsed())
    );
    Ok(exit_code)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logger with millisecond timestamps
    let logging = init_logging(cli.verbose);
    if let Err(e) = &logging {
        eprintln!("{e:#}");
    }
    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    debug!("Command line arguments: {:?}", cli);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            if logging.is_ok() {
                error!("{e:#}");
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
