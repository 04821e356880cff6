mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::build::BuildArgs;
use commands::Failure;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cedar",
    version,
    about = "Resumable, step-based classic image builder"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ValidationArg {
    Ignore,
    Enforce,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a classic image from a build definition.
    Build {
        /// Path to the YAML build definition.
        definition: PathBuf,
        /// Customize this existing root filesystem in place instead of
        /// creating one from the definition's rootfs section.
        #[arg(long = "image-path")]
        image_path: Option<PathBuf>,
        /// Stop before running this step.
        #[arg(long)]
        until: Option<String>,
        /// Stop after running this step.
        #[arg(long)]
        thru: Option<String>,
        /// Continue a build checkpointed in --workdir.
        #[arg(long, default_value_t = false)]
        resume: bool,
        /// Keep intermediate files here instead of a temporary directory.
        #[arg(long = "workdir")]
        work_dir: Option<PathBuf>,
        /// Where artifacts are written (default: current directory).
        #[arg(long = "output-dir")]
        output_dir: Option<PathBuf>,
        /// Print the plan and debug logging.
        #[arg(long, default_value_t = false)]
        debug: bool,
        /// Print the plan and informational logging.
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
        /// Only print errors.
        #[arg(short, long, default_value_t = false)]
        quiet: bool,
        /// Print the planned steps and exit without building.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Default channel for snaps without an explicit one.
        #[arg(short, long)]
        channel: Option<String>,
        /// How validation sets are treated when seeding snaps.
        #[arg(long, value_enum)]
        validation: Option<ValidationArg>,
        /// Preseed snaps even if the definition does not ask for it.
        #[arg(long, default_value_t = false)]
        preseed: bool,
        /// Sector size of the disk images.
        #[arg(long, default_value_t = 512, value_parser = parse_sector_size)]
        sector_size: u64,
    },
    /// Validate a build definition and print the steps it plans.
    Validate {
        /// Path to the YAML build definition.
        definition: PathBuf,
        /// Plan for an existing root filesystem, as `build --image-path` does.
        #[arg(long, default_value_t = false)]
        existing_tree: bool,
    },
}

fn parse_sector_size(value: &str) -> Result<u64, String> {
    match value.parse::<u64>() {
        Ok(size @ (512 | 4096)) => Ok(size),
        _ => Err(format!("sector size must be 512 or 4096, got {value}")),
    }
}

fn log_level(debug: bool, verbose: bool, quiet: bool) -> &'static str {
    if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        "warn"
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Build {
            debug,
            verbose,
            quiet,
            ..
        } => log_level(*debug, *verbose, *quiet),
        Commands::Validate { .. } => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CEDAR_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Build {
            definition,
            image_path,
            until,
            thru,
            resume,
            work_dir,
            output_dir,
            debug,
            verbose,
            quiet,
            dry_run,
            channel,
            validation,
            preseed,
            sector_size,
        } => commands::build::run(BuildArgs {
            definition,
            image_path,
            until,
            thru,
            resume,
            work_dir,
            output_dir,
            debug,
            verbose,
            quiet,
            dry_run,
            channel,
            validation: validation.map(|v| match v {
                ValidationArg::Ignore => cedar_core::Validation::Ignore,
                ValidationArg::Enforce => cedar_core::Validation::Enforce,
            }),
            preseed,
            sector_size,
        }),
        Commands::Validate {
            definition,
            existing_tree,
        } => commands::validate::run(&definition, existing_tree),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(Failure { code, message }) => {
            eprintln!("error: {message}");
            ExitCode::from(code)
        }
    }
}
