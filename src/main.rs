use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use treesync::commands::sync::{self, RunOptions};

#[derive(Parser)]
#[command(
    name = "treesync",
    version,
    about = "Directory tree synchronization across local, FTP and virtual backends"
)]
struct Cli {
    /// Job file (TOML, or JSON with a .json extension)
    job_file: Option<PathBuf>,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only errors and the final summary
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Show what would change without touching the target
    #[arg(short = 'n', long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    treesync::logging::init_tracing(cli.verbose, cli.quiet);

    let Some(job_file) = cli.job_file else {
        eprintln!("treesync v{}", treesync::VERSION);
        eprintln!("No job file given. Usage: treesync <JOB_FILE> [--dry-run] [--json]");
        return Ok(ExitCode::from(2));
    };

    let options = RunOptions {
        json: cli.json,
        quiet: cli.quiet,
        dry_run: cli.dry_run,
    };
    let report = sync::run(&job_file, options)?;

    if report.has_errors() || report.cancelled() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
