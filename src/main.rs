/*!
 * Slotpool CLI - Command Line Interface
 *
 * Version: 0.1.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use slotpool::{
    cli_style::{self, section_header, Icons, Theme},
    config::{LogLevel, SlotpoolConfig},
    error::{Result, EXIT_SUCCESS},
    logging,
    output::OutputWriter,
    soak::SoakDriver,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "slotpool")]
#[command(version, about = "Partitioned bounded resource pool with a soak-test driver", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Path to log file (default: stderr)
    #[arg(long, value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a concurrent workload against the simulated backend
    Soak {
        /// Number of worker threads
        #[arg(short = 't', long)]
        threads: Option<usize>,

        /// How long to run, in seconds
        #[arg(short = 'd', long = "duration-secs")]
        duration_secs: Option<u64>,

        /// Override pool max size
        #[arg(long)]
        max_size: Option<usize>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            cli_style::print_error(&e.to_string(), None);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let output = OutputWriter::new(cli.json);

    let mut config = SlotpoolConfig::load(cli.config.as_deref())?;

    if let Some(level) = cli.log_level {
        config.logging.level = level.into();
    }
    if cli.log.is_some() {
        config.logging.file = cli.log.clone();
    }
    config.logging.verbose |= cli.verbose;

    match cli.command {
        Commands::Config => output.config(&config),
        Commands::Soak {
            threads,
            duration_secs,
            max_size,
        } => {
            if let Some(threads) = threads {
                config.soak.threads = threads;
            }
            if let Some(secs) = duration_secs {
                config.soak.duration_secs = secs;
            }
            if let Some(max_size) = max_size {
                config.pool.max_size = max_size;
            }

            if let Err(e) = logging::init_logging(&config.logging) {
                cli_style::print_warning(&format!("Failed to initialize logging: {}", e));
            }

            run_soak(config, &output)
        }
    }
}

fn run_soak(config: SlotpoolConfig, output: &OutputWriter) -> Result<()> {
    let driver = SoakDriver::new(config.clone())?;

    if !output.is_json() {
        section_header(&format!("{} Soak run", Icons::STATS));
        println!(
            "  {} threads over {}s, pool max {} per partition ({:?})",
            Theme::primary(config.soak.threads),
            Theme::primary(config.soak.duration_secs),
            Theme::primary(config.pool.max_size),
            config.router.strategy
        );
    }

    let spinner = if output.is_json() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {elapsed} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    };

    let report = driver.run(|counters, _elapsed| {
        spinner.set_message(format!(
            "{} leases, {} failures",
            counters.leases(),
            counters.failures()
        ));
    });
    spinner.finish_and_clear();

    let report = report?;
    output.soak_report(&report)?;
    report.into_result().map(|_| ())
}
