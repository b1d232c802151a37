//! Grid ladder - main entry point
//!
//! This binary provides four subcommands:
//! - run: Run the reconciliation loop over the configured tasks
//! - import: Load a ladder CSV into the state database
//! - status: Show a ladder's controls, telemetry and rungs
//! - clear-halt: Release a latched buy or sell halt

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "grid-ladder")]
#[command(about = "Grid ladder reconciliation and order admission", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the reconciliation loop
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/example.json")]
        config: String,

        /// Task file (overrides config file)
        #[arg(short, long)]
        tasks: Option<String>,

        /// State database path (overrides config file)
        #[arg(long)]
        state_db: Option<String>,
    },

    /// Import a ladder from CSV
    Import {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/example.json")]
        config: String,

        /// Ladder identifier
        #[arg(short, long)]
        ladder: String,

        /// Instrument traded by the ladder
        #[arg(short, long)]
        instrument: String,

        /// Average cost of the current holding
        #[arg(long, default_value = "0")]
        average_cost: f64,

        /// Rung CSV file
        #[arg(long)]
        csv: String,
    },

    /// Show ladder state
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/example.json")]
        config: String,

        /// Ladder identifier (all ladders if omitted)
        #[arg(short, long)]
        ladder: Option<String>,
    },

    /// Clear a latched halt
    ClearHalt {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/example.json")]
        config: String,

        /// Ladder identifier
        #[arg(short, long)]
        ladder: String,

        /// Which side to release
        #[arg(short, long, value_enum, default_value = "both")]
        side: HaltSide,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltSide {
    Buy,
    Sell,
    Both,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Run { .. } => "run",
            Commands::Import { .. } => "import",
            Commands::Status { .. } => "status",
            Commands::ClearHalt { .. } => "clear-halt",
        }
    }
}

const LOG_DIR: &str = "logs";

/// One file per invocation, e.g. `grid-ladder_run_2024-04-10_09-15-00.log`
fn log_file_name(command: &str) -> String {
    format!(
        "grid-ladder_{}_{}.log",
        command,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Console plus plain-text file logging. `RUST_LOG` replaces the default filter.
fn setup_logging(verbose: bool, command: &str) -> Result<()> {
    std::fs::create_dir_all(LOG_DIR)?;
    let log_file = log_file_name(command);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // the Telegram client drags in the HTTP stack
        EnvFilter::new(format!(
            "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
            level
        ))
    });

    let console = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);
    let file = fmt::layer()
        .with_writer(tracing_appender::rolling::never(LOG_DIR, &log_file))
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    info!(
        "grid-ladder {} ({}), logging to {}",
        env!("CARGO_PKG_VERSION"),
        command,
        Path::new(LOG_DIR).join(&log_file).display()
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.command.name())?;

    match cli.command {
        Commands::Run {
            config,
            tasks,
            state_db,
        } => commands::run::run(config, tasks, state_db),

        Commands::Import {
            config,
            ladder,
            instrument,
            average_cost,
            csv,
        } => commands::import::run(config, ladder, instrument, average_cost, csv),

        Commands::Status { config, ladder } => commands::status::run(config, ladder),

        Commands::ClearHalt {
            config,
            ladder,
            side,
        } => commands::clear_halt::run(config, ladder, side),
    }
}
