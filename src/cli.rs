// herringbone/src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the pipeline environment (cards, rules, data directories)
    Init,
    /// Ingest raw events and run them through parse, enrich and detect
    Ingest(IngestArgs),
    /// Correlate stored detections into incidents
    Correlate(CorrelateArgs),
    /// Inspect and manage incidents
    Incidents {
        #[command(subcommand)]
        command: IncidentCommands,
    },
    /// Print version information
    Version,
}

#[derive(Parser, Debug)]
pub struct IngestArgs {
    /// File with one raw event per line
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    /// Single raw event text (alternative to --file)
    #[arg(short, long)]
    pub message: Option<String>,
    /// Source kind recorded on each event
    #[arg(long, default_value = "syslog")]
    pub source_kind: String,
    /// Source address recorded on each event
    #[arg(long, default_value = "127.0.0.1")]
    pub source_address: String,
    /// Directory of parse card yaml files
    #[arg(long, default_value = "cards")]
    pub cards: PathBuf,
    /// Directory of detection rule yaml files
    #[arg(long, default_value = "rules")]
    pub rules: PathBuf,
    /// Storage database path
    #[arg(long, default_value = "data/herringbone.db")]
    pub data: PathBuf,
}

#[derive(Parser, Debug)]
pub struct CorrelateArgs {
    /// Storage database path
    #[arg(long, default_value = "data/herringbone.db")]
    pub data: PathBuf,
    /// Correlation window in seconds
    #[arg(long, default_value_t = 1800)]
    pub window: u64,
}

#[derive(Subcommand, Debug)]
pub enum IncidentCommands {
    /// List stored incidents
    List {
        /// Storage database path
        #[arg(long, default_value = "data/herringbone.db")]
        data: PathBuf,
    },
    /// Show one incident in full
    Show {
        /// Incident id
        id: String,
        #[arg(long, default_value = "data/herringbone.db")]
        data: PathBuf,
    },
    /// Assign an owner to an incident
    Assign {
        /// Incident id
        id: String,
        /// Analyst taking ownership
        owner: String,
        #[arg(long, default_value = "data/herringbone.db")]
        data: PathBuf,
    },
    /// Resolve an incident
    Close {
        /// Incident id
        id: String,
        #[arg(long, default_value = "data/herringbone.db")]
        data: PathBuf,
    },
    /// Override an incident's priority (low, medium, high, critical)
    Escalate {
        /// Incident id
        id: String,
        /// New priority
        priority: String,
        #[arg(long, default_value = "data/herringbone.db")]
        data: PathBuf,
    },
}
