mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use verity_ledger::{ExportFormat, Granularity};
use verity_types::CONFIG_FILENAME;

use commands::audit::FilterArgs;

/// Verity -- tamper-evident ledger for progress reports and audit trails.
#[derive(Parser, Debug)]
#[command(name = "verity", version, about)]
struct Cli {
    /// Path to verity.toml
    #[arg(long, global = true, default_value = CONFIG_FILENAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration into a directory
    Init {
        /// Directory that will hold verity.toml and the ledger database
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Overwrite an existing verity.toml
        #[arg(long)]
        force: bool,
    },

    /// Append a progress report to a project stream
    AppendProgress {
        #[arg(long)]
        stream: String,

        /// Authenticated actor submitting the report
        #[arg(long)]
        actor: String,

        /// Completion percentage, e.g. 45.5
        #[arg(long)]
        percent: String,

        /// Report date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        #[arg(long)]
        remarks: Option<String>,

        /// Capture latitude (requires --lon)
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Capture longitude (requires --lat)
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },

    /// Append a record to the global audit trail
    AppendAudit {
        #[arg(long)]
        actor: String,

        /// Action name, e.g. CREATE_PROJECT
        #[arg(long)]
        action: String,

        #[arg(long)]
        entity_type: String,

        #[arg(long)]
        entity_id: String,

        /// Detail document as JSON
        #[arg(long)]
        details: Option<String>,
    },

    /// Verify the hash chain of one stream
    Verify {
        #[arg(long)]
        stream: String,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Verify every stream in the ledger
    Sweep {
        /// Concurrent verifications (defaults to verify.sweep_workers)
        #[arg(long)]
        workers: Option<usize>,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show entries of a stream, most recent first
    History {
        #[arg(long)]
        stream: String,

        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Search, summarize and export the audit trail
    Audit {
        #[command(subcommand)]
        action: AuditCommands,
    },

    /// Compute a canonical record hash offline
    Hash {
        #[command(subcommand)]
        kind: HashCommands,
    },

    /// Reopen a stream frozen by the corruption policy
    Unfreeze {
        #[arg(long)]
        stream: String,
    },

    /// List streams frozen by the corruption policy
    Frozen,

    /// Alert rule subcommands
    Alerts {
        #[command(subcommand)]
        action: AlertCommands,
    },
}

#[derive(Subcommand, Debug)]
enum HashCommands {
    /// Hash a progress report
    Progress {
        #[arg(long)]
        stream: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        percent: String,
        #[arg(long)]
        date: String,
        /// Hash of the preceding entry; omit for a genesis entry
        #[arg(long)]
        prev_hash: Option<String>,
        /// Also print the canonical encoding
        #[arg(long)]
        show_encoding: bool,
    },

    /// Hash an audit record
    Audit {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        entity_type: String,
        #[arg(long)]
        entity_id: String,
        #[arg(long)]
        prev_hash: Option<String>,
        #[arg(long)]
        show_encoding: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
    /// List matching audit records, most recent first
    Log {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Record counts by action and by actor
    Stats {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Record counts per hour, day, week or month
    Timeline {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, default_value = "day")]
        granularity: Granularity,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Export matching records as json or csv
    Export {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, default_value = "json")]
        format: ExportFormat,

        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum AlertCommands {
    /// List configured alert rules
    List,

    /// Send a test webhook for one rule, or all rules
    Test {
        #[arg(long)]
        rule: Option<String>,
    },

    /// Show recent alert dispatch attempts
    History {
        #[arg(long, default_value = "20")]
        last: u32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("verity=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Commands::Init { dir, force } => commands::init::run(&dir, force),
        Commands::AppendProgress {
            stream,
            actor,
            percent,
            date,
            remarks,
            lat,
            lon,
        } => commands::append::progress(
            &config,
            commands::append::ProgressArgs {
                stream,
                actor,
                percent,
                date,
                remarks,
                lat,
                lon,
            },
        ),
        Commands::AppendAudit {
            actor,
            action,
            entity_type,
            entity_id,
            details,
        } => commands::append::audit(
            &config,
            &actor,
            &action,
            &entity_type,
            &entity_id,
            details.as_deref(),
        ),
        Commands::Verify { stream, format } => commands::verify::run(&config, &stream, format),
        Commands::Sweep { workers, format } => commands::verify::sweep(&config, workers, format),
        Commands::History {
            stream,
            limit,
            offset,
            format,
        } => commands::history::run(&config, &stream, limit, offset, format),
        Commands::Audit { action } => match action {
            AuditCommands::Log {
                filter,
                limit,
                offset,
                format,
            } => commands::audit::log(&config, filter, limit, offset, format),
            AuditCommands::Stats { filter, format } => commands::audit::stats(&config, filter, format),
            AuditCommands::Timeline {
                filter,
                granularity,
                format,
            } => commands::audit::timeline(&config, filter, granularity, format),
            AuditCommands::Export {
                filter,
                format,
                output,
            } => commands::audit::export(&config, filter, format, output.as_deref()),
        },
        Commands::Hash { kind } => match kind {
            HashCommands::Progress {
                stream,
                actor,
                percent,
                date,
                prev_hash,
                show_encoding,
            } => commands::hash::progress(
                &stream,
                &actor,
                &percent,
                &date,
                prev_hash.as_deref(),
                show_encoding,
            ),
            HashCommands::Audit {
                actor,
                action,
                entity_type,
                entity_id,
                prev_hash,
                show_encoding,
            } => commands::hash::audit(
                &actor,
                &action,
                &entity_type,
                &entity_id,
                prev_hash.as_deref(),
                show_encoding,
            ),
        },
        Commands::Unfreeze { stream } => commands::freeze::unfreeze(&config, &stream),
        Commands::Frozen => commands::freeze::list(&config),
        Commands::Alerts { action } => match action {
            AlertCommands::List => commands::alerts::list(&config),
            AlertCommands::Test { rule } => commands::alerts::test(&config, rule.as_deref()),
            AlertCommands::History { last } => commands::alerts::history(&config, last),
        },
    }
}
