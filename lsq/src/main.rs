//! lsq: Log Status Query - CLI for appending to and querying the livelog store.

use clap::{Parser, Subcommand};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "lsq")]
#[command(about = "Log Status Query - append to and query the livelog store")]
#[command(version)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write livelog.toml and create the database
    Init {
        /// Active database file (default: $LIVELOG_ROOT/livelogs.db)
        #[arg(long = "database-file")]
        database_file: Option<String>,

        /// Directory for archived day shards (default: next to the database file)
        #[arg(long = "archive-path")]
        archive_path: Option<String>,

        /// Retention of archived shards: N, Nd, Nw, Nm or Ny
        #[arg(long = "max-logs-age")]
        max_logs_age: Option<String>,
    },

    /// Append Nagios-style log lines from stdin or a file
    #[command(visible_alias = "a")]
    Append {
        /// File to read lines from (reads stdin if not provided)
        file: Option<String>,
    },

    /// Answer GET log requests read from stdin or given inline
    #[command(visible_alias = "q")]
    Query {
        /// Request text (reads stdin if not provided)
        request: Option<String>,
    },

    /// Seal the active shard if the rotation boundary has passed
    Rotate {
        /// Current time as epoch seconds (default: now)
        #[arg(long = "now")]
        now: Option<i64>,
    },

    /// Move every record older than today into its day's archive file
    Archive {
        /// Current time as epoch seconds (default: now)
        #[arg(long = "now")]
        now: Option<i64>,
    },

    /// Delete archived shards older than max_logs_age
    Prune {
        /// Current time as epoch seconds (default: now)
        #[arg(long = "now")]
        now: Option<i64>,
    },

    /// List every shard with its window and record count
    #[command(visible_alias = "ls")]
    Contents,

    /// Number of records in the active shard
    Count,

    /// Run SQL against the active shard
    Sql {
        /// SQL query
        query: String,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Init { database_file, archive_path, max_logs_age } => commands::init(
            database_file.as_deref(),
            archive_path.as_deref(),
            max_logs_age.as_deref(),
        ),
        Commands::Append { file } => commands::append(file.as_deref()),
        Commands::Query { request } => commands::query(request.as_deref()),
        Commands::Rotate { now } => commands::rotate(now),
        Commands::Archive { now } => commands::archive(now),
        Commands::Prune { now } => commands::prune(now),
        Commands::Contents => commands::contents(),
        Commands::Count => commands::count(),
        Commands::Sql { query } => commands::sql(&query),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
