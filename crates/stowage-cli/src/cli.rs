use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stowage",
    version,
    about = "Repair and check the remote volumes of a stowage backup",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $STOWAGE_CONFIG             (environment variable)
  3. ./stowage.yaml              (project)
  4. Platform user config dir + /stowage/config.yaml (e.g. ~/.config or %APPDATA%)
  5. Platform system config path (Unix: /etc/stowage/config.yaml, Windows: %PROGRAMDATA%/stowage/config.yaml)"
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides STOWAGE_CONFIG and default search)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Bring the local database and the remote volumes back into agreement
    Repair {
        /// Report what would change without touching the database or the remote
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Fileset versions to include when the database is recreated (0 = newest)
        #[arg(long = "version", value_name = "N")]
        versions: Vec<usize>,

        /// Include the fileset at this time when the database is recreated (RFC 3339)
        #[arg(long)]
        time: Option<String>,

        /// Glob of paths to include when the database is recreated
        #[arg(long = "filter", value_name = "GLOB")]
        filters: Vec<String>,

        /// Change the passphrase while repairing (not supported)
        #[arg(long)]
        allow_passphrase_change: bool,
    },

    /// Download every trusted remote volume and compare it with the database
    Check,

    /// Write a starter configuration file
    Config {
        /// Destination path (defaults to ./stowage.yaml)
        #[arg(short, long)]
        dest: Option<String>,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Repair { .. } => "repair",
            Commands::Check => "check",
            Commands::Config { .. } => "config",
        }
    }
}
