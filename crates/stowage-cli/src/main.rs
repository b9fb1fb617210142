mod cli;
mod cmd;
mod signal;

use clap::Parser;

use stowage_core::config;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // `config` writes the template, so it must not need one.
    if let Commands::Config { dest } = &cli.command {
        if let Err(e) = cmd::config::run_config_generate(dest.as_deref()) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let Some(source) = config::resolve_config_path(cli.config.as_deref()) else {
        eprintln!("Error: no configuration file found.");
        eprintln!("Searched:");
        for (path, level) in config::default_config_search_paths() {
            eprintln!("  {} ({})", path.display(), level);
        }
        eprintln!();
        eprintln!("Run `stowage config` to generate a starter config file.");
        std::process::exit(1);
    };
    tracing::info!("Using config: {source}");

    let cfg = match config::load_config(source.path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    tracing::debug!(command = cli.command.name(), "dispatching");
    let result = match &cli.command {
        Commands::Repair {
            dry_run,
            versions,
            time,
            filters,
            allow_passphrase_change,
        } => cmd::repair::run_repair(
            &cfg,
            cmd::repair::RepairArgs {
                dry_run: *dry_run,
                versions: versions.clone(),
                time: time.as_deref(),
                filters,
                allow_passphrase_change: *allow_passphrase_change,
            },
            signal::install_stop_handler(),
        ),
        Commands::Check => cmd::check::run_check(&cfg),
        Commands::Config { .. } => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
