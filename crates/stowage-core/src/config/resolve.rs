use std::fmt;
use std::path::{Path, PathBuf};

use stowage_types::error::{Result, StowageError};

use super::types::StowageConfig;
use super::util::expand_tilde;

/// Tracks where the config file was found.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Explicitly passed via `--config`.
    CliArg(PathBuf),
    /// Set via the `STOWAGE_CONFIG` env var.
    EnvVar(PathBuf),
    /// Found by searching standard locations.
    SearchOrder { path: PathBuf, level: &'static str },
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CliArg(p) => p,
            ConfigSource::EnvVar(p) => p,
            ConfigSource::SearchOrder { path, .. } => path,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CliArg(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::EnvVar(p) => write!(f, "{} (STOWAGE_CONFIG)", p.display()),
            ConfigSource::SearchOrder { path, level } => {
                write!(f, "{} ({})", path.display(), level)
            }
        }
    }
}

/// Returns search locations in priority order: project, user, system.
pub fn default_config_search_paths() -> Vec<(PathBuf, &'static str)> {
    let mut paths = vec![(PathBuf::from("stowage.yaml"), "project")];

    #[cfg(windows)]
    let user_config = dirs::config_dir().map(|base| base.join("stowage").join("config.yaml"));

    #[cfg(not(windows))]
    let user_config = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|base| base.join("stowage").join("config.yaml"));

    if let Some(p) = user_config {
        paths.push((p, "user"));
    }

    #[cfg(windows)]
    {
        let program_data = std::env::var_os("PROGRAMDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
        paths.push((program_data.join("stowage").join("config.yaml"), "system"));
    }

    #[cfg(not(windows))]
    {
        paths.push((PathBuf::from("/etc/stowage/config.yaml"), "system"));
    }

    paths
}

/// Resolve which config file to use.
///
/// Priority: CLI arg > `STOWAGE_CONFIG` env var > first existing file from
/// search paths. Returns `None` if nothing is found.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<ConfigSource> {
    if let Some(path) = cli_config {
        return Some(ConfigSource::CliArg(PathBuf::from(path)));
    }

    if let Ok(val) = std::env::var("STOWAGE_CONFIG") {
        if !val.is_empty() {
            return Some(ConfigSource::EnvVar(PathBuf::from(val)));
        }
    }

    default_config_search_paths()
        .into_iter()
        .find(|(path, _)| path.exists())
        .map(|(path, level)| ConfigSource::SearchOrder { path, level })
}

/// Load, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<StowageConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        StowageError::Config(format!("cannot read '{}': {e}", path.display()))
    })?;
    parse_config(&contents)
        .map_err(|e| StowageError::Config(format!("{}: {e}", path.display())))
}

fn parse_config(contents: &str) -> std::result::Result<StowageConfig, String> {
    let mut config: StowageConfig = serde_yaml::from_str(contents).map_err(|e| e.to_string())?;
    config.repository.url = expand_tilde(config.repository.url.trim());
    config.database.path = expand_tilde(config.database.path.trim());
    validate(&config)?;
    Ok(config)
}

fn validate(config: &StowageConfig) -> std::result::Result<(), String> {
    if config.repository.url.is_empty() {
        return Err("repository.url must not be empty".into());
    }
    if config.database.path.is_empty() {
        return Err("database.path must not be empty".into());
    }
    let prefix = &config.repository.prefix;
    if prefix.is_empty()
        || !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(format!(
            "repository.prefix '{prefix}' must be non-empty and contain only letters, digits, '_' or '.'"
        ));
    }
    if config.repair.fetch_concurrency == 0 {
        return Err("repair.fetch_concurrency must be at least 1".into());
    }
    if config.repair.max_in_flight_uploads == 0 {
        return Err("repair.max_in_flight_uploads must be at least 1".into());
    }
    if !(1..=22).contains(&config.compression.zstd_level) {
        return Err(format!(
            "compression.zstd_level {} is outside 1..=22",
            config.compression.zstd_level
        ));
    }
    Ok(())
}

/// Returns a minimal YAML config template suitable for bootstrapping.
pub fn minimal_config_template() -> &'static str {
    r#"# stowage configuration file

repository:
  url: /path/to/remote
  # prefix: stowage

database:
  path: ~/.local/share/stowage/backup.db

# --- Common optional settings (uncomment as needed) ---

# blocks:
#   block_size: 102400
#   hash_algorithm: blake2b-256
#
# compression:
#   algorithm: zstd
#   zstd_level: 3
#
# index_file_policy: full
#
# repair:
#   fetch_concurrency: 4
#   max_in_flight_uploads: 4
"#
}
