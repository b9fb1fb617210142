use std::path::PathBuf;

use stowage_core::config;

/// Write the starter template to `dest`, or to the first search location
/// (`./stowage.yaml`). Never overwrites.
pub(crate) fn run_config_generate(dest: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let path = match dest {
        Some(d) => PathBuf::from(config::expand_tilde(d)),
        None => config::default_config_search_paths()
            .into_iter()
            .map(|(path, _)| path)
            .next()
            .unwrap_or_else(|| PathBuf::from("stowage.yaml")),
    };

    if path.exists() {
        return Err(format!("file already exists: {}", path.display()).into());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(&path, config::minimal_config_template())?;
    println!("Config written to: {}", path.display());
    println!("Edit it to set the repository url and the database path.");
    Ok(())
}
