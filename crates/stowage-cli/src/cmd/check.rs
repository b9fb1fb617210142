use stowage_core::commands::check::{self, CheckProgressEvent};
use stowage_core::config::StowageConfig;

pub(crate) fn run_check(config: &StowageConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut on_progress = |event: CheckProgressEvent| match event {
        CheckProgressEvent::VolumeStarted {
            current,
            total,
            name,
        } => eprintln!("[{current}/{total}] Checking volume '{name}'..."),
    };
    let result = check::run_with_progress(config, Some(&mut on_progress))?;

    if !result.errors.is_empty() {
        println!("Errors found:");
        for err in &result.errors {
            println!("  [{}] {}", err.context, err.message);
        }
        println!();
    }
    println!(
        "Check complete: {} volumes checked, {} skipped, {} errors",
        result.volumes_checked,
        result.volumes_skipped,
        result.errors.len(),
    );

    if !result.errors.is_empty() {
        return Err(format!("check found {} error(s)", result.errors.len()).into());
    }
    Ok(())
}
