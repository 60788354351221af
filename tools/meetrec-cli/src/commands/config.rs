//! Print the effective configuration.

use meetrec_common::{config_file_path, AppConfig};

pub fn run(config: &AppConfig, path_only: bool) -> anyhow::Result<()> {
    if path_only {
        println!("{}", config_file_path().display());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
