//! `helmsman onboard`: first-time setup.

use std::path::Path;

use helmsman_config::AppConfig;

pub fn run(path: Option<&Path>) -> anyhow::Result<()> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };

    println!("Helmsman first-time setup");
    println!("=========================\n");

    if let Some(dir) = config_path.parent()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        println!("  Created config directory: {}", dir.display());
    }

    if config_path.exists() {
        println!("  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Created config.toml at: {}", config_path.display());
    println!("\n  Next steps:");
    println!("   1. Add your API key to {} or set HELMSMAN_API_KEY", config_path.display());
    println!("   2. Run: helmsman agent\n");
    Ok(())
}
