//! `helmsman config`: print the effective configuration.

use helmsman_config::AppConfig;

pub fn show(config: &AppConfig) -> anyhow::Result<()> {
    println!("# Config parsed and validated");
    println!("# Source: {}\n", AppConfig::config_dir().join("config.toml").display());
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

/// Copy of `config` with every API key masked.
fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    mask(&mut config.api_keys);
    for provider in config.providers.values_mut() {
        mask(&mut provider.api_keys);
    }
    config
}

fn mask(keys: &mut [String]) {
    for key in keys {
        let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        *key = format!("****{tail}");
    }
}
