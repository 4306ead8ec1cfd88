//! `helmsman providers`: list configured providers.

use helmsman_config::AppConfig;
use helmsman_providers::build_from_config;

pub fn run(config: &AppConfig) {
    let router = build_from_config(config);

    println!("Configured providers");
    println!("====================\n");
    for name in router.list() {
        let marker = if name == router.default_name() { "*" } else { " " };
        let keys = config.keys_for(name).len();
        let model = config
            .providers
            .get(name)
            .and_then(|p| p.default_model.as_deref())
            .unwrap_or(&config.default_model);
        println!("  {marker} {name:<16} model: {model:<32} keys: {keys}");
    }
    println!("\n  (* = default provider)");
    println!("  Environment: HELMSMAN_API_KEY, HELMSMAN_PROVIDER, HELMSMAN_MODEL");
}
