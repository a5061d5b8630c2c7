use serde_json::Value;
use std::path::Path;
use switchboard_core::Config;

fn mask_key(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else if key.len() > 8 {
        format!("{}...{}", &key[..4], &key[key.len() - 4..])
    } else {
        "(set)".to_string()
    }
}

fn masked(config: &Config) -> anyhow::Result<Value> {
    let mut json = serde_json::to_value(config)?;
    if let Some(providers) = json.get_mut("providers").and_then(Value::as_object_mut) {
        for provider in providers.values_mut() {
            if let Some(key) = provider.get_mut("apiKey") {
                let shown = mask_key(key.as_str().unwrap_or_default());
                *key = Value::String(shown);
            }
        }
    }
    Ok(json)
}

/// Show the effective configuration as pretty-printed JSON.
pub fn show(path: &Path) -> anyhow::Result<()> {
    let config = Config::load_or_default_at(path)?;
    let json = masked(&config)?;

    println!();
    println!("Current configuration");
    println!(
        "  File: {}{}",
        path.display(),
        if path.exists() { "" } else { " (not found, showing defaults)" }
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    println!("Add agents under \"agents\" and a provider key under \"providers\".");
    Ok(())
}
