//! `codeloop config`: configuration inspection.

use codeloop_config::AppConfig;

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Never echo a secret to the terminal
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some("********".into());
    }

    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");

    if !config.has_api_key() {
        eprintln!("# No API key set (set CODELOOP_API_KEY or OPENAI_API_KEY)");
    }
    Ok(())
}

pub fn defaults() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

pub fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
