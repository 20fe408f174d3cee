//! `chorus config`: Configuration management commands.

use std::path::Path;

use chorus_config::ContextConfig;
use chorus_context::EngineOptions;

use super::load_config;

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    println!("{}", config.to_toml());
    Ok(())
}

pub fn path(path: Option<&Path>) {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => ContextConfig::config_dir().join("config.toml"),
    };
    println!("{}", config_path.display());
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    println!("🔍 Validating configuration...");

    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e:#}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    let options = EngineOptions::from(&config);
    println!();
    println!("   Window:        {} tokens", options.context_window_tokens);
    println!("   Timezone:      {}", options.default_timezone);
    println!("   Time gap:      {} min", options.time_gap.num_minutes());
    println!("   Cross-channel: {}", if options.cross_channel_enabled { "on" } else { "off" });
    println!("   Memory limit:  {}", options.memory_limit);
    Ok(())
}

/// Settings that load fine but are probably not what was meant.
fn warnings(config: &ContextConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.context_window_tokens < 2048 {
        warnings.push(format!(
            "Context window of {} tokens leaves little room for history",
            config.context_window_tokens
        ));
    }
    if config.history.reserve_ratio > 0.9 {
        warnings.push("history.reserve_ratio above 0.9 starves memories".to_string());
    }
    if !config.cross_channel.enabled && config.cross_channel.max_overrun_ratio > 0.0 {
        warnings.push("cross_channel overrun settings are ignored while disabled".to_string());
    }
    if config.telemetry.enabled && config.telemetry.record_dir.is_none() {
        warnings.push("telemetry.enabled without record_dir: diagnostics are not persisted".to_string());
    }
    warnings
}
