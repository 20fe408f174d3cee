pub mod assemble;
pub mod config_cmd;
pub mod replay;

use std::path::Path;

use anyhow::Context;
use chorus_config::ContextConfig;

/// Load the configuration from `path`, or from the default location with
/// environment overrides applied.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ContextConfig> {
    match path {
        Some(path) => ContextConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => ContextConfig::load().context("loading config"),
    }
}
