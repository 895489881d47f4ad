//! Config loader — reads `~/.codehelm/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.codehelm/config.json`
//! 3. Environment variables `CODEHELM_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::schema::{Config, ToolCallFormat};
use crate::error::ConfigError;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    apply_env_overrides(load_config_from_path(&config_path))
}

/// Load config from a specific file path, without env overrides.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config {}: {}", path.display(), e);
            Config::default()
        }
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> Result<(), ConfigError> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| v == "true" || v == "1")
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `CODEHELM_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `CODEHELM_AGENT__MODEL`, `CODEHELM_AGENT__WORKSPACE`
/// - `CODEHELM_AGENT__MAX_TOKENS`, `CODEHELM_AGENT__TEMPERATURE`
/// - `CODEHELM_AGENT__MAX_TOOL_ROUNDS`, `CODEHELM_AGENT__TOOL_CALL_FORMAT`
/// - `CODEHELM_PROVIDER__API_KEY`, `CODEHELM_PROVIDER__API_BASE`
/// - `CODEHELM_APPROVAL__EDITS`, `CODEHELM_APPROVAL__TERMINAL`, `CODEHELM_APPROVAL__DANGEROUS`
/// - `CODEHELM_TOOLS__RESTRICT_TO_WORKSPACE`
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(val) = std::env::var("CODEHELM_AGENT__MODEL") {
        config.agent.model = val;
    }
    if let Ok(val) = std::env::var("CODEHELM_AGENT__WORKSPACE") {
        config.agent.workspace = val;
    }
    if let Some(n) = env_parse("CODEHELM_AGENT__MAX_TOKENS") {
        config.agent.max_tokens = n;
    }
    if let Some(t) = env_parse("CODEHELM_AGENT__TEMPERATURE") {
        config.agent.temperature = t;
    }
    if let Some(n) = env_parse("CODEHELM_AGENT__MAX_TOOL_ROUNDS") {
        config.agent.max_tool_rounds = n;
    }
    if let Ok(val) = std::env::var("CODEHELM_AGENT__TOOL_CALL_FORMAT") {
        match val.to_lowercase().as_str() {
            "native" => config.agent.tool_call_format = ToolCallFormat::Native,
            "inline" => config.agent.tool_call_format = ToolCallFormat::Inline,
            other => warn!(value = other, "unknown tool call format override"),
        }
    }

    if let Ok(val) = std::env::var("CODEHELM_PROVIDER__API_KEY") {
        config.provider.api_key = val;
    }
    if let Ok(val) = std::env::var("CODEHELM_PROVIDER__API_BASE") {
        config.provider.api_base = Some(val);
    }

    if let Some(v) = env_flag("CODEHELM_APPROVAL__EDITS") {
        config.approval.edits = v;
    }
    if let Some(v) = env_flag("CODEHELM_APPROVAL__TERMINAL") {
        config.approval.terminal = v;
    }
    if let Some(v) = env_flag("CODEHELM_APPROVAL__DANGEROUS") {
        config.approval.dangerous = v;
    }

    if let Some(v) = env_flag("CODEHELM_TOOLS__RESTRICT_TO_WORKSPACE") {
        config.tools.restrict_to_workspace = v;
    }

    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
