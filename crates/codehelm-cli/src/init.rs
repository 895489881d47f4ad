//! `codehelm init` — write a default config and a project AGENTS.md.
//!
//! - Creates `~/.codehelm/config.json` with defaults if missing
//! - Creates `AGENTS.md` in the current directory if missing

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use codehelm_core::config::{get_config_path, load_config, save_config};

/// Run the init command.
pub fn run() -> Result<()> {
    println!();
    println!("{}", "⎈ Codehelm — Setup".cyan().bold());
    println!();

    let config_path = get_config_path();
    if config_path.exists() {
        println!("  {} config already exists at {}", "✓".green(), config_path.display());
    } else {
        let config = load_config(None);
        save_config(&config, Some(&config_path))?;
        println!("  {} created config at {}", "✓".green(), config_path.display());
    }

    let cwd = std::env::current_dir()?;
    create_template(&cwd.join("AGENTS.md"), AGENTS_TEMPLATE)?;

    println!();
    println!(
        "  {}",
        "Set provider.apiKey in the config (or CODEHELM_PROVIDER__API_KEY), then run `codehelm agent`.".green()
    );
    println!();
    Ok(())
}

/// Create a template file if it doesn't exist. Returns whether it was written.
fn create_template(path: &Path, content: &str) -> Result<bool> {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    if path.exists() {
        println!("  {} {} already exists", "✓".green(), name);
        return Ok(false);
    }
    std::fs::write(path, content)?;
    println!("  {} created {}", "✓".green(), name);
    Ok(true)
}

const AGENTS_TEMPLATE: &str = r#"# AGENTS.md

Project notes for the coding agent. Everything here is added to its
system prompt when it works in this directory.

## Build and test

- Build: (e.g. `cargo build`)
- Test: (e.g. `cargo test`)

## Conventions

- (formatting, naming, directories the agent must not touch)
"#;

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AGENTS.md");
        assert!(create_template(&path, "first").unwrap());
        assert!(!create_template(&path, "second").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
    }
}
