//! `codehelm status` — show configuration and provider status.

use anyhow::Result;
use colored::Colorize;

use codehelm_agent::builtin_registry;
use codehelm_core::config::{get_config_path, load_config};
use codehelm_core::utils::expand_home;

use crate::helpers::display_path;

fn check(ok: bool, missing: &str) -> String {
    if ok {
        "✓".green().to_string()
    } else {
        missing.red().to_string()
    }
}

fn on_off(value: bool) -> String {
    if value {
        "auto".green().to_string()
    } else {
        "ask".yellow().to_string()
    }
}

/// Run the status command.
pub fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    println!();
    println!("{}", "⎈ Codehelm Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        display_path(&config_path),
        check(config_path.exists(), "(not found)")
    );

    let workspace = expand_home(&config.agent.workspace);
    println!(
        "  {:<18} {} {}",
        "Workspace:".bold(),
        display_path(&workspace),
        check(workspace.is_dir(), "(not found)")
    );

    println!("  {:<18} {}", "Model:".bold(), config.agent.model);
    println!(
        "  {:<18} {}",
        "Parameters:".bold(),
        format!(
            "temp: {} | max_tokens: {} | max rounds: {} | format: {:?}",
            config.agent.temperature,
            config.agent.max_tokens,
            config.agent.max_tool_rounds,
            config.agent.tool_call_format
        )
        .dimmed()
    );

    println!();
    let endpoint = config
        .provider
        .api_base
        .as_deref()
        .unwrap_or("https://api.openai.com/v1");
    let key_status = if config.provider.is_configured() {
        format!("{} (key set)", "✓".green())
    } else {
        format!("{}", "· not configured".dimmed())
    };
    println!("  {:<18} {} {}", "Provider:".bold(), endpoint, key_status);

    println!();
    println!(
        "  {:<18} edits: {} | terminal: {} | dangerous: {}",
        "Approvals:".bold(),
        on_off(config.approval.edits),
        on_off(config.approval.terminal),
        on_off(config.approval.dangerous)
    );

    let registry = builtin_registry(&config.tools);
    println!();
    println!("  {}", "Tools:".bold());
    for meta in registry.tool_names().iter().filter_map(|name| registry.metadata(name)) {
        println!(
            "    {:<16} {}",
            meta.name,
            format!(
                "{:?} | approval: {} | timeout: {}s | retries: {}{}",
                meta.category,
                meta.approval.as_str(),
                meta.timeout.as_secs(),
                meta.retry.max_retries,
                if meta.is_parallel_safe() { " | parallel" } else { "" }
            )
            .dimmed()
        );
    }
    println!();

    Ok(())
}
