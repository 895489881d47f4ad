//! Shared CLI helpers — banner, tool-call lines, run summaries.

use std::path::Path;

use colored::Colorize;
use serde_json::Value;

use codehelm_agent::RunReport;
use codehelm_core::run::{ApprovalType, RunOutcome, ToolCallRecord, ToolCallStatus};
use codehelm_core::utils::truncate_string;

/// Longest argument preview shown on a tool-call line.
const ARG_PREVIEW_CHARS: usize = 80;

/// Show paths under the home directory as `~/...`.
pub fn display_path(path: &Path) -> String {
    let relative = dirs_next::home_dir().and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf));
    match relative {
        Some(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Some(rest) => format!("~/{}", rest.display()),
        None => path.display().to_string(),
    }
}

/// Print the banner shown at REPL start.
pub fn print_banner(workspace: &Path, mode: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "⎈ Codehelm".cyan().bold(), version.dimmed());
    println!("{} {}  {} {}", "workspace:".dimmed(), display_path(workspace), "mode:".dimmed(), mode);
    println!(
        "{}",
        "Type a request, /help for commands, \"exit\" to quit. Ctrl-C stops a running task.".dimmed()
    );
    println!();
}

pub fn print_help() {
    println!();
    println!("  {}        roll back the most recent file change", "/undo".bold());
    println!("  {}       forget the conversation so far", "/clear".bold());
    println!("  {} switch between agent and ask", "/mode <m>".bold());
    println!("  {}        approve everything for this session", "/auto".bold());
    println!("  {}        show this help", "/help".bold());
    println!();
}

/// The most telling argument of a call, shortened for one line.
pub fn argument_preview(arguments: &Value) -> String {
    let preview = ["path", "command", "query", "pattern"]
        .iter()
        .find_map(|k| arguments.get(*k).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| match arguments {
            Value::Object(map) if map.is_empty() => String::new(),
            other => other.to_string(),
        });
    truncate_string(&preview.replace('\n', " "), ARG_PREVIEW_CHARS)
}

fn status_icon(status: ToolCallStatus) -> String {
    match status {
        ToolCallStatus::Pending => "·".dimmed().to_string(),
        ToolCallStatus::Awaiting => "?".yellow().bold().to_string(),
        ToolCallStatus::Running => "▸".cyan().to_string(),
        ToolCallStatus::Success => "✓".green().to_string(),
        ToolCallStatus::Error => "✗".red().to_string(),
        ToolCallStatus::Rejected => "⊘".yellow().to_string(),
    }
}

/// One line per settled or started tool call.
pub fn print_tool_update(call: &ToolCallRecord) {
    if matches!(call.status, ToolCallStatus::Pending | ToolCallStatus::Awaiting) {
        return;
    }
    let mut line = format!(
        "  {} {} {}",
        status_icon(call.status),
        call.name.bold(),
        argument_preview(&call.arguments).dimmed()
    );
    if let (ToolCallStatus::Error, Some(err)) = (call.status, &call.error) {
        line.push_str(&format!(" {}", truncate_string(err, 120).red()));
    }
    eprintln!("{line}");
}

pub fn print_approval_request(tool: &str, approval: ApprovalType, arguments: &Value) {
    eprintln!();
    eprintln!(
        "  {} {} wants to run {} {}",
        "approval".yellow().bold(),
        format!("[{}]", approval.as_str()).dimmed(),
        tool.bold(),
        argument_preview(arguments)
    );
    if let Ok(pretty) = serde_json::to_string_pretty(arguments) {
        for line in pretty.lines().take(20) {
            eprintln!("    {}", line.dimmed());
        }
    }
    eprint!("  {} ", "Allow? [y/N]".yellow());
}

/// `y`/`yes` approve; anything else rejects.
pub fn parse_answer(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Closing summary; the outcome itself was already shown as an event.
pub fn print_report(report: &RunReport) {
    println!();
    if report.outcome == RunOutcome::Completed && report.final_text.is_empty() {
        println!("{}", "(no response)".dimmed());
    }
    let calls = report.tool_calls.len();
    if calls > 0 {
        eprintln!(
            "{}",
            format!("{} tool call(s) over {} round(s)", calls, report.rounds).dimmed()
        );
    }
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
