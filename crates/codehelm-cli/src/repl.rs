//! Interactive REPL and the event printer shared with single-shot mode.
//!
//! Uses `rustyline` for readline-style editing with persistent history.
//! While a run is active, Ctrl-C aborts it instead of exiting.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use codehelm_agent::{Agent, AgentMode, RunReport};
use codehelm_core::bus::AgentEvent;
use codehelm_core::config::AutoApproveConfig;
use codehelm_core::error::AgentError;

use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// A line typed at the prompt.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Exit,
    Help,
    Undo,
    Clear,
    AutoApprove,
    Mode(Option<AgentMode>),
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    let lower = trimmed.to_lowercase();
    if EXIT_COMMANDS.contains(&lower.as_str()) {
        return Input::Exit;
    }
    match lower.as_str() {
        "/help" => Input::Help,
        "/undo" => Input::Undo,
        "/clear" => Input::Clear,
        "/auto" => Input::AutoApprove,
        _ => match lower.strip_prefix("/mode") {
            Some(rest) => Input::Mode(rest.trim().parse().ok()),
            None => Input::Message(trimmed),
        },
    }
}

/// Run the interactive REPL loop.
pub async fn run(agent: Arc<Agent>, workspace: PathBuf, mut mode: AgentMode) -> Result<()> {
    helpers::print_banner(&workspace, mode.as_str());

    let mut editor = create_editor()?;
    let prompt = |mode: AgentMode| format!("{}> ", mode.as_str());

    loop {
        let input = match editor.readline(&prompt(mode)) {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) | Err(rustyline::error::ReadlineError::Eof) => {
                break;
            }
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };
        if input.trim().is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(&input);

        match parse_input(&input) {
            Input::Exit => {
                println!("\nGoodbye!");
                break;
            }
            Input::Help => helpers::print_help(),
            Input::Undo => undo(&agent).await,
            Input::Clear => {
                agent.clear_history();
                println!("{}", "conversation cleared".dimmed());
            }
            Input::AutoApprove => {
                agent.set_auto_approve(AutoApproveConfig::all());
                println!("{}", "auto-approving every tool call for this session".yellow());
            }
            Input::Mode(Some(next)) => {
                mode = next;
                println!("{} {}", "mode:".dimmed(), mode);
            }
            Input::Mode(None) => eprintln!("usage: /mode agent|ask"),
            Input::Message(message) => {
                debug!(input = message, "processing input");
                if let Err(e) = run_once(&agent, message, &workspace, mode).await {
                    eprintln!("\n{} {e}\n", "Error:".red());
                }
            }
        }
    }

    save_history(&mut editor);
    Ok(())
}

/// One run with live output; returns once every event has been printed.
pub async fn run_once(agent: &Arc<Agent>, message: &str, workspace: &Path, mode: AgentMode) -> Result<RunReport> {
    let printer = spawn_event_printer(agent.clone());
    match send_with_interrupt(agent, message, workspace, mode).await {
        Ok(report) => {
            let _ = printer.await;
            helpers::print_report(&report);
            Ok(report)
        }
        Err(e) => {
            printer.abort();
            Err(e.into())
        }
    }
}

/// `send`, with Ctrl-C turned into an abort.
async fn send_with_interrupt(
    agent: &Agent,
    message: &str,
    workspace: &Path,
    mode: AgentMode,
) -> Result<RunReport, AgentError> {
    let send = agent.send(message, workspace, None, mode);
    tokio::pin!(send);
    tokio::select! {
        report = &mut send => report,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{}", "stopping...".yellow());
            agent.abort();
            send.await
        }
    }
}

/// Print events of the next run until it finishes; answers approval
/// requests from stdin.
fn spawn_event_printer(agent: Arc<Agent>) -> JoinHandle<()> {
    let mut events = agent.bus().subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event printer lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                AgentEvent::TextDelta { text } => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ToolCallUpdated { call } => helpers::print_tool_update(&call),
                AgentEvent::ApprovalRequested {
                    tool,
                    approval,
                    arguments,
                    ..
                } => {
                    helpers::print_approval_request(&tool, approval, &arguments);
                    let approved = tokio::task::spawn_blocking(read_answer).await.unwrap_or(false);
                    if approved {
                        agent.approve();
                    } else {
                        agent.reject();
                    }
                }
                AgentEvent::CompressionApplied {
                    level,
                    tokens_before,
                    tokens_after,
                } => eprintln!(
                    "{}",
                    format!("  context compressed ({level:?}): ~{tokens_before} → ~{tokens_after} tokens").dimmed()
                ),
                AgentEvent::Warning { message } => eprintln!("\n{} {}", "!".yellow(), message.yellow()),
                AgentEvent::Error { message } => eprintln!("\n{} {}", "✗".red(), message.red()),
                AgentEvent::RunFinished { .. } => break,
                AgentEvent::RunStarted { .. }
                | AgentEvent::ReasoningDelta { .. }
                | AgentEvent::ToolCallStreaming { .. }
                | AgentEvent::ApprovalResolved { .. } => {}
            }
        }
    })
}

fn read_answer() -> bool {
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map(|_| helpers::parse_answer(&line))
        .unwrap_or(false)
}

async fn undo(agent: &Agent) {
    let Some(checkpoint) = agent.checkpoints().latest() else {
        println!("{}", "nothing to undo".dimmed());
        return;
    };
    match agent.checkpoints().rollback_to(&checkpoint.id).await {
        Ok(report) => {
            for path in &report.restored_files {
                println!("  {} restored {}", "✓".green(), path.display());
            }
            for err in &report.errors {
                eprintln!("  {} {err}", "✗".red());
            }
        }
        Err(e) => eprintln!("{} {e}", "Undo failed:".red()),
    }
}

/// Create a rustyline editor with history.
fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = codehelm_core::utils::get_history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
        debug!("loaded REPL history from {}", history_path.display());
    }

    Ok(editor)
}

fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = codehelm_core::utils::get_history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_commands() {
        assert_eq!(parse_input("exit"), Input::Exit);
        assert_eq!(parse_input("EXIT"), Input::Exit);
        assert_eq!(parse_input("/quit"), Input::Exit);
        assert_eq!(parse_input(":q"), Input::Exit);
        assert_ne!(parse_input("hello"), Input::Exit);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_input("/undo"), Input::Undo);
        assert_eq!(parse_input(" /clear "), Input::Clear);
        assert_eq!(parse_input("/mode ask"), Input::Mode(Some(AgentMode::Ask)));
        assert_eq!(parse_input("/mode bogus"), Input::Mode(None));
        assert_eq!(parse_input("  fix the tests  "), Input::Message("fix the tests"));
    }

    #[test]
    fn history_path_under_data_dir() {
        let path = codehelm_core::utils::get_history_path();
        assert!(path.to_string_lossy().contains(".codehelm"));
    }
}
