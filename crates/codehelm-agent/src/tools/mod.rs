//! Tool modules for the Codehelm agent.

pub mod base;
pub mod filesystem;
pub mod metadata;
pub mod registry;
pub mod schema;
pub mod search;
pub mod shell;

use std::sync::Arc;

use codehelm_core::config::ToolsConfig;

pub use base::{optional_bool, optional_i64, optional_string, require_string, Tool, ToolContext};
pub use metadata::{RetryConfig, ToolCategory, ToolMetadata, MUTATING_TOOLS};
pub use registry::{ToolDefaults, ToolRegistry};

/// Build a registry holding every built-in tool.
pub fn builtin_registry(config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::with_defaults(ToolDefaults::from(config));
    registry.register(Arc::new(filesystem::ReadFileTool));
    registry.register(Arc::new(filesystem::ListDirectoryTool));
    registry.register(Arc::new(filesystem::WriteFileTool));
    registry.register(Arc::new(filesystem::EditFileTool));
    registry.register(Arc::new(search::SearchFilesTool));
    registry.register(Arc::new(shell::RunCommandTool::new(config.exec_timeout_secs)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let reg = builtin_registry(&ToolsConfig::default());
        assert_eq!(
            reg.tool_names(),
            vec![
                "edit_file",
                "list_directory",
                "read_file",
                "run_command",
                "search_files",
                "write_file"
            ]
        );
        let read_only: Vec<String> = reg
            .read_only_definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(read_only, vec!["list_directory", "read_file", "search_files"]);
    }
}
