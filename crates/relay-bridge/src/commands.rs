//! Builds the command/args/env for each stdio-relay server, mirroring the
//! per-server env var overrides from the original bridge script.

use std::collections::HashMap;
use std::path::Path;

pub const GATEWAY_HTTP_SERVERS: &[&str] =
    &["context-compression", "sequential-thinking", "fast-filesystem", "json-query"];

pub const STDIO_RELAY_SERVERS: &[&str] = &["filesystem-agent", "ripgrep-agent", "shrimp-task-manager"];

const DEFAULT_PATH_ENV: &str = "/usr/bin:/bin:/usr/local/bin";

#[derive(Debug, Clone)]
pub struct RelayCommand {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

fn base_relay_env() -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    if let Ok(forced_path) = std::env::var("MCP_BRIDGE_PATH_ENV") {
        env.insert("PATH".to_string(), forced_path);
    }
    env
}

fn filesystem_agent_command() -> RelayCommand {
    let allowed_root = std::env::var("MCP_FILESYSTEM_ALLOWED_ROOT").unwrap_or_else(|_| "/home/kidpixel".to_string());
    let command = std::env::var("MCP_FILESYSTEM_COMMAND").unwrap_or_else(|_| "npx".to_string());
    let mut env = base_relay_env();
    env.entry("PATH".to_string()).or_insert_with(|| DEFAULT_PATH_ENV.to_string());
    RelayCommand {
        command,
        args: vec!["-y".to_string(), "@modelcontextprotocol/server-filesystem".to_string(), allowed_root],
        env,
    }
}

fn ripgrep_agent_command() -> RelayCommand {
    let command = std::env::var("MCP_RIPGREP_COMMAND").unwrap_or_else(|_| "npx".to_string());
    let mut env = base_relay_env();
    env.entry("PATH".to_string()).or_insert_with(|| DEFAULT_PATH_ENV.to_string());
    RelayCommand {
        command,
        args: vec!["-y".to_string(), "mcp-ripgrep".to_string()],
        env,
    }
}

fn shrimp_task_manager_command() -> RelayCommand {
    let default_path = "/home/kidpixel/.local/bin/shrimp-task-manager";
    let default_command = if Path::new(default_path).exists() {
        default_path.to_string()
    } else {
        "shrimp-task-manager".to_string()
    };
    let command = std::env::var("MCP_SHRIMP_TASK_MANAGER_COMMAND").unwrap_or(default_command);
    RelayCommand {
        command,
        args: Vec::new(),
        env: base_relay_env(),
    }
}

pub fn build_stdio_relay_command(server_name: &str) -> Option<RelayCommand> {
    match server_name {
        "filesystem-agent" => Some(filesystem_agent_command()),
        "ripgrep-agent" => Some(ripgrep_agent_command()),
        "shrimp-task-manager" => Some(shrimp_task_manager_command()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_agent_defaults_when_env_unset() {
        let cmd = filesystem_agent_command();
        assert_eq!(cmd.command, "npx");
        assert_eq!(cmd.args[1], "@modelcontextprotocol/server-filesystem");
    }

    #[test]
    fn unknown_server_has_no_relay_command() {
        assert!(build_stdio_relay_command("not-a-server").is_none());
    }
}
