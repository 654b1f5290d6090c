//! Configuration layer (C16): loads the provider table and runtime policy
//! from TOML, overlaid by environment variables and (by the binaries that
//! embed this crate) CLI flags. Precedence is CLI flag > env var > TOML file
//! > built-in default.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::masking::{DEFAULT_PLACEHOLDER_TEMPLATE, MaskingPolicy};
use crate::pruner_client::PrunerClientConfig;
use crate::router::{ProviderRouteEntry, RouterTable};

pub const DEFAULT_CONFIG_PATH: &str = "./relay.toml";

#[derive(Debug)]
pub enum ConfigError {
    Read(String),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(m) => write!(f, "could not read config file: {m}"),
            ConfigError::Parse(m) => write!(f, "could not parse config file: {m}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    server: Option<RawServer>,
    #[serde(default)]
    providers: HashMap<String, RawProvider>,
    #[serde(default)]
    masking: Option<RawMasking>,
    #[serde(default)]
    pruner: Option<RawPruner>,
    #[serde(default)]
    mcp_pruner: Option<RawMcpPruner>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawServer {
    addr: Option<String>,
    auth_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawProvider {
    #[serde(rename = "type")]
    provider_type: String,
    base_url: String,
    upstream_model: String,
    max_context: u64,
    api_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMasking {
    enabled: Option<bool>,
    window_turns: Option<usize>,
    keep_errors: Option<bool>,
    keep_last_k_per_tool: Option<usize>,
    placeholder_template: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPruner {
    enabled: Option<bool>,
    backend: Option<String>,
    min_chars_to_prune: Option<usize>,
    call_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMcpPruner {
    host: Option<String>,
    port: Option<u16>,
    max_input_chars: Option<usize>,
    prune_id_ttl_s: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrunerBackend {
    Heuristic,
    DeepInfra,
}

impl PrunerBackend {
    fn from_str(s: &str) -> Self {
        match s {
            "deepinfra" => PrunerBackend::DeepInfra,
            _ => PrunerBackend::Heuristic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub auth_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: "0.0.0.0:8080".to_string(),
            auth_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct McpPrunerServerConfig {
    pub host: String,
    pub port: u16,
    pub max_input_chars: usize,
    pub prune_id_ttl_s: u64,
    pub backend: PrunerBackend,
}

impl Default for McpPrunerServerConfig {
    fn default() -> Self {
        McpPrunerServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8801,
            max_input_chars: 2_000_000,
            prune_id_ttl_s: 600,
            backend: PrunerBackend::Heuristic,
        }
    }
}

/// Fully resolved runtime configuration: built-in defaults, overlaid by the
/// TOML file (if present and parseable), overlaid by environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub routes: RouterTable,
    pub masking: MaskingPolicy,
    pub pruner_client: PrunerClientConfig,
    pub mcp_pruner: McpPrunerServerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            server: ServerConfig::default(),
            routes: RouterTable::default(),
            masking: MaskingPolicy::default(),
            pruner_client: PrunerClientConfig::default(),
            mcp_pruner: McpPrunerServerConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Loads from `path` if it exists; a missing file is not an error (the
    /// built-in defaults apply), a present-but-unparseable file is.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = RelayConfig::default();

        if path.exists() {
            let raw_text =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
            let raw: RawConfig =
                toml::from_str(&raw_text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            cfg.apply_raw(raw);
        }

        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_raw(&mut self, raw: RawConfig) {
        if let Some(server) = raw.server {
            if let Some(addr) = server.addr {
                self.server.addr = addr;
            }
            if let Some(auth_key) = server.auth_key {
                self.server.auth_key = if auth_key.is_empty() {
                    None
                } else {
                    Some(auth_key)
                };
            }
        }

        for (key, provider) in raw.providers {
            self.routes.insert(ProviderRouteEntry {
                key,
                provider_type: provider.provider_type,
                base_url: provider.base_url,
                upstream_model: provider.upstream_model,
                max_context: provider.max_context,
                api_key_env: provider.api_key_env,
            });
        }

        if let Some(masking) = raw.masking {
            if let Some(enabled) = masking.enabled {
                self.masking.enabled = enabled;
            }
            if let Some(window_turns) = masking.window_turns {
                self.masking.window_turns = window_turns;
            }
            if let Some(keep_errors) = masking.keep_errors {
                self.masking.keep_errors = keep_errors;
            }
            if let Some(k) = masking.keep_last_k_per_tool {
                self.masking.keep_last_k_per_tool = Some(k);
            }
            if let Some(template) = masking.placeholder_template {
                self.masking.placeholder_template = template;
            }
        }

        if let Some(pruner) = raw.pruner {
            if let Some(enabled) = pruner.enabled {
                self.pruner_client.enabled = enabled;
            }
            if let Some(backend) = pruner.backend {
                self.mcp_pruner.backend = PrunerBackend::from_str(&backend);
            }
            if let Some(min_chars) = pruner.min_chars_to_prune {
                self.pruner_client.min_chars_to_prune = min_chars;
            }
            if let Some(timeout_ms) = pruner.call_timeout_ms {
                self.pruner_client.call_timeout_ms = timeout_ms;
            }
        }

        if let Some(mcp_pruner) = raw.mcp_pruner {
            if let Some(host) = mcp_pruner.host {
                self.mcp_pruner.host = host;
            }
            if let Some(port) = mcp_pruner.port {
                self.mcp_pruner.port = port;
            }
            if let Some(max_input_chars) = mcp_pruner.max_input_chars {
                self.mcp_pruner.max_input_chars = max_input_chars;
            }
            if let Some(ttl) = mcp_pruner.prune_id_ttl_s {
                self.mcp_pruner.prune_id_ttl_s = ttl;
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("RELAY_ADDR") {
            self.server.addr = addr;
        }
        if let Ok(auth_key) = std::env::var("RELAY_AUTH_KEY") {
            self.server.auth_key = if auth_key.is_empty() {
                None
            } else {
                Some(auth_key)
            };
        }
        if let Ok(backend) = std::env::var("KIMI_PRUNING_BACKEND") {
            self.mcp_pruner.backend = PrunerBackend::from_str(&backend);
        }
        if let Ok(pruner_url) = std::env::var("RELAY_PRUNER_URL") {
            self.pruner_client.base_url = pruner_url;
        }
        if let Ok(host) = std::env::var("MCP_PRUNER_HOST") {
            self.mcp_pruner.host = host;
        }
        if let Ok(port) = std::env::var("MCP_PRUNER_PORT") {
            if let Ok(port) = port.parse() {
                self.mcp_pruner.port = port;
            }
        }
        if let Ok(max_chars) = std::env::var("MCP_PRUNER_MAX_INPUT_CHARS") {
            if let Ok(max_chars) = max_chars.parse() {
                self.mcp_pruner.max_input_chars = max_chars;
            }
        }
        if let Ok(ttl) = std::env::var("MCP_PRUNER_PRUNE_ID_TTL_S") {
            if let Ok(ttl) = ttl.parse() {
                self.mcp_pruner.prune_id_ttl_s = ttl;
            }
        }
    }

    /// Placeholder template normalized to the canonical curly-apostrophe
    /// form when the TOML/default source used a plain ASCII apostrophe.
    pub fn normalized_placeholder_template(&self) -> String {
        if self.masking.placeholder_template.contains('\'')
            && !self.masking.placeholder_template.contains('’')
        {
            self.masking.placeholder_template.replace('\'', "’")
        } else {
            self.masking.placeholder_template.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_builtin_defaults() {
        let cfg = RelayConfig::load(Path::new("/nonexistent/relay.toml")).unwrap();
        assert_eq!(cfg.server.addr, "0.0.0.0:8080");
        assert!(cfg.masking.enabled);
        assert_eq!(cfg.mcp_pruner.port, 8801);
    }

    #[test]
    fn parses_provider_table_and_masking_overrides() {
        let dir = std::env::temp_dir().join(format!(
            "relay-config-test-{}",
            generate_unique_suffix()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relay.toml");
        std::fs::write(
            &path,
            r#"
[server]
addr = "127.0.0.1:9000"

[providers.kimi]
type = "kimi"
base_url = "https://api.moonshot.cn/v1"
upstream_model = "moonshot-v1-128k"
max_context = 131072
api_key_env = "KIMI_API_KEY"

[masking]
window_turns = 5
"#,
        )
        .unwrap();

        let cfg = RelayConfig::load(&path).unwrap();
        assert_eq!(cfg.server.addr, "127.0.0.1:9000");
        assert_eq!(cfg.masking.window_turns, 5);
        assert!(cfg.routes.resolve("kimi").is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }

    fn generate_unique_suffix() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        format!(
            "{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    #[test]
    fn placeholder_template_is_normalized_to_curly_apostrophe() {
        let mut cfg = RelayConfig::default();
        cfg.masking.placeholder_template =
            "[Observation masquée: résultat d'outil ancien]".to_string();
        assert!(cfg.normalized_placeholder_template().contains('’'));
        assert_eq!(
            DEFAULT_PLACEHOLDER_TEMPLATE.contains('’'),
            true
        );
    }
}
