//! Provider router (C2): resolves a logical model id to an upstream target.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderRouteEntry {
    pub key: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    pub base_url: String,
    pub upstream_model: String,
    pub max_context: u64,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub provider_type: String,
    pub base_url: String,
    pub upstream_model: String,
    pub max_context: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RouterTable {
    entries: HashMap<String, ProviderRouteEntry>,
}

impl RouterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ProviderRouteEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderRouteEntry> {
        self.entries.values()
    }

    /// Resolves `model_id`. Accepts either a bare key into the table or a
    /// `provider:model` pair, in which case the part after `:` overrides
    /// `upstream_model` for this call only.
    pub fn resolve(&self, model_id: &str) -> Result<ResolvedRoute, CoreError> {
        if let Some((key, override_model)) = model_id.split_once(':') {
            if let Some(entry) = self.entries.get(key) {
                return Ok(ResolvedRoute {
                    provider_type: entry.provider_type.clone(),
                    base_url: entry.base_url.clone(),
                    upstream_model: override_model.to_string(),
                    max_context: entry.max_context,
                });
            }
        }

        self.entries
            .get(model_id)
            .map(|entry| ResolvedRoute {
                provider_type: entry.provider_type.clone(),
                base_url: entry.base_url.clone(),
                upstream_model: entry.upstream_model.clone(),
                max_context: entry.max_context,
            })
            .ok_or_else(|| CoreError::UnknownModel(model_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> RouterTable {
        let mut table = RouterTable::new();
        table.insert(ProviderRouteEntry {
            key: "kimi".to_string(),
            provider_type: "kimi".to_string(),
            base_url: "https://api.moonshot.cn/v1".to_string(),
            upstream_model: "moonshot-v1-128k".to_string(),
            max_context: 131072,
            api_key_env: Some("KIMI_API_KEY".to_string()),
        });
        table
    }

    #[test]
    fn resolves_exact_key() {
        let table = sample_table();
        let resolved = table.resolve("kimi").unwrap();
        assert_eq!(resolved.provider_type, "kimi");
        assert_eq!(resolved.upstream_model, "moonshot-v1-128k");
    }

    #[test]
    fn unknown_model_is_rejected() {
        let table = sample_table();
        assert_eq!(
            table.resolve("nonexistent"),
            Err(CoreError::UnknownModel("nonexistent".to_string()))
        );
    }

    #[test]
    fn provider_colon_model_overrides_upstream_model() {
        let table = sample_table();
        let resolved = table.resolve("kimi:moonshot-v1-32k").unwrap();
        assert_eq!(resolved.upstream_model, "moonshot-v1-32k");
        assert_eq!(resolved.provider_type, "kimi");
    }
}
