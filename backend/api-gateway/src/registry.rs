//! Static registry of downstream services
//!
//! Maps a logical service name ("auth", "practices", ...) to where the
//! service lives and how it expects to be addressed. Built once at startup
//! and immutable afterwards; per-service differences (versioned prefix,
//! health path convention) are data on the entry.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistryEntry {
    pub logical_name: String,
    pub base_url: String,
    /// Whether every non-health route must carry the API prefix
    pub uses_versioned_prefix: bool,
    /// Absolute path of the service's own health endpoint
    pub health_path: String,
}

impl ServiceRegistryEntry {
    pub fn new(
        logical_name: impl Into<String>,
        base_url: impl Into<String>,
        uses_versioned_prefix: bool,
        health_path: impl Into<String>,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            uses_versioned_prefix,
            health_path: health_path.into(),
        }
    }

    /// Build the downstream URL for a gateway-relative path.
    pub fn target_url(&self, api_prefix: &str, path: &str, query: Option<&str>) -> String {
        let mut url = self.base_url.clone();
        if self.uses_versioned_prefix {
            url.push_str(api_prefix);
        }
        if !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_path)
    }
}

/// Known services: (logical name, env override key, default base URL, versioned prefix)
const PRACTICAS_SERVICES: &[(&str, &str, &str, bool)] = &[
    ("auth", "AUTH_SERVICE_URL", "http://localhost:3001", true),
    ("users", "USERS_SERVICE_URL", "http://localhost:3002", true),
    ("practices", "PRACTICES_SERVICE_URL", "http://localhost:3003", true),
    ("progress", "PROGRESS_SERVICE_URL", "http://localhost:3004", false),
    ("messages", "MESSAGES_SERVICE_URL", "http://localhost:3005", false),
    ("communication", "COMMUNICATION_SERVICE_URL", "http://localhost:3006", true),
    ("notifications", "NOTIFICATIONS_SERVICE_URL", "http://localhost:3007", false),
    ("documents", "DOCUMENTS_SERVICE_URL", "http://localhost:3008", true),
    ("reporting", "REPORTING_SERVICE_URL", "http://localhost:3009", false),
];

/// Default service set, with base URLs overridable through `lookup`.
///
/// Services mounted under the versioned prefix also expose their health
/// endpoint there; the others expose it at the root.
pub fn practicas_services<F>(api_prefix: &str, lookup: F) -> Vec<ServiceRegistryEntry>
where
    F: Fn(&str) -> Option<String>,
{
    PRACTICAS_SERVICES
        .iter()
        .map(|(name, env_key, default_url, versioned)| {
            let base_url = lookup(env_key).unwrap_or_else(|| default_url.to_string());
            let health_path = if *versioned {
                format!("{}/health", api_prefix)
            } else {
                "/health".to_string()
            };
            ServiceRegistryEntry::new(*name, base_url, *versioned, health_path)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    api_prefix: String,
    entries: Vec<ServiceRegistryEntry>,
}

impl ServiceRegistry {
    pub fn new(api_prefix: impl Into<String>, entries: Vec<ServiceRegistryEntry>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.logical_name.is_empty() {
                bail!("service registry entry {} has an empty logical name", i);
            }
            if !entry.base_url.starts_with("http://") && !entry.base_url.starts_with("https://") {
                bail!(
                    "service '{}' base URL must be http(s): {}",
                    entry.logical_name,
                    entry.base_url
                );
            }
            if entries[..i]
                .iter()
                .any(|other| other.logical_name == entry.logical_name)
            {
                bail!("duplicate service '{}' in registry", entry.logical_name);
            }
        }

        Ok(Self {
            api_prefix: api_prefix.into(),
            entries,
        })
    }

    pub fn get(&self, logical_name: &str) -> Option<&ServiceRegistryEntry> {
        self.entries.iter().find(|e| e.logical_name == logical_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceRegistryEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.logical_name.as_str()).collect()
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_target_url_respects_versioned_prefix() {
        let versioned = ServiceRegistryEntry::new("users", "http://users:3002/", true, "/api/v1/health");
        let bare = ServiceRegistryEntry::new("progress", "http://progress:3004", false, "/health");

        assert_eq!(
            versioned.target_url("/api/v1", "/users/42", None),
            "http://users:3002/api/v1/users/42"
        );
        assert_eq!(
            bare.target_url("/api/v1", "/progress/42", Some("page=2")),
            "http://progress:3004/progress/42?page=2"
        );
        assert_eq!(
            bare.target_url("/api/v1", "/milestones", Some("")),
            "http://progress:3004/milestones"
        );
    }

    #[test]
    fn test_health_url_per_service_convention() {
        let services = practicas_services("/api/v1", |_| None);
        let auth = services.iter().find(|e| e.logical_name == "auth").unwrap();
        let progress = services.iter().find(|e| e.logical_name == "progress").unwrap();

        assert_eq!(auth.health_url(), "http://localhost:3001/api/v1/health");
        assert_eq!(progress.health_url(), "http://localhost:3004/health");
    }

    #[test]
    fn test_env_overrides_base_url() {
        let env: HashMap<&str, &str> = [("PRACTICES_SERVICE_URL", "http://practices.internal:8080")]
            .into_iter()
            .collect();
        let services = practicas_services("/api/v1", |k| env.get(k).map(|v| v.to_string()));
        let practices = services.iter().find(|e| e.logical_name == "practices").unwrap();

        assert_eq!(practices.base_url, "http://practices.internal:8080");
        assert_eq!(services.len(), 9);
    }

    #[test]
    fn test_messages_and_communication_are_distinct() {
        let registry =
            ServiceRegistry::new("/api/v1", practicas_services("/api/v1", |_| None)).unwrap();
        let messages = registry.get("messages").unwrap();
        let communication = registry.get("communication").unwrap();

        assert_ne!(messages.base_url, communication.base_url);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let entries = vec![
            ServiceRegistryEntry::new("auth", "http://a:1", true, "/health"),
            ServiceRegistryEntry::new("auth", "http://b:2", true, "/health"),
        ];
        assert!(ServiceRegistry::new("/api/v1", entries).is_err());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let entries = vec![ServiceRegistryEntry::new("auth", "auth:3001", true, "/health")];
        assert!(ServiceRegistry::new("/api/v1", entries).is_err());
    }

    #[test]
    fn test_unknown_service_lookup() {
        let registry = ServiceRegistry::new("/api/v1", vec![]).unwrap();
        assert!(registry.get("auth").is_none());
        assert!(registry.is_empty());
    }
}
