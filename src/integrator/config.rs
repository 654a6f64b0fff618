//! # Integrator Config
//!
//! The operator-facing options of the integrator, loaded from a YAML
//! file and validated against Azure naming rules. Option names use
//! kebab-case on disk, matching the field names that later appear in
//! relation bags.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::{
    AZURE_MANDATORY_OPTIONS, AZURE_OPTIONS, DEFAULT_CONNECTION_PROTOCOL,
    SUPPORTED_CONNECTION_PROTOCOLS,
};
use crate::model::SecretUri;

/// User-facing configuration of the integrator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct IntegratorConfig {
    /// Container requirers are pointed at; overrides whatever name they
    /// claimed for themselves
    pub container: Option<String>,
    /// Storage account the container lives in
    pub storage_account: Option<String>,
    /// `secret:` URI of the secret holding the storage access key
    pub credentials: Option<String>,
    /// Optional path prefix inside the container
    pub path: Option<String>,
    /// Protocol requirers should connect with
    pub connection_protocol: Option<String>,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            container: None,
            storage_account: None,
            credentials: None,
            path: None,
            connection_protocol: Some(DEFAULT_CONNECTION_PROTOCOL.to_string()),
        }
    }
}

impl IntegratorConfig {
    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Value of one option by its wire name. Whitespace is trimmed and
    /// an empty value reads as unset.
    pub fn get(&self, option: &str) -> Option<&str> {
        let value = match option {
            "container" => self.container.as_deref(),
            "storage-account" => self.storage_account.as_deref(),
            "credentials" => self.credentials.as_deref(),
            "path" => self.path.as_deref(),
            "connection-protocol" => self.connection_protocol.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    /// Every option that is set, keyed by wire name.
    pub fn options(&self) -> BTreeMap<String, String> {
        AZURE_OPTIONS
            .iter()
            .filter_map(|option| {
                self.get(option)
                    .map(|value| ((*option).to_string(), value.to_string()))
            })
            .collect()
    }

    /// Mandatory options still unset.
    pub fn missing_parameters(&self) -> Vec<&'static str> {
        AZURE_MANDATORY_OPTIONS
            .iter()
            .copied()
            .filter(|option| self.get(option).is_none())
            .collect()
    }

    /// Parsed credentials reference, if one is configured and well-formed.
    pub fn credentials_uri(&self) -> Option<SecretUri> {
        self.get("credentials").and_then(SecretUri::parse)
    }

    /// Validates every set option against Azure naming rules. Unset
    /// options pass here; completeness is status's concern, not validity's.
    pub fn validate(&self) -> Result<()> {
        if let Some(container) = self.get("container") {
            validate_container_name(container)?;
        }
        if let Some(account) = self.get("storage-account") {
            validate_storage_account_name(account)?;
        }
        if let Some(credentials) = self.get("credentials") {
            if SecretUri::parse(credentials).is_none() {
                return Err(anyhow::anyhow!(
                    "credentials '{credentials}' must be a secret URI ('secret:<id>')"
                ));
            }
        }
        if let Some(protocol) = self.get("connection-protocol") {
            validate_connection_protocol(protocol)?;
        }
        Ok(())
    }
}

/// Validate an Azure container name
/// Format: lowercase alphanumeric and hyphens, no consecutive hyphens
/// Length: 3-63 characters; cannot start or end with hyphen
fn validate_container_name(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 63 {
        return Err(anyhow::anyhow!(
            "container '{}' must be 3-63 characters long (got {})",
            name,
            name.len()
        ));
    }

    let container_regex = Regex::new(r"^[a-z0-9](-?[a-z0-9])*$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    if !container_regex.is_match(name) {
        return Err(anyhow::anyhow!(
            "container '{name}' must be lowercase alphanumeric with single hyphens; cannot start/end with hyphen"
        ));
    }

    Ok(())
}

/// Validate an Azure storage account name
/// Format: lowercase letters and numbers only
/// Length: 3-24 characters
fn validate_storage_account_name(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 24 {
        return Err(anyhow::anyhow!(
            "storage-account '{}' must be 3-24 characters long (got {})",
            name,
            name.len()
        ));
    }

    let account_regex = Regex::new(r"^[a-z0-9]+$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    if !account_regex.is_match(name) {
        return Err(anyhow::anyhow!(
            "storage-account '{name}' must contain lowercase letters and numbers only"
        ));
    }

    Ok(())
}

fn validate_connection_protocol(protocol: &str) -> Result<()> {
    if SUPPORTED_CONNECTION_PROTOCOLS.contains(&protocol) {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "connection-protocol '{}' must be one of: {}",
            protocol,
            SUPPORTED_CONNECTION_PROTOCOLS.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_has_default_protocol() {
        let config = IntegratorConfig::default();
        assert_eq!(config.get("connection-protocol"), Some("abfss"));
        assert_eq!(config.get("container"), None);
    }

    #[test]
    fn test_parse_kebab_case_yaml() {
        let config: IntegratorConfig = serde_yaml::from_str(
            "container: c1\nstorage-account: acct\ncredentials: secret:abc\npath: /etl\n",
        )
        .unwrap();
        assert_eq!(config.get("container"), Some("c1"));
        assert_eq!(config.get("storage-account"), Some("acct"));
        assert_eq!(config.get("credentials"), Some("secret:abc"));
        assert_eq!(config.get("path"), Some("/etl"));
        // Defaults fill in what the file leaves out
        assert_eq!(config.get("connection-protocol"), Some("abfss"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let parsed: Result<IntegratorConfig, _> = serde_yaml::from_str("bucket: oops\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "container: from-disk").unwrap();
        let config = IntegratorConfig::load(file.path()).unwrap();
        assert_eq!(config.get("container"), Some("from-disk"));

        let missing = IntegratorConfig::load(Path::new("/definitely/not/here.yaml"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_empty_and_whitespace_values_read_as_unset() {
        let config = IntegratorConfig {
            container: Some(String::new()),
            storage_account: Some("   ".to_string()),
            ..IntegratorConfig::default()
        };
        assert_eq!(config.get("container"), None);
        assert_eq!(config.get("storage-account"), None);
    }

    #[test]
    fn test_missing_parameters_lists_mandatory_gaps() {
        let config = IntegratorConfig {
            container: Some("c1".to_string()),
            ..IntegratorConfig::default()
        };
        assert_eq!(config.missing_parameters(), vec!["storage-account", "credentials"]);

        let complete = IntegratorConfig {
            container: Some("c1".to_string()),
            storage_account: Some("acct".to_string()),
            credentials: Some("secret:abc".to_string()),
            ..IntegratorConfig::default()
        };
        assert!(complete.missing_parameters().is_empty());
    }

    #[test]
    fn test_validate_container_names() {
        let too_long = "x".repeat(64);
        let cases = [
            ("c1", false), // too short
            ("valid-container", true),
            ("relation-12", true),
            ("Upper", false),
            ("double--hyphen", false),
            ("-leading", false),
            ("trailing-", false),
            (too_long.as_str(), false),
        ];
        for (name, expected) in cases {
            let config = IntegratorConfig {
                container: Some(name.to_string()),
                ..IntegratorConfig::default()
            };
            assert_eq!(config.validate().is_ok(), expected, "container '{name}'");
        }
    }

    #[test]
    fn test_validate_storage_account_names() {
        let too_long = "a".repeat(25);
        let cases = [
            ("acct", true),
            ("ac", false),
            ("with-hyphen", false),
            ("UPPER", false),
            ("0storage9", true),
            (too_long.as_str(), false),
        ];
        for (name, expected) in cases {
            let config = IntegratorConfig {
                storage_account: Some(name.to_string()),
                ..IntegratorConfig::default()
            };
            assert_eq!(config.validate().is_ok(), expected, "storage account '{name}'");
        }
    }

    #[test]
    fn test_validate_credentials_and_protocol() {
        let config = IntegratorConfig {
            credentials: Some("plaintext-key".to_string()),
            ..IntegratorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = IntegratorConfig {
            connection_protocol: Some("ftp".to_string()),
            ..IntegratorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = IntegratorConfig {
            credentials: Some("secret:abc".to_string()),
            connection_protocol: Some("wasbs".to_string()),
            ..IntegratorConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_options_collects_set_values() {
        let config = IntegratorConfig {
            container: Some("c1".to_string()),
            path: Some("/etl".to_string()),
            ..IntegratorConfig::default()
        };
        let options = config.options();
        assert_eq!(options.get("container").map(String::as_str), Some("c1"));
        assert_eq!(options.get("path").map(String::as_str), Some("/etl"));
        assert_eq!(options.get("connection-protocol").map(String::as_str), Some("abfss"));
        assert!(!options.contains_key("credentials"));
    }
}
