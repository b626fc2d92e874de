//! Connection and reconciliation configuration.
//!
//! Config is explicit state handed to each component; nothing reads it from
//! globals. The token field supports `env:`/`file:` indirection so secrets
//! stay out of the config file itself.

use crate::canonical::CanonicalizeOptions;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the access token goes on outbound requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthHeaderType {
    /// `Authorization: Bearer <token>`
    #[default]
    Bearer,
    /// Bare token in the `Authorization` header (older relay builds).
    Raw,
    /// `New-Api-User` style header pair.
    NewApiUser,
}

/// How to reach and authenticate against the relay server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub server_url: String,
    /// Literal token, or `env:VAR` / `file:path` indirection.
    pub token: String,
    pub user_id: Option<i64>,
    pub auth_header_type: AuthHeaderType,
}

impl ConnectionConfig {
    /// Validate the server URL shape. HTTP(S) only, host required.
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.server_url)
            .map_err(|e| Error::config(format!("invalid server URL: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::config(format!(
                    "unsupported server URL scheme: '{other}'"
                )));
            }
        }
        if parsed.host_str().is_none() {
            return Err(Error::config("server URL missing host"));
        }
        if self.token.trim().is_empty() {
            return Err(Error::config("access token is empty"));
        }
        Ok(())
    }

    /// Resolve the token, following `env:`/`file:` indirection.
    pub fn resolve_token(&self) -> Result<String> {
        resolve_value(&self.token)
            .ok_or_else(|| Error::config("access token resolved to an empty value"))
    }
}

/// Full application configuration persisted between sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    pub connection: ConnectionConfig,
    pub canonicalize: CanonicalizeOptions,
}

impl ReconcileConfig {
    /// Load from a JSON file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string_pretty(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }
}

/// Default config file location under the user's config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaymap")
        .join("config.json")
}

fn resolve_value(value: &str) -> Option<String> {
    if let Some(var_name) = value.strip_prefix("env:") {
        if var_name.is_empty() {
            return None;
        }
        return std::env::var(var_name).ok().filter(|v| !v.is_empty());
    }

    if let Some(file_path) = value.strip_prefix("file:") {
        if file_path.is_empty() {
            return None;
        }
        return std::fs::read_to_string(file_path)
            .ok()
            .map(|contents| contents.trim().to_string())
            .filter(|v| !v.is_empty());
    }

    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn valid_connection() -> ConnectionConfig {
        ConnectionConfig {
            server_url: "https://relay.example".to_string(),
            token: "sk-test".to_string(),
            user_id: Some(1),
            auth_header_type: AuthHeaderType::Bearer,
        }
    }

    #[test]
    fn validate_accepts_https_and_rejects_other_schemes() {
        assert!(valid_connection().validate().is_ok());

        let ftp = ConnectionConfig {
            server_url: "ftp://relay.example".to_string(),
            ..valid_connection()
        };
        assert!(ftp.validate().is_err());

        let empty_token = ConnectionConfig {
            token: "  ".to_string(),
            ..valid_connection()
        };
        assert!(empty_token.validate().is_err());
    }

    #[test]
    fn resolve_token_supports_file_indirection() {
        let dir = tempdir().expect("tempdir");
        let key_path = dir.path().join("token.txt");
        std::fs::write(&key_path, "file-token\n").expect("write token");

        let config = ConnectionConfig {
            token: format!("file:{}", key_path.display()),
            ..valid_connection()
        };
        assert_eq!(config.resolve_token().expect("token"), "file-token");

        let missing = ConnectionConfig {
            token: "file:/definitely/missing".to_string(),
            ..valid_connection()
        };
        assert!(missing.resolve_token().is_err());
    }

    #[test]
    fn config_round_trips_through_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");

        let config = ReconcileConfig {
            connection: valid_connection(),
            canonicalize: CanonicalizeOptions {
                keep_namespace: true,
                ..CanonicalizeOptions::default()
            },
        };
        config.save(&path).expect("save");

        let loaded = ReconcileConfig::load(&path).expect("load");
        assert_eq!(loaded.connection.server_url, "https://relay.example");
        assert!(loaded.canonicalize.keep_namespace);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let loaded = ReconcileConfig::load(&dir.path().join("absent.json")).expect("load");
        assert!(loaded.connection.server_url.is_empty());
    }
}
