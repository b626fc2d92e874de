//! Relay server collaborator interface.
//!
//! The remote HTTP protocol is owned by the relay server's own contract;
//! this module only fixes the shapes the reconciliation core consumes and
//! the [`RelayApi`] trait behind which a transport lives. Tests (and any
//! embedder) supply their own implementation, the same way providers are
//! swapped behind a trait elsewhere in this codebase.

use crate::channel::Channel;
use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Generic `{success, message?, data?}` response envelope used by the relay
/// server for every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Result of probing the server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Actionable hints ("check the token", ...) when the probe failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Options for a per-channel model listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchOptions {
    /// Return the channel's full upstream catalog.
    pub fetch_all: bool,
    /// Return only the models currently enabled on the channel.
    pub fetch_selected_only: bool,
    /// Include catalogs of disabled channels.
    pub include_disabled: bool,
}

/// How a sync push applies the mapping on each channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateMode {
    /// Replace the channel's mapping wholesale.
    Overwrite,
    /// Merge into the existing mapping, keeping unrelated entries.
    Merge,
}

/// Per-push statistics reported by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

/// The server's response to a sync push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SyncStats>,
}

/// One finding of a server-side bulk mapping scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkMappingChange {
    pub channel_id: i64,
    pub canonical: String,
    pub raw: String,
}

/// Result of a server-side bulk mapping scan (preview or apply).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateReport {
    pub scanned_channels: usize,
    #[serde(default)]
    pub broken_mappings: Vec<BulkMappingChange>,
    #[serde(default)]
    pub new_mappings: Vec<BulkMappingChange>,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// The relay server operations the reconciliation core depends on.
#[async_trait]
pub trait RelayApi: Send + Sync {
    /// Probe connectivity and auth; returns the server version on success.
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<ConnectionStatus>;

    /// List all channels configured on the server.
    async fn list_channels(&self, config: &ConnectionConfig) -> Result<Vec<Channel>>;

    /// List the raw model names of one channel.
    async fn fetch_channel_models(
        &self,
        config: &ConnectionConfig,
        channel_id: i64,
        options: &FetchOptions,
    ) -> Result<Vec<String>>;

    /// Push a canonical→raw mapping to the given channels.
    async fn push_sync(
        &self,
        config: &ConnectionConfig,
        mapping: &BTreeMap<String, String>,
        mode: UpdateMode,
        channel_ids: &[i64],
    ) -> Result<SyncReport>;

    /// Dry-run the server-side bulk mapping update.
    async fn preview_bulk_update(&self, config: &ConnectionConfig) -> Result<BulkUpdateReport>;

    /// Apply the server-side bulk mapping update.
    async fn apply_bulk_update(&self, config: &ConnectionConfig) -> Result<BulkUpdateReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_deserializes_with_and_without_data() {
        let ok: ApiEnvelope<Vec<String>> =
            serde_json::from_str(r#"{"success": true, "data": ["gpt-4o"]}"#).expect("ok envelope");
        assert!(ok.success);
        assert_eq!(ok.data.as_deref(), Some(["gpt-4o".to_string()].as_slice()));

        let err: ApiEnvelope<Vec<String>> =
            serde_json::from_str(r#"{"success": false, "message": "no such channel"}"#)
                .expect("err envelope");
        assert!(!err.success);
        assert_eq!(err.message.as_deref(), Some("no such channel"));
        assert!(err.data.is_none());
    }

    #[test]
    fn bulk_report_defaults_empty_collections() {
        let report: BulkUpdateReport =
            serde_json::from_str(r#"{"scannedChannels": 3}"#).expect("report");
        assert_eq!(report.scanned_channels, 3);
        assert!(report.broken_mappings.is_empty());
        assert!(report.logs.is_empty());
    }
}
