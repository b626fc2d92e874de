//! Channel data model and fetch metrics.
//!
//! A [`Channel`] is an independently configured upstream model provider.
//! Identity is the externally assigned `id`; display names are not unique.
//! The catalog and its [`CatalogState`] are mutated in place as fetches
//! complete, so observers can reflect per-channel progress immediately.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Administrative status of a channel on the relay server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelStatus {
    Active,
    Disabled,
    Unknown,
}

impl ChannelStatus {
    /// Map the relay server's integer status code (1 = enabled, 2 = disabled).
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Active,
            2 => Self::Disabled,
            _ => Self::Unknown,
        }
    }
}

/// Lifecycle of a channel's model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "reason")]
pub enum CatalogState {
    /// No fetch attempted yet.
    Unfetched,
    /// Queued for a fetch that has not dispatched.
    Pending,
    /// A request is in flight. Re-entering `Loading` is harmless: multiple
    /// triggers (bulk fetch, prefetch, single-channel retry) may race on the
    /// same channel and transitions must be idempotent.
    Loading,
    Fetched,
    Failed(String),
}

impl CatalogState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Fetched | Self::Failed(_))
    }
}

/// An upstream model provider/endpoint as listed by the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Unique, externally assigned.
    pub id: i64,
    /// Operator-facing label. Not guaranteed unique.
    pub name: String,
    /// Vendor/type discriminator as reported by the server.
    #[serde(rename = "type", default)]
    pub kind: i64,
    pub status: ChannelStatus,
    /// Raw model names, in server order. Empty until fetched.
    #[serde(default)]
    pub catalog: Vec<String>,
    #[serde(default = "default_catalog_state")]
    pub catalog_state: CatalogState,
}

const fn default_catalog_state() -> CatalogState {
    CatalogState::Unfetched
}

impl Channel {
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: 0,
            status: ChannelStatus::Active,
            catalog: Vec::new(),
            catalog_state: CatalogState::Unfetched,
        }
    }

    /// Short summary used in per-channel sync plans.
    #[must_use]
    pub fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            status: self.status,
        }
    }
}

/// Channel identity without catalog payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: i64,
    pub status: ChannelStatus,
}

/// Outcome of one catalog request, fed into the adaptive batch controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMetric {
    pub channel_id: i64,
    pub request_duration_ms: u64,
    pub result_count: usize,
    pub success: bool,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Bounded rolling window of the most recent fetch metrics.
///
/// Oldest entries are evicted first once the capacity is reached.
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    metrics: VecDeque<FetchMetric>,
    capacity: usize,
}

impl MetricsWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            metrics: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, metric: FetchMetric) {
        if self.metrics.len() == self.capacity {
            self.metrics.pop_front();
        }
        self.metrics.push_back(metric);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Fraction of successful requests in the window, in `[0, 1]`.
    /// An empty window reports 1.0 so the controller stays put at startup.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.metrics.is_empty() {
            return 1.0;
        }
        let ok = self.metrics.iter().filter(|m| m.success).count();
        #[allow(clippy::cast_precision_loss)]
        {
            ok as f64 / self.metrics.len() as f64
        }
    }

    /// Mean request duration over the window, in milliseconds.
    #[must_use]
    pub fn avg_duration_ms(&self) -> f64 {
        if self.metrics.is_empty() {
            return 0.0;
        }
        let total: u64 = self.metrics.iter().map(|m| m.request_duration_ms).sum();
        #[allow(clippy::cast_precision_loss)]
        {
            total as f64 / self.metrics.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(success: bool, duration_ms: u64) -> FetchMetric {
        FetchMetric {
            channel_id: 1,
            request_duration_ms: duration_ms,
            result_count: 0,
            success,
            timestamp: 0,
        }
    }

    #[test]
    fn status_codes_map_to_enum() {
        assert_eq!(ChannelStatus::from_code(1), ChannelStatus::Active);
        assert_eq!(ChannelStatus::from_code(2), ChannelStatus::Disabled);
        assert_eq!(ChannelStatus::from_code(99), ChannelStatus::Unknown);
    }

    #[test]
    fn window_evicts_oldest_first() {
        let mut window = MetricsWindow::new(3);
        for i in 0..5 {
            window.record(metric(true, i * 100));
        }
        assert_eq!(window.len(), 3);
        assert!((window.avg_duration_ms() - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn success_rate_counts_failures() {
        let mut window = MetricsWindow::new(10);
        window.record(metric(true, 10));
        window.record(metric(false, 10));
        window.record(metric(false, 10));
        window.record(metric(true, 10));
        assert!((window.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_window_reports_full_success() {
        let window = MetricsWindow::new(4);
        assert!((window.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!((window.avg_duration_ms() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn channel_deserializes_server_shape() {
        let channel: Channel = serde_json::from_str(
            r#"{"id": 7, "name": "Alpha", "type": 8, "status": "active"}"#,
        )
        .expect("channel json");
        assert_eq!(channel.id, 7);
        assert_eq!(channel.kind, 8);
        assert!(channel.catalog.is_empty());
        assert_eq!(channel.catalog_state, CatalogState::Unfetched);
    }
}
