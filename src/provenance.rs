//! Provenance tracking for curated raw model names.
//!
//! Every raw model name in the curated list must trace back to a channel or
//! search selection; there is no free-text entry path, so a missing record
//! is always a reportable inconsistency rather than an expected state.
//! Two channels can expose an identically-named model and both selections
//! must be tracked, not merged into one record.

use crate::channel::Channel;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Label returned when a name has no usable provenance.
///
/// Never an empty string: the UI must show the anomaly, not a blank cell.
pub const ANOMALY_MARKER: &str = "⚠ unknown source";

/// How a raw model name entered the curated list.
///
/// Closed set: every call site matches exhaustively so a new kind cannot be
/// silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    /// Picked from a channel's fetched catalog.
    ChannelSelection,
    /// Picked from a cross-channel search result.
    SearchSelection,
    /// A record that claims manual entry. The system never permits free-text
    /// model entry, so this kind only exists to flag corrupted state.
    ManualInvalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceRecord {
    pub kind: SourceKind,
    pub channel_id: Option<i64>,
    pub channel_label: String,
    /// Monotonically increasing insertion counter, not wall time. Used only
    /// for most-recent-first tie-breaks.
    pub timestamp: u64,
}

/// Per-name ordered provenance records.
///
/// Records for a name are kept in insertion order; the sequence never holds
/// two records with the same `(channel_id, kind)` pair — re-selecting the
/// same model from the same channel refreshes the existing record's
/// timestamp in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceTracker {
    index: HashMap<String, Vec<ProvenanceRecord>>,
    next_timestamp: u64,
}

impl ProvenanceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a provenance record for `name`.
    pub fn record(
        &mut self,
        name: &str,
        kind: SourceKind,
        channel_label: &str,
        channel_id: Option<i64>,
    ) {
        self.next_timestamp += 1;
        let timestamp = self.next_timestamp;
        let records = self.index.entry(name.to_string()).or_default();
        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.channel_id == channel_id && r.kind == kind)
        {
            existing.timestamp = timestamp;
            existing.channel_label = channel_label.to_string();
        } else {
            records.push(ProvenanceRecord {
                kind,
                channel_id,
                channel_label: channel_label.to_string(),
                timestamp,
            });
        }
    }

    /// Record a selection from a fetched channel catalog.
    pub fn record_channel_selection(&mut self, name: &str, channel: &Channel) {
        self.record(
            name,
            SourceKind::ChannelSelection,
            &channel.name,
            Some(channel.id),
        );
    }

    /// Delete every record for `name`. Idempotent.
    pub fn remove(&mut self, name: &str) {
        self.index.remove(name);
    }

    /// Source label to show for the `occurrence_index`-th curated-list line
    /// bearing `name`.
    ///
    /// The curated list may intentionally contain the same raw name on
    /// several lines ("the same model from two channels"); sorting the
    /// records most-recent-first and indexing by `occurrence_index mod len`
    /// distributes the labels deterministically across those lines instead
    /// of always showing the newest channel.
    #[must_use]
    pub fn display_label(&self, name: &str, occurrence_index: usize) -> String {
        let Some(records) = self.index.get(name).filter(|r| !r.is_empty()) else {
            return ANOMALY_MARKER.to_string();
        };
        if records.len() == 1 {
            let record = &records[0];
            return match record.kind {
                SourceKind::ChannelSelection | SourceKind::SearchSelection => {
                    record.channel_label.clone()
                }
                SourceKind::ManualInvalid => ANOMALY_MARKER.to_string(),
            };
        }
        let mut sorted: Vec<&ProvenanceRecord> = records.iter().collect();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let record = sorted[occurrence_index % sorted.len()];
        match record.kind {
            SourceKind::ChannelSelection | SourceKind::SearchSelection => {
                record.channel_label.clone()
            }
            SourceKind::ManualInvalid => ANOMALY_MARKER.to_string(),
        }
    }

    /// All channel ids that contributed `name`. Search-only and invalid
    /// records carry no channel id and are excluded.
    #[must_use]
    pub fn channels_for(&self, name: &str) -> BTreeSet<i64> {
        self.index
            .get(name)
            .map(|records| records.iter().filter_map(|r| r.channel_id).collect())
            .unwrap_or_default()
    }

    /// First (oldest-inserted) record for `name`, if any.
    #[must_use]
    pub fn first_record(&self, name: &str) -> Option<&ProvenanceRecord> {
        self.index.get(name).and_then(|records| records.first())
    }

    /// Strict variant of [`channels_for`](Self::channels_for) for callers
    /// that treat a provenance-less name as a hard error instead of a
    /// display-time anomaly.
    pub fn require_channels(&self, name: &str) -> Result<BTreeSet<i64>> {
        let ids = self.channels_for(name);
        if ids.is_empty() {
            return Err(Error::provenance(format!(
                "no channel provenance for '{name}'"
            )));
        }
        Ok(ids)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Names whose records are unusable (empty or flagged `ManualInvalid`).
    /// Each is a data-integrity anomaly worth surfacing.
    #[must_use]
    pub fn anomalies(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .index
            .iter()
            .filter(|(_, records)| {
                records.is_empty()
                    || records.iter().all(|r| r.kind == SourceKind::ManualInvalid)
            })
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Serialize as the two parallel key→value tables the local store keeps:
    /// `name → most-recent label` and `name → JSON-encoded record list`.
    #[must_use]
    pub fn to_tables(&self) -> (HashMap<String, String>, HashMap<String, String>) {
        let mut labels = HashMap::new();
        let mut records = HashMap::new();
        for (name, recs) in &self.index {
            labels.insert(name.clone(), self.display_label(name, 0));
            match serde_json::to_string(recs) {
                Ok(encoded) => {
                    records.insert(name.clone(), encoded);
                }
                Err(err) => warn!(name = %name, error = %err, "failed to encode provenance records"),
            }
        }
        (labels, records)
    }

    /// Rebuild the tracker from the serialized record table. Unparseable
    /// entries are dropped with a warning rather than failing the load.
    #[must_use]
    pub fn from_records_table(table: &HashMap<String, String>) -> Self {
        let mut index: HashMap<String, Vec<ProvenanceRecord>> = HashMap::new();
        let mut max_timestamp = 0;
        for (name, encoded) in table {
            match serde_json::from_str::<Vec<ProvenanceRecord>>(encoded) {
                Ok(records) => {
                    max_timestamp = records
                        .iter()
                        .map(|r| r.timestamp)
                        .fold(max_timestamp, u64::max);
                    index.insert(name.clone(), records);
                }
                Err(err) => {
                    warn!(name = %name, error = %err, "dropping unparseable provenance entry");
                }
            }
        }
        Self {
            index,
            next_timestamp: max_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_then_remove_round_trips_to_anomaly() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record("m", SourceKind::ChannelSelection, "Alpha", Some(7));
        assert_eq!(tracker.display_label("m", 0), "Alpha");
        tracker.remove("m");
        assert_eq!(tracker.display_label("m", 0), ANOMALY_MARKER);
        // remove is idempotent
        tracker.remove("m");
        assert!(tracker.is_empty());
    }

    #[test]
    fn reselection_refreshes_in_place_instead_of_duplicating() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record("m", SourceKind::ChannelSelection, "Alpha", Some(7));
        tracker.record("m", SourceKind::ChannelSelection, "Alpha (renamed)", Some(7));
        let records = tracker.index.get("m").expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].channel_label, "Alpha (renamed)");
        assert_eq!(records[0].timestamp, 2);
    }

    #[test]
    fn occurrence_index_distributes_multiple_sources() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record("m", SourceKind::ChannelSelection, "Alpha", Some(7));
        tracker.record("m", SourceKind::ChannelSelection, "Beta", Some(9));
        // Most recent first, then wrap.
        assert_eq!(tracker.display_label("m", 0), "Beta");
        assert_eq!(tracker.display_label("m", 1), "Alpha");
        assert_eq!(tracker.display_label("m", 2), "Beta");
    }

    #[test]
    fn same_channel_different_kind_keeps_both_records() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record("m", SourceKind::ChannelSelection, "Alpha", Some(7));
        tracker.record("m", SourceKind::SearchSelection, "Alpha", Some(7));
        assert_eq!(tracker.index.get("m").map(Vec::len), Some(2));
    }

    #[test]
    fn manual_invalid_records_surface_the_anomaly_marker() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record("m", SourceKind::ManualInvalid, "whatever", None);
        assert_eq!(tracker.display_label("m", 0), ANOMALY_MARKER);
        assert_eq!(tracker.anomalies(), vec!["m"]);
    }

    #[test]
    fn channels_for_skips_channel_less_records() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record("m", SourceKind::ChannelSelection, "Alpha", Some(1));
        tracker.record("m", SourceKind::ChannelSelection, "Beta", Some(2));
        tracker.record("m", SourceKind::SearchSelection, "search", None);
        assert_eq!(
            tracker.channels_for("m").into_iter().collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(tracker.channels_for("absent").is_empty());
    }

    #[test]
    fn strict_lookup_turns_missing_provenance_into_an_error() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record("m", SourceKind::ChannelSelection, "Alpha", Some(7));
        assert_eq!(
            tracker.require_channels("m").expect("channels").into_iter().collect::<Vec<_>>(),
            vec![7]
        );

        let err = tracker.require_channels("orphan").unwrap_err();
        assert!(matches!(err, Error::Provenance(_)));
        // Search-only records carry no channel id either.
        tracker.record("searched", SourceKind::SearchSelection, "search", None);
        assert!(tracker.require_channels("searched").is_err());
        assert!(tracker.contains("searched"));
    }

    #[test]
    fn tables_round_trip() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record("a", SourceKind::ChannelSelection, "Alpha", Some(1));
        tracker.record("b", SourceKind::ChannelSelection, "Beta", Some(2));
        tracker.record("b", SourceKind::ChannelSelection, "Gamma", Some(3));

        let (labels, records) = tracker.to_tables();
        assert_eq!(labels.get("a").map(String::as_str), Some("Alpha"));
        assert_eq!(labels.get("b").map(String::as_str), Some("Gamma"));

        let restored = ProvenanceTracker::from_records_table(&records);
        assert_eq!(restored.display_label("b", 0), "Gamma");
        assert_eq!(restored.display_label("b", 1), "Beta");
        assert_eq!(
            restored.channels_for("b").into_iter().collect::<Vec<_>>(),
            vec![2, 3]
        );

        // New records after a restore keep timestamps monotonic.
        let mut restored = restored;
        restored.record("c", SourceKind::ChannelSelection, "Delta", Some(4));
        assert!(restored.first_record("c").expect("record").timestamp > 3);
    }
}
