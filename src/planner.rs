//! Reconciliation planning: canonical mapping plus per-channel sync plans.
//!
//! `build_mapping` flattens the curated list into `canonical → raw` with
//! last-write-wins semantics (the curated list is live-editable, so the
//! current state wins). Collisions between distinct raw names are surfaced
//! in the outcome rather than silently resolved: only the later raw name's
//! provenance drives the grouping for that canonical key, and operators
//! need to see that.
//!
//! `group_by_channel` regroups the flat mapping into per-channel payloads
//! for the synchronization push. A raw name contributed by two channels
//! lands in both channels' plans; the fan-out is intentional.

use crate::canonical::{self, CanonicalizeOptions};
use crate::channel::{Channel, ChannelSummary};
use crate::provenance::ProvenanceTracker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A canonical-name collision observed while building the mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collision {
    pub canonical: String,
    /// The raw name that was overwritten.
    pub displaced: String,
    /// The raw name that now owns the canonical key.
    pub kept: String,
}

/// Result of flattening the curated list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingOutcome {
    /// `canonical → raw`; each canonical key maps to exactly one raw name.
    pub mapping: BTreeMap<String, String>,
    /// Collisions in curated-list processing order. Not fatal, but must be
    /// observable.
    pub collisions: Vec<Collision>,
}

/// Per-channel grouping of mappings destined for a sync push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSyncPlan {
    pub channel_id: i64,
    pub channel: ChannelSummary,
    /// Entries whose raw name's provenance includes this channel.
    pub mappings: BTreeMap<String, String>,
}

/// Build the flat canonical mapping from the curated list.
///
/// Each entry is canonicalized with its first-recorded channel label in
/// scope (the vendor-rules stage may consult it). Later duplicates of the
/// same canonical name overwrite earlier ones; an empty curated list yields
/// an empty mapping, which callers treat as "nothing to synchronize".
#[must_use]
pub fn build_mapping(
    curated: &[String],
    opts: &CanonicalizeOptions,
    tracker: &ProvenanceTracker,
) -> MappingOutcome {
    let mut outcome = MappingOutcome::default();
    for raw in curated {
        let label = tracker
            .first_record(raw)
            .map(|record| record.channel_label.clone());
        let canonical = canonical::canonicalize(raw, opts, label.as_deref());
        if let Some(previous) = outcome.mapping.insert(canonical.clone(), raw.clone()) {
            if previous != *raw {
                warn!(
                    canonical = %canonical,
                    displaced = %previous,
                    kept = %raw,
                    "canonical name collision; last write wins"
                );
                outcome.collisions.push(Collision {
                    canonical,
                    displaced: previous,
                    kept: raw.clone(),
                });
            }
        }
    }
    debug!(
        entries = curated.len(),
        mapped = outcome.mapping.len(),
        collisions = outcome.collisions.len(),
        "built canonical mapping"
    );
    outcome
}

/// Group the flat mapping into per-channel sync plans.
///
/// Raw names with no provenance are skipped with a warning; one bad entry
/// must not block reconciliation of the rest.
#[must_use]
pub fn group_by_channel(
    mapping: &BTreeMap<String, String>,
    tracker: &ProvenanceTracker,
    channels: &[Channel],
) -> BTreeMap<i64, ChannelSyncPlan> {
    let summaries: BTreeMap<i64, ChannelSummary> =
        channels.iter().map(|c| (c.id, c.summary())).collect();

    let mut plans: BTreeMap<i64, ChannelSyncPlan> = BTreeMap::new();
    for (canonical, raw) in mapping {
        let channel_ids = tracker.channels_for(raw);
        if channel_ids.is_empty() {
            warn!(
                raw = %raw,
                canonical = %canonical,
                "raw model name has no provenance; skipping from sync plans"
            );
            continue;
        }
        for channel_id in channel_ids {
            let plan = plans.entry(channel_id).or_insert_with(|| ChannelSyncPlan {
                channel_id,
                channel: summaries.get(&channel_id).cloned().unwrap_or_else(|| {
                    // The channel list can be stale relative to provenance;
                    // keep the plan with a placeholder summary.
                    ChannelSummary {
                        id: channel_id,
                        name: format!("channel {channel_id}"),
                        kind: 0,
                        status: crate::channel::ChannelStatus::Unknown,
                    }
                }),
                mappings: BTreeMap::new(),
            });
            plan.mappings.insert(canonical.clone(), raw.clone());
        }
    }
    plans
}
