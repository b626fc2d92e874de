//! relaymap — reconciles the AI-model catalogs advertised by relay
//! channels into one canonical model mapping.
//!
//! A relay server aggregates many upstream channels, each advertising its
//! own decorated model names (`[Az] gpt-4o-2024-08-06`, `vendor/claude-3.5`,
//! `deepseek-chat-官方`). This crate normalizes those names into canonical
//! identifiers, remembers where every curated name came from, plans the
//! per-channel mapping updates a sync would apply, and fetches catalogs from
//! many channels concurrently with retry and adaptive batching.
//!
//! The main pieces:
//!
//! - [`canonical`] — the staged name canonicalization pipeline.
//! - [`provenance`] — which channel(s) each curated name came from.
//! - [`planner`] — canonical→raw mapping construction and per-channel
//!   sync plans.
//! - [`fetch`] — the concurrent fetch orchestrator.
//! - [`channel`], [`api`], [`config`], [`store`], [`error`] — the channel
//!   model, the relay-server collaborator seam, configuration, local
//!   persistence and the error taxonomy.

pub mod api;
pub mod canonical;
pub mod channel;
pub mod config;
pub mod error;
pub mod fetch;
pub mod planner;
pub mod provenance;
pub mod store;

pub use canonical::{CanonicalizeOptions, canonicalize};
pub use channel::{CatalogState, Channel, ChannelStatus};
pub use error::{Error, Result};
pub use fetch::{CatalogSource, FetchOrchestrator, RetryPolicy};
pub use planner::{ChannelSyncPlan, MappingOutcome, build_mapping, group_by_channel};
pub use provenance::{ProvenanceTracker, SourceKind};
