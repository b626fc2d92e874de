#![forbid(unsafe_code)]

//! Offline `relaymap` binary: canonicalize names and emit reconciliation
//! plans from locally persisted state. Network sync runs elsewhere; this
//! tool never talks to a relay server.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaymap::canonical::CanonicalizeOptions;
use relaymap::planner::{self, MappingOutcome};
use relaymap::provenance::ProvenanceTracker;
use relaymap::store::{self, KvStore};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "relaymap")]
#[command(about = "Canonicalize relay model names and plan catalog reconciliation")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run names through the canonicalization pipeline and print the results.
    Canonicalize {
        /// Raw model names to canonicalize.
        #[arg(required = true)]
        names: Vec<String>,
        /// Keep the `vendor/` namespace prefix.
        #[arg(long)]
        keep_namespace: bool,
        /// Keep date snapshot tokens.
        #[arg(long)]
        keep_date: bool,
        /// Keep version suffixes.
        #[arg(long)]
        keep_version: bool,
        /// Enable vendor-specific rewrite rules.
        #[arg(long)]
        vendor_rules: bool,
        /// Channel label consulted by the vendor rules (Azure detection).
        #[arg(long)]
        channel_label: Option<String>,
        /// Emit a raw→canonical JSON object instead of plain lines.
        #[arg(long)]
        json: bool,
    },
    /// Build the canonical mapping and per-channel sync plans from the
    /// local store and print them as JSON.
    Reconcile {
        /// Store file path (defaults to the per-user data directory).
        #[arg(long)]
        store: Option<PathBuf>,
        /// Pretty-print the JSON output.
        #[arg(long)]
        pretty: bool,
        /// Fail on curated names without channel provenance instead of
        /// skipping them with a warning.
        #[arg(long)]
        strict: bool,
    },
}

fn main() {
    if let Err(err) = main_impl() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_impl() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Command::Canonicalize {
            names,
            keep_namespace,
            keep_date,
            keep_version,
            vendor_rules,
            channel_label,
            json,
        } => {
            let opts = CanonicalizeOptions {
                keep_namespace,
                keep_date,
                keep_version,
                vendor_rules,
            };
            run_canonicalize(&names, &opts, channel_label.as_deref(), json)
        }
        Command::Reconcile {
            store,
            pretty,
            strict,
        } => run_reconcile(store, pretty, strict),
    }
}

fn run_canonicalize(
    names: &[String],
    opts: &CanonicalizeOptions,
    channel_label: Option<&str>,
    json: bool,
) -> Result<()> {
    if json {
        let mapping: HashMap<&str, String> = names
            .iter()
            .map(|raw| {
                (
                    raw.as_str(),
                    relaymap::canonicalize(raw, opts, channel_label),
                )
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&mapping)?);
    } else {
        for raw in names {
            println!("{}", relaymap::canonicalize(raw, opts, channel_label));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileOutput {
    #[serde(flatten)]
    mapping: MappingOutcome,
    plans: Vec<relaymap::planner::ChannelSyncPlan>,
}

fn run_reconcile(store_path: Option<PathBuf>, pretty: bool, strict: bool) -> Result<()> {
    let path = store_path.unwrap_or_else(store::default_store_path);
    let kv = KvStore::open(&path)
        .with_context(|| format!("open store at {}", path.display()))?;

    let curated: Vec<String> = kv
        .get(store::keys::CURATED_LIST)
        .context("read curated model list")?
        .unwrap_or_default();
    let records: HashMap<String, String> = kv
        .get(store::keys::PROVENANCE_RECORDS)
        .context("read provenance records")?
        .unwrap_or_default();
    let tracker = ProvenanceTracker::from_records_table(&records);

    if strict {
        for raw in &curated {
            tracker
                .require_channels(raw)
                .with_context(|| format!("curated entry '{raw}'"))?;
        }
    }

    let config: Option<relaymap::config::ReconcileConfig> = kv
        .get(store::keys::CONNECTION_CONFIG)
        .context("read connection config")?;
    let opts = config.map(|c| c.canonicalize).unwrap_or_default();

    let outcome = planner::build_mapping(&curated, &opts, &tracker);
    // The channel list is only known after a live fetch; offline plans fall
    // back to placeholder channel summaries.
    let plans = planner::group_by_channel(&outcome.mapping, &tracker, &[]);

    let output = ReconcileOutput {
        mapping: outcome,
        plans: plans.into_values().collect(),
    };
    let rendered = if pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{rendered}");
    Ok(())
}
