//! Model-name canonicalization pipeline.
//!
//! Channels advertise the same logical model under inconsistently decorated
//! names: date stamps (`gpt-4-0125-preview`), version/stage suffixes
//! (`-v1.2`, `-beta`, `-latest`), vendor prefixes (`[Azure] ...`,
//! `openai:...`), namespaces (`org/model`) and channel tags (`-渠道3`).
//! [`canonicalize`] reduces a raw name to the canonical identifier used as
//! the mapping key.
//!
//! The pipeline is an ordered list of pure stage functions, applied in a
//! fixed order. Ordering matters in two places:
//!
//! - the date/stage reorder rule must run before stage suffixes are
//!   stripped, otherwise `model-20240115-preview` and `model-preview`
//!   canonicalize differently;
//! - the plain date strip re-runs after version/stage stripping, because
//!   removing a stage token can newly expose a trailing date.
//!
//! Guarantees: deterministic, never panics, never returns an empty string
//! (a name consisting only of decorations falls back to the raw input), and
//! idempotent for a fixed config.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::trace;

/// Flags controlling which pipeline stages run.
///
/// All default to the aggressive setting (strip everything).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CanonicalizeOptions {
    /// Keep `org/` namespace prefixes instead of taking the last segment.
    pub keep_namespace: bool,
    /// Keep trailing date stamps.
    pub keep_date: bool,
    /// Keep trailing version/stage/provider suffixes.
    pub keep_version: bool,
    /// Apply vendor-specific reorder rules (may consult the channel label).
    /// Off unless explicitly enabled.
    pub vendor_rules: bool,
}

struct StageCtx<'a> {
    opts: &'a CanonicalizeOptions,
    channel_label: Option<&'a str>,
}

type Stage = fn(&str, &StageCtx) -> String;

/// The fixed stage order. Names are for trace logging only.
const PIPELINE: &[(&str, Stage)] = &[
    ("strip-leading-decorations", strip_leading_decorations),
    ("strip-namespace", strip_namespace),
    ("strip-leading-identifiers", strip_leading_identifiers),
    ("strip-trailing-decorations", strip_trailing_decorations),
    ("reorder-date-before-stage", reorder_date_before_stage),
    ("strip-version-stage-provider", strip_version_stage_provider),
    ("strip-trailing-date", strip_trailing_date),
    ("vendor-rules", apply_vendor_rules),
    ("collapse-separators", collapse_separators),
];

/// Canonicalize a raw model name.
///
/// `channel_label` is only consulted by the vendor-rules stage; pass `None`
/// when no channel context is available.
#[must_use]
pub fn canonicalize(
    raw: &str,
    opts: &CanonicalizeOptions,
    channel_label: Option<&str>,
) -> String {
    let ctx = StageCtx {
        opts,
        channel_label,
    };
    // Run the pipeline to a fixpoint. A single pass is not idempotent on its
    // own (stage 3 strips one `token:` segment per pass); repeating until
    // stable keeps `canonicalize(canonicalize(x)) == canonicalize(x)`.
    // Terminates: every rewrite shrinks the name except the one-shot Azure
    // rule, whose output no longer matches its pattern.
    let mut name = raw.trim().to_string();
    loop {
        let before = name.clone();
        for (stage_name, stage) in PIPELINE {
            let next = stage(&name, &ctx);
            if next != name {
                trace!(stage = stage_name, before = %name, after = %next, "canonicalize stage");
                name = next;
            }
        }
        if name == before || name.is_empty() {
            break;
        }
    }
    if name.is_empty() {
        // A name that was nothing but decorations. Keep the raw form rather
        // than produce an empty canonical key.
        raw.to_string()
    } else {
        name
    }
}

// ── Stage 1: leading bracket/paren decorations ──────────────────────────────

fn leading_decoration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\[[^\]]*\]|【[^】]*】|\([^)]*\)|（[^）]*）|<[^>]*>)\s*")
            .expect("leading decoration regex")
    })
}

fn strip_leading_decorations(name: &str, _ctx: &StageCtx) -> String {
    let mut current = Cow::Borrowed(name);
    loop {
        let stripped = leading_decoration_regex().replace(&current, "");
        if stripped == current {
            return current.into_owned();
        }
        current = Cow::Owned(stripped.into_owned());
    }
}

// ── Stage 2: namespace ──────────────────────────────────────────────────────

fn strip_namespace(name: &str, ctx: &StageCtx) -> String {
    if ctx.opts.keep_namespace {
        return name.to_string();
    }
    match name.rsplit('/').next() {
        Some(last) if !last.is_empty() => last.to_string(),
        _ => name.to_string(),
    }
}

// ── Stage 3: leading identifiers (@run, `token:`/`token|` prefix) ───────────

fn leading_identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w.\-]{2,32}[:|]").expect("leading identifier regex"))
}

fn strip_leading_identifiers(name: &str, _ctx: &StageCtx) -> String {
    let name = name.trim_start_matches('@');
    leading_identifier_regex().replace(name, "").into_owned()
}

// ── Stage 4: trailing decorations and channel tags ──────────────────────────

fn trailing_decoration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s*(?:\[[^\]]*\]|【[^】]*】|\([^)]*\)|（[^）]*）|<[^>]*>)\s*$")
            .expect("trailing decoration regex")
    })
}

fn channel_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-_ ]?渠道\s?\d+$").expect("channel tag regex"))
}

fn strip_trailing_decorations(name: &str, _ctx: &StageCtx) -> String {
    let mut current = name.to_string();
    loop {
        let after_brackets = trailing_decoration_regex().replace(&current, "");
        let after_tags = channel_tag_regex().replace(&after_brackets, "");
        if after_tags == current {
            return current;
        }
        current = after_tags.into_owned();
    }
}

// ── Stage 5: date immediately followed by a stage token ─────────────────────

// Date token shapes: YYYYMMDD, YYYY-MM-DD (separators -, _ or .), the short
// MMDD form vendors use for snapshots (0125, 1106), and a bare year.
const DATE_TOKEN: &str = r"(?:20\d{2}[-_.]?(?:0[1-9]|1[0-2])[-_.]?(?:[0-2]\d|3[01])|(?:0[1-9]|1[0-2])(?:[0-2]\d|3[01])|20\d{2})";

fn date_before_stage_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"(?i)[-_.]{DATE_TOKEN}[-_.](preview|beta|alpha|rc\d*|experimental|latest|stable|instruct|chat)$"
        );
        Regex::new(&pattern).expect("date-before-stage regex")
    })
}

fn reorder_date_before_stage(name: &str, ctx: &StageCtx) -> String {
    if ctx.opts.keep_date {
        return name.to_string();
    }
    // The stage token survives, the date does not.
    let reordered = date_before_stage_regex().replace(name, "-$1");
    if reordered != name {
        return reordered.into_owned();
    }
    plain_strip_trailing_date(name)
}

// ── Stage 6: version / stage / provider suffixes ────────────────────────────

fn stage_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[-_.](?:preview|beta|alpha|rc\d*|experimental|latest|stable)$")
            .expect("stage suffix regex")
    })
}

fn version_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Lowercase `v` only: uppercase V-suffixes (DeepSeek-V3) are part of
        // the model identity, not a version tag.
        Regex::new(r"[-_.](?:v\d+(?:\.\d+){0,3}|(?i:instruct|chat|base|sft|rlhf))$")
            .expect("version suffix regex")
    })
}

fn provider_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:[-_.](?:official|internal|dev|test)|[-_ ]*\p{Han}{1,4})$")
            .expect("provider suffix regex")
    })
}

fn strip_version_stage_provider(name: &str, ctx: &StageCtx) -> String {
    if ctx.opts.keep_version {
        return name.to_string();
    }
    // Stacked suffixes ("model-v2-beta-official") need the whole cycle to
    // repeat until nothing matches.
    let mut current = name.to_string();
    loop {
        let mut next = stage_suffix_regex().replace(&current, "").into_owned();
        next = version_suffix_regex().replace(&next, "").into_owned();
        next = provider_suffix_regex().replace(&next, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

// ── Stage 7: second date pass ───────────────────────────────────────────────

fn trailing_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"[-_.]{DATE_TOKEN}$");
        Regex::new(&pattern).expect("trailing date regex")
    })
}

fn plain_strip_trailing_date(name: &str) -> String {
    let mut current = Cow::Borrowed(name);
    loop {
        let stripped = trailing_date_regex().replace(&current, "");
        if stripped == current {
            return current.into_owned();
        }
        current = Cow::Owned(stripped.into_owned());
    }
}

fn strip_trailing_date(name: &str, ctx: &StageCtx) -> String {
    if ctx.opts.keep_date {
        return name.to_string();
    }
    // Stripping a stage token in the previous stage can expose a date that
    // was not trailing before.
    plain_strip_trailing_date(name)
}

// ── Stage 8: vendor-specific rules (opt-in) ─────────────────────────────────

fn claude_variant_first_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^claude-(opus|sonnet|haiku)-(\d+(?:[.-]\d+)?)$")
            .expect("claude variant-first regex")
    })
}

fn azure_gpt35_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bgpt-35\b").expect("azure gpt-35 regex"))
}

fn apply_vendor_rules(name: &str, ctx: &StageCtx) -> String {
    if !ctx.opts.vendor_rules {
        return name.to_string();
    }
    // Anthropic ships both orders ("claude-3-opus", "claude-opus-3");
    // normalize to the version-first form.
    let mut result = claude_variant_first_regex()
        .replace(name, "claude-$2-$1")
        .into_owned();
    // Azure deployments drop the dot from gpt-3.5 model names.
    let label_is_azure = ctx
        .channel_label
        .is_some_and(|label| label.to_ascii_lowercase().contains("azure"));
    if label_is_azure {
        result = azure_gpt35_regex().replace_all(&result, "gpt-3.5").into_owned();
    }
    result
}

// ── Stage 9: separator collapse and trim ────────────────────────────────────

fn separator_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([-_ ])[-_ ]+").expect("separator run regex"))
}

fn collapse_separators(name: &str, _ctx: &StageCtx) -> String {
    let collapsed = separator_run_regex().replace_all(name, "$1");
    // Trim whitespace together with separators and quotes: stripping a quote
    // can expose whitespace (and vice versa), and leaving either behind
    // breaks idempotence.
    collapsed
        .trim_matches(|c: char| {
            c.is_whitespace()
                || matches!(
                    c,
                    '-' | '_' | '"' | '\'' | '\u{201c}' | '\u{201d}' | '\u{2018}' | '\u{2019}'
                )
        })
        .to_string()
}
