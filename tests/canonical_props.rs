//! Property tests for the canonicalization pipeline.

use proptest::prelude::*;
use relaymap::canonical::{CanonicalizeOptions, canonicalize};

fn canon(raw: &str) -> String {
    canonicalize(raw, &CanonicalizeOptions::default(), None)
}

proptest! {
    /// Canonicalizing twice never changes the result again.
    #[test]
    fn canonicalize_is_idempotent(raw in ".{0,40}") {
        let once = canon(&raw);
        prop_assert_eq!(canon(&once), once.clone());
    }

    /// The canonical name is never empty for any non-empty input.
    #[test]
    fn canonicalize_never_returns_empty(raw in ".{1,40}") {
        prop_assert!(!canon(&raw).is_empty());
    }

    /// Idempotence and never-empty hold for every flag combination.
    #[test]
    fn properties_hold_for_all_flag_combinations(
        raw in "[\\[\\]()【】a-z0-9./|@ _-]{1,30}",
        keep_namespace: bool,
        keep_date: bool,
        keep_version: bool,
        vendor_rules: bool,
    ) {
        let opts = CanonicalizeOptions {
            keep_namespace,
            keep_date,
            keep_version,
            vendor_rules,
        };
        let once = canonicalize(&raw, &opts, None);
        prop_assert!(!once.is_empty());
        prop_assert_eq!(canonicalize(&once, &opts, None), once.clone());
    }

    /// A date wedged between the base name and a stage marker reorders
    /// before stripping, so both spellings converge.
    #[test]
    fn dated_stage_suffix_converges_with_plain_stage_suffix(base in "[a-z][a-z0-9]{0,7}") {
        prop_assert_eq!(
            canon(&format!("{base}-20240115-preview")),
            canon(&format!("{base}-preview"))
        );
    }
}
