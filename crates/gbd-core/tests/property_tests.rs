//! # Property-Based Tests
//!
//! Invariants of content hashing, query parsing and catalog round-trips,
//! checked with proptest.

#![allow(clippy::unwrap_used, clippy::panic)]

use gbd_core::hasher::cnf_hash_bytes;
use gbd_core::{Collapse, Contexts, Query, QuerySpec, Session, parse};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

// =============================================================================
// STRATEGIES
// =============================================================================

/// A formula as a list of non-empty clauses over variables 1..20.
fn formula() -> impl Strategy<Value = Vec<Vec<i32>>> {
    let literal = (1i32..20, any::<bool>()).prop_map(|(v, neg)| if neg { -v } else { v });
    vec(vec(literal, 1..5), 1..8)
}

fn render(clauses: &[Vec<i32>], sep: &str, header: bool, comments: bool, trailing: bool) -> String {
    let mut out = String::new();
    if comments {
        out.push_str("c leading comment\n");
    }
    if header {
        out.push_str(&format!("p cnf 20 {}\n", clauses.len()));
    }
    for (i, clause) in clauses.iter().enumerate() {
        for lit in clause {
            out.push_str(&lit.to_string());
            out.push_str(sep);
        }
        let last = i + 1 == clauses.len();
        if !(last && !trailing) {
            out.push('0');
        }
        out.push('\n');
        if comments && !last {
            out.push_str("c between clauses\n");
        }
    }
    out
}

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{1,8}".prop_filter("reserved", |s| {
        !matches!(
            s.as_str(),
            "and" | "or" | "like" | "unlike" | "hash" | "local" | "value" | "filename"
        )
    })
}

fn word() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,8}".prop_filter("keyword", |s| {
        !matches!(s.as_str(), "and" | "or" | "like" | "unlike")
    })
}

// =============================================================================
// HASH NORMALIZATION
// =============================================================================

proptest! {
    /// Comments, headers, spacing and the final `0` never change the hash.
    #[test]
    fn formatting_is_normalized(
        clauses in formula(),
        header in any::<bool>(),
        comments in any::<bool>(),
        trailing in any::<bool>(),
        sep in prop::sample::select(vec![" ", "  ", "\t", " \t "]),
    ) {
        let canonical = render(&clauses, " ", false, false, true);
        let variant = render(&clauses, sep, header, comments, trailing);
        prop_assert_eq!(
            cnf_hash_bytes(canonical.as_bytes()),
            cnf_hash_bytes(format!("  {variant}\n\n").as_bytes())
        );
    }

    /// Swapping two distinct clauses changes the hash.
    #[test]
    fn clause_order_matters(clauses in formula(), i in 0usize..8, j in 0usize..8) {
        let i = i % clauses.len();
        let j = j % clauses.len();
        prop_assume!(clauses[i] != clauses[j]);
        let mut swapped = clauses.clone();
        swapped.swap(i, j);
        prop_assert_ne!(
            cnf_hash_bytes(render(&clauses, " ", false, false, true).as_bytes()),
            cnf_hash_bytes(render(&swapped, " ", false, false, true).as_bytes())
        );
    }
}

// =============================================================================
// QUERY LANGUAGE
// =============================================================================

proptest! {
    /// `and` binds tighter than `or`.
    #[test]
    fn and_binds_tighter(a in ident(), b in ident(), c in ident(), v in word()) {
        let text = format!("{a} = {v} or {b} = {v} and {c} = {v}");
        let Some(Query::Or(_, right)) = parse(&text).unwrap() else {
            unreachable!("top level is a disjunction")
        };
        prop_assert!(matches!(*right, Query::And(_, _)));
    }

    /// Every identifier of a comparison is reported as a feature.
    #[test]
    fn features_are_collected(a in ident(), b in ident(), n in 0u32..1000) {
        let text = format!("({a} + {b}) / 2 >= {n}");
        let query = parse(&text).unwrap().unwrap();
        let features = query.features();
        prop_assert!(features.contains(&a));
        prop_assert!(features.contains(&b));
    }

    /// A lone `%` outside a like pattern never parses.
    #[test]
    fn percent_requires_like(a in ident(), v in word()) {
        let err = parse(&format!("{a} = %{v}%")).unwrap_err();
        prop_assert_eq!(err.kind(), "ParserError");
    }
}

// =============================================================================
// CATALOG ROUND-TRIP
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// A unique feature returns exactly the stored pairs, with the default
    /// for hashes never set.
    #[test]
    fn unique_values_round_trip(
        values in btree_map("[A-F0-9]{6}", word(), 1..10),
        unset in vec("[G-Z]{6}", 0..4),
    ) {
        let dir = TempDir::new().unwrap();
        let mut session = Session::open(&[dir.path().join("meta.db")], Contexts::builtin()).unwrap();
        session.create_feature("family", Some("unset"), None).unwrap();
        session.create_feature("seen", Some("no"), None).unwrap();
        for (hash, value) in &values {
            session.set_values("family", value, std::slice::from_ref(hash), None).unwrap();
        }
        session.set_values("seen", "yes", &unset, None).unwrap();

        let mut expected: BTreeMap<String, String> = values.clone();
        for hash in &unset {
            expected.entry(hash.clone()).or_insert_with(|| "unset".to_string());
        }
        let result = session
            .query(&QuerySpec::default().resolve(["family"]).collapse(Collapse::None))
            .unwrap();
        let actual: BTreeMap<String, String> = result
            .rows
            .iter()
            .map(|r| (r[0].to_string(), r[1].to_string()))
            .collect();
        prop_assert_eq!(actual, expected);
    }

    /// A multi-valued feature expands with `none` and deduplicates when grouped.
    #[test]
    fn multi_values_round_trip(
        pairs in vec(("[A-C]{2}", "[0-9]{1,3}"), 1..12),
    ) {
        let dir = TempDir::new().unwrap();
        let mut session = Session::open(&[dir.path().join("meta.db")], Contexts::builtin()).unwrap();
        session.create_feature("runtime", None, None).unwrap();
        for (hash, value) in &pairs {
            session.set_values("runtime", value, std::slice::from_ref(hash), None).unwrap();
        }
        let distinct: std::collections::BTreeSet<(String, String)> = pairs.iter().cloned().collect();
        let hashes: std::collections::BTreeSet<&String> = pairs.iter().map(|(h, _)| h).collect();

        let spec = QuerySpec::default().resolve(["runtime"]);
        let expanded = session.query(&spec.clone().collapse(Collapse::None)).unwrap();
        prop_assert_eq!(expanded.len(), distinct.len());
        let grouped = session.query(&spec.collapse(Collapse::GroupConcat)).unwrap();
        prop_assert_eq!(grouped.len(), hashes.len());
    }
}
