//! Table name resolution: business term -> canonical table.
//!
//! Strategies run in order and the first hit wins:
//!
//! 1. exact canonical name
//! 2. case-insensitive name
//! 3. alias (node aliases and the graph-level alias map)
//! 4. normalized tokens (equal sets, unique subset, unique abbreviation)
//! 5. fuzzy similarity above a threshold
//!
//! Resolution is a pure function of the graph snapshot and the term, so
//! resolving the same term twice always yields the same table.

pub mod normalize;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::graph::KnowledgeGraph;

/// Resolver tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum similarity for a fuzzy match.
    pub fuzzy_threshold: f64,
    /// Layer prefixes ignored when comparing normalized names.
    pub strip_prefixes: Vec<String>,
    /// How many candidates a "did you mean" error carries.
    pub max_suggestions: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.6,
            strip_prefixes: normalize::default_prefixes(),
            max_suggestions: 2,
        }
    }
}

/// Which strategy produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    CaseInsensitive,
    Alias,
    Normalized,
    Abbreviation,
    Fuzzy,
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchMethod::Exact => "exact",
            MatchMethod::CaseInsensitive => "case-insensitive",
            MatchMethod::Alias => "alias",
            MatchMethod::Normalized => "normalized",
            MatchMethod::Abbreviation => "abbreviation",
            MatchMethod::Fuzzy => "fuzzy",
        };
        write!(f, "{}", s)
    }
}

/// A resolved table term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub term: String,
    pub table: String,
    pub method: MatchMethod,
    /// 1.0 for exact, case-insensitive and alias hits; similarity otherwise.
    pub score: f64,
}

impl Resolution {
    /// Did the term name the table directly (modulo case)?
    pub fn is_exact(&self) -> bool {
        matches!(self.method, MatchMethod::Exact | MatchMethod::CaseInsensitive)
    }
}

/// Resolves business terms against one graph snapshot.
#[derive(Debug, Clone)]
pub struct TableResolver<'g> {
    graph: &'g KnowledgeGraph,
    config: ResolverConfig,
}

impl<'g> TableResolver<'g> {
    pub fn new(graph: &'g KnowledgeGraph, config: ResolverConfig) -> Self {
        Self { graph, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a term, or `None` when nothing matches.
    pub fn resolve(&self, term: &str) -> Option<Resolution> {
        let term = term.trim();
        if term.is_empty() {
            return None;
        }

        let hit = self
            .exact(term)
            .or_else(|| self.case_insensitive(term))
            .or_else(|| self.alias(term))
            .or_else(|| self.normalized(term))
            .or_else(|| self.fuzzy(term));

        if let Some(r) = &hit {
            debug!(term, table = %r.table, method = %r.method, score = r.score, "resolved table");
        }
        hit
    }

    /// Resolve a term or fail with "did you mean" suggestions.
    pub fn resolve_strict(&self, term: &str) -> PlanResult<Resolution> {
        self.resolve(term).ok_or_else(|| PlanError::TableNotFound {
            term: term.into(),
            suggestions: self.suggestions(term, self.config.max_suggestions),
        })
    }

    /// The `n` most similar table names, best first.
    pub fn suggestions(&self, term: &str, n: usize) -> Vec<String> {
        self.ranked(term)
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .take(n)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn resolution(&self, term: &str, table: &str, method: MatchMethod, score: f64) -> Resolution {
        Resolution {
            term: term.into(),
            table: table.into(),
            method,
            score,
        }
    }

    fn exact(&self, term: &str) -> Option<Resolution> {
        self.graph
            .contains(term)
            .then(|| self.resolution(term, term, MatchMethod::Exact, 1.0))
    }

    fn case_insensitive(&self, term: &str) -> Option<Resolution> {
        let lower = term.to_lowercase();
        self.graph
            .table_names()
            .into_iter()
            .filter(|name| name.to_lowercase() == lower)
            .min()
            .map(|name| self.resolution(term, name, MatchMethod::CaseInsensitive, 1.0))
    }

    fn alias(&self, term: &str) -> Option<Resolution> {
        self.graph
            .alias_target(term)
            .map(|table| self.resolution(term, table, MatchMethod::Alias, 1.0))
    }

    fn normalized(&self, term: &str) -> Option<Resolution> {
        let prefixes = &self.config.strip_prefixes;
        let term_tokens = normalize::tokens(term, prefixes);
        if term_tokens.is_empty() {
            return None;
        }
        let term_set: BTreeSet<String> = term_tokens.iter().cloned().collect();

        let candidates: Vec<(&str, Vec<String>)> = self
            .graph
            .table_names()
            .into_iter()
            .map(|name| (name, normalize::tokens(name, prefixes)))
            .collect();

        // Equal token sets; several hits are ordered like fuzzy ties.
        let mut equal: Vec<&str> = candidates
            .iter()
            .filter(|(_, tokens)| tokens.iter().cloned().collect::<BTreeSet<_>>() == term_set)
            .map(|(name, _)| *name)
            .collect();
        equal.sort_by(|a, b| shortest_then_lexical(a, b));
        if let Some(name) = equal.first() {
            return Some(self.resolution(term, name, MatchMethod::Normalized, 1.0));
        }

        // Term is a subset of exactly one table's tokens
        let subset: Vec<(&str, f64)> = candidates
            .iter()
            .filter_map(|(name, tokens)| {
                let set: BTreeSet<String> = tokens.iter().cloned().collect();
                term_set
                    .is_subset(&set)
                    .then(|| (*name, normalize::jaccard(&term_set, &set)))
            })
            .collect();
        if let [(name, score)] = subset.as_slice() {
            return Some(self.resolution(term, name, MatchMethod::Normalized, *score));
        }

        // Abbreviation: "mm" -> MATERIAL_MASTER
        let compact: String = term_tokens.concat();
        let abbreviated: Vec<&str> = candidates
            .iter()
            .filter(|(_, tokens)| tokens.len() > 1 && normalize::initials(tokens) == compact)
            .map(|(name, _)| *name)
            .collect();
        if let [name] = abbreviated.as_slice() {
            return Some(self.resolution(term, name, MatchMethod::Abbreviation, 0.8));
        }

        None
    }

    fn fuzzy(&self, term: &str) -> Option<Resolution> {
        self.ranked(term)
            .into_iter()
            .next()
            .filter(|(_, score)| *score >= self.config.fuzzy_threshold)
            .map(|(name, score)| self.resolution(term, name, MatchMethod::Fuzzy, score))
    }

    /// Every table with its similarity to `term`: score descending, then
    /// shortest name, then lexical order.
    fn ranked(&self, term: &str) -> Vec<(&'g str, f64)> {
        let prefixes = &self.config.strip_prefixes;
        let mut scored: Vec<(&'g str, f64)> = self
            .graph
            .table_names()
            .into_iter()
            .map(|name| (name, normalize::similarity(term, name, prefixes)))
            .collect();
        scored.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa).then_with(|| shortest_then_lexical(a, b))
        });
        scored
    }
}

fn shortest_then_lexical(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, TableNode};

    fn graph() -> KnowledgeGraph {
        GraphBuilder::new()
            .table(TableNode::new("RBP_GPU").with_columns(&["Material"]))
            .table(TableNode::new("OPS_EXCEL_GPU").with_columns(&["PLANNING_SKU"]))
            .table(
                TableNode::new("MATERIAL_MASTER")
                    .with_columns(&["Material"])
                    .with_alias("item master"),
            )
            .table(TableNode::new("brz_lnd_customer_orders").with_columns(&["id"]))
            .table(TableNode::new("Orders").with_columns(&["id"]))
            .table(TableNode::new("ORDERS_ARCHIVE").with_columns(&["id"]))
            .alias("planning sheet", "OPS_EXCEL_GPU")
            .build()
            .unwrap()
    }

    fn resolver(g: &KnowledgeGraph) -> TableResolver<'_> {
        TableResolver::new(g, ResolverConfig::default())
    }

    #[test]
    fn test_exact() {
        let g = graph();
        let r = resolver(&g).resolve("RBP_GPU").unwrap();
        assert_eq!(r.table, "RBP_GPU");
        assert_eq!(r.method, MatchMethod::Exact);
        assert!(r.is_exact());
    }

    #[test]
    fn test_case_insensitive() {
        let g = graph();
        let r = resolver(&g).resolve("rbp_gpu").unwrap();
        assert_eq!(r.table, "RBP_GPU");
        assert_eq!(r.method, MatchMethod::CaseInsensitive);
        assert!(r.is_exact());
    }

    #[test]
    fn test_alias_on_node_and_document() {
        let g = graph();
        let r = resolver(&g).resolve("Item Master").unwrap();
        assert_eq!((r.table.as_str(), r.method), ("MATERIAL_MASTER", MatchMethod::Alias));
        assert!(!r.is_exact());
        let r = resolver(&g).resolve("planning sheet").unwrap();
        assert_eq!(r.table, "OPS_EXCEL_GPU");
    }

    #[test]
    fn test_normalized_strips_prefix_and_plural() {
        let g = graph();
        let r = resolver(&g).resolve("customer order").unwrap();
        assert_eq!(r.table, "brz_lnd_customer_orders");
        assert_eq!(r.method, MatchMethod::Normalized);
    }

    #[test]
    fn test_uppercase_configured_prefixes() {
        let g = graph();
        let config = ResolverConfig {
            strip_prefixes: vec!["BRZ_LND_".into(), "RBP_".into()],
            ..ResolverConfig::default()
        };
        let res = TableResolver::new(&g, config);

        let r = res.resolve("customer orders").unwrap();
        assert_eq!(r.table, "brz_lnd_customer_orders");
        assert_eq!(r.method, MatchMethod::Normalized);

        let r = res.resolve("gpu").unwrap();
        assert_eq!((r.table.as_str(), r.method), ("RBP_GPU", MatchMethod::Normalized));
    }

    #[test]
    fn test_unique_subset() {
        let g = graph();
        let r = resolver(&g).resolve("excel").unwrap();
        assert_eq!(r.table, "OPS_EXCEL_GPU");
        assert_eq!(r.method, MatchMethod::Normalized);
    }

    #[test]
    fn test_abbreviation() {
        let g = graph();
        let r = resolver(&g).resolve("mm").unwrap();
        assert_eq!(r.table, "MATERIAL_MASTER");
        assert_eq!(r.method, MatchMethod::Abbreviation);
    }

    #[test]
    fn test_fuzzy() {
        let g = graph();
        let r = resolver(&g).resolve("materail mastr").unwrap();
        assert_eq!(r.table, "MATERIAL_MASTER");
        assert_eq!(r.method, MatchMethod::Fuzzy);
        assert!(r.score >= 0.6);
    }

    #[test]
    fn test_idempotent() {
        let g = graph();
        let res = resolver(&g);
        for term in ["gpu master", "order", "materail mastr", "excel", "nothing"] {
            assert_eq!(res.resolve(term), res.resolve(term));
        }
    }

    #[test]
    fn test_strict_failure_carries_two_suggestions() {
        let g = graph();
        let err = resolver(&g).resolve_strict("qqq gpu").unwrap_err();
        match err {
            PlanError::TableNotFound { term, suggestions } => {
                assert_eq!(term, "qqq gpu");
                assert_eq!(suggestions.len(), 2);
                assert_eq!(suggestions[0], "RBP_GPU");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_term() {
        let g = graph();
        assert!(resolver(&g).resolve("  ").is_none());
    }
}
