//! Name normalization shared by table resolution and alias generation.
//!
//! A name is lowercased, stripped of a warehouse layer prefix
//! (`brz_lnd_`, `slv_`, ...), split on anything that is not a letter or
//! digit, and each token singularized.

use std::collections::BTreeSet;

use inflector::Inflector;

/// Layer prefixes stripped before tokenizing, unless configured otherwise.
pub const DEFAULT_STRIP_PREFIXES: &[&str] = &["brz_lnd_", "brz_", "slv_", "gld_", "stg_", "tbl_"];

/// Irregular plurals that inflector doesn't handle well for table names.
static IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("analysis", "analyses"),
    ("basis", "bases"),
    ("criterion", "criteria"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
    ("status", "statuses"),
];

/// Singularize a word, handling irregulars first then falling back to inflector.
pub fn singularize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }

    let lower = word.to_lowercase();

    for (singular, plural) in IRREGULAR_PLURALS {
        if lower == *plural || lower == *singular {
            return singular.to_string();
        }
    }

    // Short tokens are usually codes (gpu, ops, sku), not plurals
    if lower.len() <= 3 {
        return lower;
    }

    lower.to_singular()
}

/// Remove the longest matching layer prefix. Prefixes match case-insensitively.
pub fn strip_prefix<'a>(lower: &'a str, prefixes: &[String]) -> &'a str {
    prefixes
        .iter()
        .map(|p| p.to_lowercase())
        .filter(|p| !p.is_empty() && lower.starts_with(p.as_str()) && lower.len() > p.len())
        .map(|p| p.len())
        .max()
        .map(|len| &lower[len..])
        .unwrap_or(lower)
}

/// Normalized tokens of a name, in order.
pub fn tokens(name: &str, prefixes: &[String]) -> Vec<String> {
    let lower = name.trim().to_lowercase();
    let stripped = strip_prefix(&lower, prefixes);
    stripped
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(singularize)
        .collect()
}

/// Normalized tokens as a set.
pub fn token_set(name: &str, prefixes: &[String]) -> BTreeSet<String> {
    tokens(name, prefixes).into_iter().collect()
}

/// First letter of every token (`material_master` -> `mm`).
pub fn initials(tokens: &[String]) -> String {
    tokens.iter().filter_map(|t| t.chars().next()).collect()
}

/// Jaccard index of two token sets; 0.0 when both are empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Similarity in [0, 1]: the larger of token Jaccard and normalized
/// Levenshtein over the normalized, underscore-joined names.
pub fn similarity(term: &str, name: &str, prefixes: &[String]) -> f64 {
    let a = tokens(term, prefixes);
    let b = tokens(name, prefixes);
    let set_a: BTreeSet<String> = a.iter().cloned().collect();
    let set_b: BTreeSet<String> = b.iter().cloned().collect();
    let lev = strsim::normalized_levenshtein(&a.join("_"), &b.join("_"));
    jaccard(&set_a, &set_b).max(lev)
}

pub fn default_prefixes() -> Vec<String> {
    DEFAULT_STRIP_PREFIXES.iter().map(|p| p.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_strip_prefix_and_singularize() {
        let p = default_prefixes();
        assert_eq!(tokens("BRZ_LND_ORDERS_HISTORY", &p), vec!["order", "history"]);
        assert_eq!(tokens("slv-customers", &p), vec!["customer"]);
        assert_eq!(tokens("RBP_GPU", &p), vec!["rbp", "gpu"]);
    }

    #[test]
    fn test_uppercase_prefixes_match() {
        let upper = vec!["BRZ_LND_".to_string()];
        let lower = vec!["brz_lnd_".to_string()];
        assert_eq!(tokens("BRZ_LND_ORDERS", &upper), tokens("BRZ_LND_ORDERS", &lower));
        assert_eq!(tokens("BRZ_LND_ORDERS", &upper), vec!["order"]);
        assert_eq!(strip_prefix("rbp_gpu", &["RBP_".to_string()]), "gpu");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let p = default_prefixes();
        assert_eq!(strip_prefix("brz_lnd_sales", &p), "sales");
        assert_eq!(strip_prefix("brz_sales", &p), "sales");
        // a bare prefix is a name, not a prefix
        assert_eq!(strip_prefix("stg_", &p), "stg_");
    }

    #[test]
    fn test_singularize_irregular_and_codes() {
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("ops"), "ops");
        assert_eq!(singularize("status"), "status");
    }

    #[test]
    fn test_initials() {
        let p = default_prefixes();
        assert_eq!(initials(&tokens("MATERIAL_MASTER", &p)), "mm");
    }

    #[test]
    fn test_similarity_bounds() {
        let p = default_prefixes();
        assert_eq!(similarity("orders", "ORDERS", &p), 1.0);
        let s = similarity("materail master", "MATERIAL_MASTER", &p);
        assert!(s > 0.6 && s < 1.0, "{}", s);
        assert!(similarity("xyz", "MATERIAL_MASTER", &p) < 0.3);
    }
}
