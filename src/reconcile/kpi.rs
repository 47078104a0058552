//! KPIs derived from reconciliation results.
//!
//! Everything here is plain arithmetic over counts and timings. A zero
//! denominator yields `0.0` instead of an error or `NaN`.

use serde::{Deserialize, Serialize};

use super::engine::ReconciliationResult;

/// Weights and targets for the efficiency index (`[kpi]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KpiConfig {
    pub match_weight: f64,
    pub utilization_weight: f64,
    pub speed_weight: f64,
    /// A run at or under this duration scores full speed.
    pub target_duration_ms: u64,
}

impl Default for KpiConfig {
    fn default() -> Self {
        Self {
            match_weight: 0.5,
            utilization_weight: 0.3,
            speed_weight: 0.2,
            target_duration_ms: 1000,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

/// Matched source rows over total source rows.
pub fn coverage_rate(matched: u64, total: u64) -> f64 {
    ratio(matched as f64, total as f64)
}

/// Rule confidence averaged over `(confidence, matched)` pairs, weighted
/// by matched rows.
pub fn confidence_score(weighted: impl IntoIterator<Item = (f64, u64)>) -> f64 {
    let (sum, weight) = weighted
        .into_iter()
        .fold((0.0, 0.0), |(sum, weight), (confidence, matched)| {
            (sum + confidence * matched as f64, weight + matched as f64)
        });
    ratio(sum, weight)
}

/// Share of rules that matched at least one row.
pub fn rule_utilization(matched_per_rule: impl IntoIterator<Item = u64>) -> f64 {
    let (used, total) = matched_per_rule
        .into_iter()
        .fold((0u64, 0u64), |(used, total), m| (used + u64::from(m > 0), total + 1));
    ratio(used as f64, total as f64)
}

/// 1.0 at or under the target duration, falling off as `target / elapsed`.
pub fn speed_score(elapsed_ms: u64, target_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        return 1.0;
    }
    ratio(target_ms as f64, elapsed_ms as f64).min(1.0)
}

/// Weighted blend of match rate, rule utilization and speed.
pub fn efficiency_index(match_rate: f64, utilization: f64, speed: f64, config: &KpiConfig) -> f64 {
    let total = config.match_weight + config.utilization_weight + config.speed_weight;
    ratio(
        config.match_weight * match_rate
            + config.utilization_weight * utilization
            + config.speed_weight * speed,
        total,
    )
}

/// KPIs over a batch of rule runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    pub rules: usize,
    pub source_total: u64,
    pub matched_total: u64,
    pub coverage_rate: f64,
    pub confidence_score: f64,
    pub rule_utilization: f64,
    pub speed_score: f64,
    pub efficiency_index: f64,
    pub elapsed_ms: u64,
}

impl KpiReport {
    pub fn from_results(results: &[ReconciliationResult], config: &KpiConfig) -> Self {
        let source_total: u64 = results.iter().map(|r| r.counts.source_total).sum();
        let matched_total: u64 = results.iter().map(|r| r.counts.matched).sum();
        let elapsed_ms: u64 = results.iter().map(|r| r.elapsed_ms).sum();

        let coverage = coverage_rate(matched_total, source_total);
        let utilization = rule_utilization(results.iter().map(|r| r.counts.matched));
        // average per-rule speed; an empty batch has no speed to speak of
        let speed = ratio(
            results
                .iter()
                .map(|r| speed_score(r.elapsed_ms, config.target_duration_ms))
                .sum(),
            results.len() as f64,
        );

        Self {
            rules: results.len(),
            source_total,
            matched_total,
            coverage_rate: coverage,
            confidence_score: confidence_score(
                results.iter().map(|r| (r.rule_confidence, r.counts.matched)),
            ),
            rule_utilization: utilization,
            speed_score: speed,
            efficiency_index: efficiency_index(coverage, utilization, speed, config),
            elapsed_ms,
        }
    }
}
