//! Reconciliation rules: SQL shape across dialects and runs against SQLite.

use std::sync::Arc;

use linkql::executor::{ExecutionConfig, QueryExecutor, SqliteConnection};
use linkql::reconcile::{
    JoinCondition, KpiConfig, KpiReport, ReconcileError, ReconciliationRule, RuleEngine,
    RuleQueries,
};
use linkql::sql::Dialect;

const LEGACY: &str = r#"{
    "name": "gpu_vs_ops",
    "source_table": "RBP_GPU",
    "target_table": "OPS_EXCEL_GPU",
    "source_columns": ["Material"],
    "target_columns": ["PLANNING_SKU"],
    "schema": "dbo"
}"#;

const LEGACY_WITH_EMPTY_FIELDS: &str = r#"{
    "name": "gpu_vs_ops",
    "source_table": "RBP_GPU",
    "target_table": "OPS_EXCEL_GPU",
    "source_columns": ["Material"],
    "target_columns": ["PLANNING_SKU"],
    "join_tables": [],
    "join_conditions": [],
    "join_order": [],
    "schema": "dbo"
}"#;

fn all_sql(q: &RuleQueries, dialect: Dialect) -> Vec<String> {
    let mut out: Vec<String> = [
        &q.matched,
        &q.unmatched_source,
        &q.unmatched_target,
        &q.source_count,
        &q.target_count,
        &q.matched_count,
        &q.unmatched_source_count,
        &q.unmatched_target_count,
    ]
    .iter()
    .map(|query| query.to_sql(dialect))
    .collect();
    out.extend(q.inactive_count.iter().map(|query| query.to_sql(dialect)));
    out
}

#[test]
fn test_two_table_rule_round_trip() {
    let absent: ReconciliationRule = serde_json::from_str(LEGACY).unwrap();
    let empty: ReconciliationRule = serde_json::from_str(LEGACY_WITH_EMPTY_FIELDS).unwrap();
    assert_ne!(absent, empty);

    for dialect in Dialect::ALL {
        let a = absent.plan().unwrap().queries(dialect, Some(100)).unwrap();
        let b = empty.plan().unwrap().queries(dialect, Some(100)).unwrap();
        assert_eq!(all_sql(&a, dialect), all_sql(&b, dialect), "{dialect}");
    }

    let sql = absent.plan().unwrap().matched_sql(Dialect::TSql, Some(100)).unwrap();
    assert!(sql.starts_with("SELECT TOP 100"));
    assert!(sql.contains("FROM [dbo].[RBP_GPU] AS [s]\nINNER JOIN [dbo].[OPS_EXCEL_GPU] AS [t] ON [s].[Material] = [t].[PLANNING_SKU]"));
}

#[test]
fn test_rule_serializes_without_absent_fields() {
    let rule: ReconciliationRule = serde_json::from_str(LEGACY).unwrap();
    let json = serde_json::to_value(&rule).unwrap();
    assert!(json.get("join_conditions").is_none());
    let back: ReconciliationRule = serde_json::from_value(json).unwrap();
    assert_eq!(back, rule);
}

fn chain_db() -> SqliteConnection {
    let db = SqliteConnection::open_in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE gpu (material TEXT, plant TEXT);
         CREATE TABLE ops (sku TEXT, material TEXT);
         CREATE TABLE mm (material TEXT, planner TEXT);
         INSERT INTO gpu VALUES ('A', 'P1'), ('B', 'P1'), ('C', 'P2');
         INSERT INTO ops VALUES ('A', 'mA'), ('B', 'mB'), ('Z', 'mZ');
         INSERT INTO mm VALUES ('mA', 'ann'), ('mZ', 'zed');",
    )
    .unwrap();
    db
}

fn chain_rule() -> ReconciliationRule {
    let mut rule = ReconciliationRule::two_table("gpu_to_mm", "gpu", &[], "mm", &[]);
    rule.join_order = Some(vec!["gpu".into(), "ops".into(), "mm".into()]);
    rule.join_conditions = Some(vec![
        JoinCondition::new("gpu", "material", "ops", "sku"),
        JoinCondition::new("ops", "material", "mm", "material"),
    ]);
    rule.confidence = 0.9;
    rule
}

fn engine(db: SqliteConnection) -> RuleEngine {
    RuleEngine::new(QueryExecutor::new(Arc::new(db), ExecutionConfig::default()))
}

#[tokio::test]
async fn test_multi_table_rule_counts() {
    let result = engine(chain_db()).execute(&chain_rule()).await.unwrap();

    assert_eq!(result.counts.source_total, 3);
    assert_eq!(result.counts.target_total, 2);
    assert_eq!(result.counts.matched, 1);
    assert_eq!(result.counts.unmatched_source, 2);
    assert_eq!(result.counts.unmatched_target, 1);
    assert_eq!(result.counts.inactive, None);

    assert_eq!(
        result.matched_sample.columns,
        vec!["material", "plant", "sku", "material", "material", "planner"]
    );
    assert_eq!(result.matched_sample.rows.len(), 1);
    assert_eq!(result.unmatched_target_sample.rows[0][1], serde_json::json!("zed"));
}

#[tokio::test]
async fn test_filters_restrict_counts() {
    let mut rule = chain_rule();
    rule.filter_conditions = Some(vec![serde_json::from_value(serde_json::json!({
        "table": "gpu", "column": "plant", "op": "eq", "value": "P1"
    }))
    .unwrap()]);
    let result = engine(chain_db()).execute(&rule).await.unwrap();
    assert_eq!(result.counts.source_total, 2);
    assert_eq!(result.counts.matched, 1);
    assert_eq!(result.counts.unmatched_source, 1);
}

#[tokio::test]
async fn test_batch_kpis() {
    let db = chain_db();
    let direct = ReconciliationRule::two_table("gpu_ops", "gpu", &["material"], "ops", &["sku"]);
    let rules = vec![chain_rule(), direct];

    let results: Vec<_> = engine(db)
        .execute_all(&rules)
        .await
        .into_iter()
        .collect::<Result<_, ReconcileError>>()
        .unwrap();
    assert_eq!(results[0].rule, "gpu_to_mm");
    assert_eq!(results[1].counts.matched, 2);

    let report = KpiReport::from_results(&results, &KpiConfig::default());
    assert_eq!(report.rules, 2);
    assert_eq!(report.source_total, 6);
    assert_eq!(report.matched_total, 3);
    assert_eq!(report.coverage_rate, 0.5);
    // (0.9 * 1 + 1.0 * 2) / 3
    assert!((report.confidence_score - 2.9 / 3.0).abs() < 1e-9);
    assert_eq!(report.rule_utilization, 1.0);
    assert!(report.efficiency_index > 0.0 && report.efficiency_index <= 1.0);
}

#[test]
fn test_full_join_only_where_supported() {
    let mut rule: ReconciliationRule = serde_json::from_str(LEGACY).unwrap();
    rule.join_types = Some([("OPS_EXCEL_GPU".to_string(), "FULL OUTER JOIN".to_string())].into());
    let plan = rule.plan().unwrap();
    let sql = plan.matched_sql(Dialect::Postgres, None).unwrap();
    assert!(sql.contains("FULL OUTER JOIN") || sql.contains("FULL JOIN"));
    assert!(plan.matched_sql(Dialect::MySql, None).is_err());
}

#[tokio::test]
async fn test_left_join_sample_matches_count() {
    let mut rule = chain_rule();
    rule.join_types = Some(
        [
            ("ops".to_string(), "left".to_string()),
            ("mm".to_string(), "left outer join".to_string()),
        ]
        .into(),
    );
    let result = engine(chain_db()).execute(&rule).await.unwrap();
    assert_eq!(result.counts.matched, 1);
    assert_eq!(result.matched_sample.rows.len(), 1);
    assert_eq!(result.matched_sample.rows[0][0], serde_json::json!("A"));
}
