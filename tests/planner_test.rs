//! End-to-end planning tests over a graph loaded from its JSON document.

use std::sync::Arc;

use linkql::error::PlanError;
use linkql::graph::{GraphDocument, GraphStore, JsonGraphProvider, KnowledgeGraph, PathScoring};
use linkql::intent::{ColumnPair, Operation, PartialIntent, RuleBasedParser};
use linkql::planner::{Planner, PlannerConfig};
use linkql::resolve::ResolverConfig;
use linkql::sql::Dialect;

const GRAPH_JSON: &str = r#"{
    "tables": [
        {"name": "RBP_GPU", "schema": "dbo",
         "columns": [{"name": "Material"}, {"name": "Plant"}, {"name": "Quantity"}]},
        {"name": "OPS_EXCEL_GPU", "schema": "dbo",
         "columns": [{"name": "PLANNING_SKU"}, {"name": "Material"}, {"name": "Region"}]},
        {"name": "MATERIAL_MASTER", "schema": "dbo",
         "columns": [{"name": "MATERIAL"}, {"name": "OPS_PLANNER"}, {"name": "DESCRIPTION"}]},
        {"name": "ORPHAN", "columns": [{"name": "id"}]}
    ],
    "relationships": [
        {"source_table": "RBP_GPU", "source_column": "Material",
         "target_table": "OPS_EXCEL_GPU", "target_column": "PLANNING_SKU",
         "kind": "user_hint", "confidence": 0.9},
        {"source_table": "OPS_EXCEL_GPU", "source_column": "Material",
         "target_table": "MATERIAL_MASTER", "target_column": "MATERIAL",
         "kind": "foreign_key", "confidence": 1.0}
    ],
    "aliases": {"gpu master": "MATERIAL_MASTER"}
}"#;

fn graph() -> KnowledgeGraph {
    let doc: GraphDocument = serde_json::from_str(GRAPH_JSON).unwrap();
    KnowledgeGraph::from_document(doc).unwrap()
}

fn planner() -> Planner {
    Planner::new(Arc::new(graph()))
}

fn gpu_not_in_ops() -> PartialIntent {
    PartialIntent::not_in("RBP_GPU", "OPS_EXCEL_GPU").with_column("MATERIAL_MASTER", "OPS_PLANNER")
}

#[test]
fn test_gpu_scenario_joins_all_three_tables() {
    let planned = planner().plan(gpu_not_in_ops(), Dialect::Postgres).unwrap();
    let sql = &planned.sql;

    assert!(sql.contains(
        r#"LEFT JOIN "dbo"."OPS_EXCEL_GPU" AS "t" ON "s"."Material" = "t"."PLANNING_SKU""#
    ));
    assert!(sql.contains(
        r#"LEFT JOIN "dbo"."MATERIAL_MASTER" AS "j1" ON "t"."Material" = "j1"."MATERIAL""#
    ));
    assert!(sql.contains(r#""j1"."OPS_PLANNER" AS "#));
    assert!(sql.contains(r#"WHERE "t"."PLANNING_SKU" IS NULL"#));
    // never a placeholder join
    assert!(!sql.contains(r#"."id" = "#));
    assert_eq!(planned.intent.limit(), Some(1000));
}

#[test]
fn test_dialect_limit_clauses() {
    let p = Planner::with_config(
        Arc::new(graph()),
        PlannerConfig {
            distinct: false,
            ..PlannerConfig::default()
        },
        ResolverConfig::default(),
    );
    let sql = |dialect| p.plan(gpu_not_in_ops(), dialect).unwrap().sql;

    let mysql = sql(Dialect::MySql);
    assert!(mysql.ends_with("LIMIT 1000"));

    let tsql = sql(Dialect::TSql);
    assert!(tsql.starts_with("SELECT TOP 1000"));
    assert!(!tsql.contains("LIMIT"));

    let oracle = sql(Dialect::Oracle);
    assert!(oracle.ends_with("\nWHERE \"t\".\"PLANNING_SKU\" IS NULL AND ROWNUM <= 1000"));
    assert!(!oracle.contains("LIMIT"));
}

#[test]
fn test_oracle_table_aliases_have_no_as() {
    let oracle = planner().plan(gpu_not_in_ops(), Dialect::Oracle).unwrap().sql;
    assert!(oracle.contains("\nFROM \"dbo\".\"RBP_GPU\" \"s\"\n"));
    assert!(oracle.contains(
        r#"LEFT JOIN "dbo"."OPS_EXCEL_GPU" "t" ON "s"."Material" = "t"."PLANNING_SKU""#
    ));
    assert!(oracle.contains(
        r#"LEFT JOIN "dbo"."MATERIAL_MASTER" "j1" ON "t"."Material" = "j1"."MATERIAL""#
    ));
    // column aliases keep AS
    assert!(oracle.contains(r#""j1"."OPS_PLANNER" AS "#));
    assert!(!oracle.contains(r#"" AS "s""#));
    assert!(!oracle.contains(r#"" AS "t""#));
}

#[test]
fn test_single_edge_path_score() {
    let g = graph();
    let scoring = PathScoring::default();
    let path = g.find_path("RBP_GPU", "OPS_EXCEL_GPU", &scoring).unwrap();
    assert_eq!(path.tables(), vec!["RBP_GPU", "OPS_EXCEL_GPU"]);
    let expected = 0.7 * 0.9 + 0.3 * 1.0;
    assert!((path.score(&scoring) - expected).abs() < 1e-12);

    // traversal against the declared direction keeps the real columns
    let back = g.find_path("MATERIAL_MASTER", "OPS_EXCEL_GPU", &scoring).unwrap();
    assert_eq!(back.steps[0].from_column, "MATERIAL");
    assert_eq!(back.steps[0].to_column, "Material");
}

#[test]
fn test_unreachable_table_is_an_error() {
    let err = planner().find_path("RBP_GPU", "ORPHAN").unwrap_err();
    match err {
        PlanError::JoinPathNotFound {
            from, to, max_hops, ..
        } => {
            assert_eq!(from, "RBP_GPU");
            assert_eq!(to, "ORPHAN");
            assert_eq!(max_hops, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_resolution_is_idempotent() {
    let p = planner();
    for term in ["rbp gpu", "gpu master", "material_master", "OPS EXCEL GPU"] {
        let first = p.resolve_table(term).unwrap();
        let second = p.resolve_table(term).unwrap();
        assert_eq!(first.table, second.table);
        // resolving the canonical name again lands on itself
        assert_eq!(p.resolve_table(&first.table).unwrap().table, first.table);
    }
}

#[test]
fn test_unknown_table_and_column_errors() {
    let p = planner();
    let err = p.resolve_table("zzz_nothing").unwrap_err();
    assert!(matches!(err, PlanError::TableNotFound { .. }));

    let err = p
        .plan(
            PartialIntent::not_in("RBP_GPU", "OPS_EXCEL_GPU").with_column("MATERIAL_MASTER", "NOPE"),
            Dialect::Postgres,
        )
        .unwrap_err();
    match err {
        PlanError::ColumnNotFound { table, available, .. } => {
            assert_eq!(table, "MATERIAL_MASTER");
            assert!(available.contains(&"OPS_PLANNER".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_supplied_join_columns_are_used() {
    let intent = PartialIntent::in_target("RBP_GPU", "OPS_EXCEL_GPU")
        .with_join_columns(vec![ColumnPair::new("Material", "Material")]);
    let sql = planner().plan(intent, Dialect::DuckDb).unwrap().sql;
    assert!(sql.contains(r#"INNER JOIN "dbo"."OPS_EXCEL_GPU" AS "t" ON "s"."Material" = "t"."Material""#));
}

#[test]
fn test_equals_needs_target() {
    let err = planner()
        .plan(PartialIntent::new(Operation::Equals, "RBP_GPU"), Dialect::Postgres)
        .unwrap_err();
    assert!(matches!(err, PlanError::InvalidIntent(_)));
}

#[tokio::test]
async fn test_question_through_graph_store() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("gpu.json"), GRAPH_JSON).unwrap();

    let store = GraphStore::default();
    store
        .reload(&JsonGraphProvider::new(dir.path()), "gpu")
        .await
        .unwrap();
    let p = Planner::new(store.snapshot());

    let planned = p
        .plan_text(
            &RuleBasedParser::new(),
            "RBP_GPU not in OPS_EXCEL_GPU limit 25",
            Dialect::MySql,
        )
        .await
        .unwrap();
    assert_eq!(planned.intent.operation(), &Operation::NotIn);
    assert!(planned.sql.contains("WHERE `t`.`PLANNING_SKU` IS NULL"));
    assert!(planned.sql.ends_with("LIMIT 25"));
}
