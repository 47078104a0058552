//! Join emission for the SQL generator.
//!
//! Tracks which tables are already in the FROM clause and under which
//! alias, turns join paths into JOIN clauses, and re-checks every hop
//! against the graph so that a stale or hand-built path can never turn
//! into a placeholder join.

use std::collections::HashMap;

use crate::error::{PlanError, PlanResult};
use crate::graph::{JoinPath, JoinStep, KnowledgeGraph};
use crate::intent::ColumnPair;
use crate::sql::expr::{and_all, table_col, Expr, ExprExt};
use crate::sql::query::{JoinType, Query, TableRef};

/// Alias of the source table.
pub const SOURCE_ALIAS: &str = "s";

/// Alias of the target table.
pub const TARGET_ALIAS: &str = "t";

#[derive(Debug, Clone)]
struct PlannedJoin {
    join_type: JoinType,
    table: String,
    alias: String,
    on: Expr,
}

/// Accumulates the joins of one query.
#[derive(Debug)]
pub struct JoinPlanner<'g> {
    graph: &'g KnowledgeGraph,
    source: String,
    aliases: HashMap<String, String>,
    joins: Vec<PlannedJoin>,
    intermediates: usize,
}

impl<'g> JoinPlanner<'g> {
    pub fn new(graph: &'g KnowledgeGraph, source: &str) -> Self {
        let mut aliases = HashMap::new();
        aliases.insert(source.to_string(), SOURCE_ALIAS.to_string());
        Self {
            graph,
            source: source.to_string(),
            aliases,
            joins: Vec::new(),
            intermediates: 0,
        }
    }

    /// Alias of a table already in the query.
    pub fn alias_of(&self, table: &str) -> Option<&str> {
        self.aliases.get(table).map(String::as_str)
    }

    /// Join the target on explicit column pairs.
    pub fn join_on_columns(
        &mut self,
        target: &str,
        pairs: &[ColumnPair],
        join_type: JoinType,
    ) -> PlanResult<String> {
        let on = and_all(pairs.iter().map(|p| {
            table_col(SOURCE_ALIAS, &p.source_column).eq(table_col(TARGET_ALIAS, &p.target_column))
        }))
        .ok_or_else(|| {
            PlanError::SqlGeneration(format!(
                "no join columns between '{}' and '{}'",
                self.source, target
            ))
        })?;
        self.push(join_type, target, TARGET_ALIAS.to_string(), on);
        Ok(TARGET_ALIAS.to_string())
    }

    /// Join every hop of `path`, reusing tables already present.
    ///
    /// The last table gets `last_alias` when given, an intermediate alias
    /// (`j1`, `j2`, ...) otherwise. Returns the alias of the last table.
    pub fn join_path(
        &mut self,
        path: &JoinPath,
        join_type: JoinType,
        last_alias: Option<&str>,
    ) -> PlanResult<String> {
        if path.is_empty() {
            return Ok(SOURCE_ALIAS.to_string());
        }
        if path.steps[0].from_table != self.source {
            return Err(PlanError::SqlGeneration(format!(
                "join path {} does not start at source '{}'",
                path, self.source
            )));
        }

        let mut current = SOURCE_ALIAS.to_string();
        for (i, step) in path.steps.iter().enumerate() {
            self.verify(step)?;
            let from_alias = self
                .alias_of(&step.from_table)
                .map(str::to_string)
                .ok_or_else(|| {
                    PlanError::SqlGeneration(format!(
                        "join path {} is not contiguous at '{}'",
                        path, step.from_table
                    ))
                })?;

            if let Some(existing) = self.alias_of(&step.to_table) {
                current = existing.to_string();
                continue;
            }

            let alias = match last_alias {
                Some(a) if i + 1 == path.steps.len() => a.to_string(),
                _ => {
                    self.intermediates += 1;
                    format!("j{}", self.intermediates)
                }
            };
            let on = table_col(&from_alias, &step.from_column)
                .eq(table_col(&alias, &step.to_column));
            self.push(join_type, &step.to_table, alias.clone(), on);
            current = alias;
        }
        Ok(current)
    }

    /// Apply the planned joins to a query whose FROM is the source.
    pub fn apply(&self, mut query: Query) -> Query {
        for join in &self.joins {
            let table = self.table_ref(&join.table, &join.alias);
            query = query.join(join.join_type, table, join.on.clone());
        }
        query
    }

    /// `schema.table AS alias` for a graph table.
    pub fn table_ref(&self, table: &str, alias: &str) -> TableRef {
        let schema = self.graph.table(table).and_then(|t| t.schema.as_deref());
        TableRef::new(table).with_schema_opt(schema).with_alias(alias)
    }

    fn verify(&self, step: &JoinStep) -> PlanResult<()> {
        if self
            .graph
            .has_edge(&step.from_table, &step.from_column, &step.to_table, &step.to_column)
        {
            Ok(())
        } else {
            Err(PlanError::SqlGeneration(format!(
                "no relationship {}.{} = {}.{} in the graph",
                step.from_table, step.from_column, step.to_table, step.to_column
            )))
        }
    }

    fn push(&mut self, join_type: JoinType, table: &str, alias: String, on: Expr) {
        self.aliases.insert(table.to_string(), alias.clone());
        self.joins.push(PlannedJoin {
            join_type,
            table: table.to_string(),
            alias,
            on,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::gpu_graph;
    use crate::graph::PathScoring;
    use crate::sql::Dialect;

    #[test]
    fn test_multi_hop_aliases() {
        let g = gpu_graph();
        let path = g
            .find_path("RBP_GPU", "MATERIAL_MASTER", &PathScoring::default())
            .unwrap();
        let mut planner = JoinPlanner::new(&g, "RBP_GPU");
        let last = planner.join_path(&path, JoinType::Inner, Some(TARGET_ALIAS)).unwrap();
        assert_eq!(last, "t");
        assert_eq!(planner.alias_of("OPS_EXCEL_GPU"), Some("j1"));

        let q = planner.apply(
            Query::new()
                .select_star()
                .from(planner.table_ref("RBP_GPU", SOURCE_ALIAS)),
        );
        let sql = q.to_sql(Dialect::Postgres);
        assert!(sql.contains(
            r#"INNER JOIN "dbo"."OPS_EXCEL_GPU" AS "j1" ON "s"."Material" = "j1"."PLANNING_SKU""#
        ));
        assert!(sql.contains(
            r#"INNER JOIN "dbo"."MATERIAL_MASTER" AS "t" ON "j1"."Material" = "t"."Material""#
        ));
    }

    #[test]
    fn test_reuses_joined_tables() {
        let g = gpu_graph();
        let scoring = PathScoring::default();
        let mut planner = JoinPlanner::new(&g, "RBP_GPU");
        let to_ops = g.find_path("RBP_GPU", "OPS_EXCEL_GPU", &scoring).unwrap();
        planner.join_path(&to_ops, JoinType::Left, Some(TARGET_ALIAS)).unwrap();

        let to_mm = g.find_path("RBP_GPU", "MATERIAL_MASTER", &scoring).unwrap();
        let alias = planner.join_path(&to_mm, JoinType::Left, None).unwrap();
        assert_eq!(alias, "j1");
        assert_eq!(planner.joins.len(), 2);
        assert_eq!(
            planner.joins[1].on,
            table_col("t", "Material").eq(table_col("j1", "Material"))
        );
    }

    #[test]
    fn test_unverified_hop_fails() {
        let g = gpu_graph();
        let bogus = JoinPath::from_steps(vec![JoinStep {
            from_table: "RBP_GPU".into(),
            from_column: "Status".into(),
            to_table: "PLANT".into(),
            to_column: "Plant".into(),
            confidence: 1.0,
            kind: Default::default(),
            cardinality: Default::default(),
        }]);
        let mut planner = JoinPlanner::new(&g, "RBP_GPU");
        let err = planner.join_path(&bogus, JoinType::Left, None).unwrap_err();
        assert!(matches!(err, PlanError::SqlGeneration(_)));
    }

    #[test]
    fn test_path_must_start_at_source() {
        let g = gpu_graph();
        let path = g
            .find_path("OPS_EXCEL_GPU", "MATERIAL_MASTER", &PathScoring::default())
            .unwrap();
        let mut planner = JoinPlanner::new(&g, "RBP_GPU");
        assert!(planner.join_path(&path, JoinType::Left, None).is_err());
    }
}
