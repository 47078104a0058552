//! Turn a [`PartialIntent`] into a validated [`QueryIntent`].
//!
//! Every table term goes through the resolver, every column is checked
//! against its table, and every table other than the source gets a join
//! path from the graph. Nothing reaches the SQL generator unchecked.

use std::collections::HashSet;

use tracing::debug;

use super::{
    AdditionalColumn, AggregateFunction, ColumnPair, Filter, FilterOp, FilterValue, Operation,
    PartialFilter, PartialIntent, QueryIntent, RequestedColumn,
};
use crate::error::{PlanError, PlanResult};
use crate::graph::{JoinPath, KnowledgeGraph, PathScoring};
use crate::resolve::{normalize, ResolverConfig, TableResolver};

/// Added to the intent confidence when any term needed a non-exact match.
const NON_EXACT_BUMP: f64 = 0.1;

/// Ceiling for a bumped confidence.
const NON_EXACT_CEILING: f64 = 0.95;

/// Builds query intents against one graph snapshot.
#[derive(Debug, Clone)]
pub struct IntentBuilder<'g> {
    graph: &'g KnowledgeGraph,
    resolver: TableResolver<'g>,
    scoring: PathScoring,
    default_limit: Option<u64>,
}

/// Bookkeeping for one build.
struct BuildState {
    non_exact: bool,
    aliases: HashSet<String>,
}

impl<'g> IntentBuilder<'g> {
    pub fn new(graph: &'g KnowledgeGraph, resolver: ResolverConfig, scoring: PathScoring) -> Self {
        Self {
            graph,
            resolver: TableResolver::new(graph, resolver),
            scoring,
            default_limit: None,
        }
    }

    /// Limit applied when the partial intent carries none.
    pub fn with_default_limit(mut self, limit: Option<u64>) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn build(&self, partial: PartialIntent) -> PlanResult<QueryIntent> {
        let mut state = BuildState {
            non_exact: false,
            aliases: HashSet::new(),
        };

        let source = self.resolve(&partial.source, &mut state)?;
        let target = partial
            .target
            .as_deref()
            .map(|term| self.resolve(term, &mut state))
            .transpose()?;

        match (&partial.operation, &target) {
            (op, None) if op.needs_target() => {
                return Err(PlanError::InvalidIntent(format!(
                    "operation '{}' needs a target table",
                    op.name()
                )));
            }
            (op, Some(t)) if !op.needs_target() => {
                return Err(PlanError::InvalidIntent(format!(
                    "operation '{}' does not take a target table (got '{}')",
                    op.name(),
                    t
                )));
            }
            (_, Some(t)) if *t == source => {
                return Err(PlanError::InvalidIntent(format!(
                    "source and target both resolve to '{}'",
                    source
                )));
            }
            _ => {}
        }

        let (join_columns, target_path) = match &target {
            Some(t) if !partial.join_columns.is_empty() => {
                (self.check_join_columns(&source, t, &partial.join_columns)?, None)
            }
            Some(t) => {
                let path = self.graph.find_path(&source, t, &self.scoring)?;
                debug!(from = %source, to = %t, path = %path, "derived target path");
                let pairs = match path.steps.as_slice() {
                    [step] => vec![ColumnPair::new(&step.from_column, &step.to_column)],
                    _ => Vec::new(),
                };
                (pairs, Some(path))
            }
            None => (Vec::new(), None),
        };

        let operation = self.check_operation(partial.operation, &source)?;

        let filters = partial
            .filters
            .iter()
            .map(|f| {
                self.build_filter(f, &source, target.as_deref(), target_path.as_ref(), &mut state)
            })
            .collect::<PlanResult<Vec<_>>>()?;

        let additional_columns = partial
            .columns
            .iter()
            .map(|c| {
                self.build_column(c, &source, target.as_deref(), target_path.as_ref(), &mut state)
            })
            .collect::<PlanResult<Vec<_>>>()?;

        let limit = partial.limit.or(self.default_limit);
        if limit == Some(0) {
            return Err(PlanError::InvalidIntent("limit must be positive".into()));
        }

        let base = partial.confidence.unwrap_or(1.0);
        if !base.is_finite() || !(0.0..=1.0).contains(&base) {
            return Err(PlanError::InvalidIntent(format!(
                "confidence {} is outside [0, 1]",
                base
            )));
        }
        let confidence = if state.non_exact {
            (base + NON_EXACT_BUMP).min(NON_EXACT_CEILING)
        } else {
            base
        };

        Ok(QueryIntent {
            operation,
            source_table: source,
            target_table: target,
            join_columns,
            target_path,
            filters,
            additional_columns,
            limit,
            confidence,
        })
    }

    fn resolve(&self, term: &str, state: &mut BuildState) -> PlanResult<String> {
        let resolution = self.resolver.resolve_strict(term)?;
        if !resolution.is_exact() {
            state.non_exact = true;
        }
        Ok(resolution.table)
    }

    /// Canonical spelling of `column` on `table`.
    fn column(&self, table: &str, column: &str) -> PlanResult<String> {
        let node = self.graph.table(table).ok_or_else(|| PlanError::TableNotFound {
            term: table.into(),
            suggestions: Vec::new(),
        })?;
        node.column(column)
            .map(|c| c.name.clone())
            .ok_or_else(|| PlanError::ColumnNotFound {
                table: table.into(),
                column: column.into(),
                available: node.column_names(),
            })
    }

    fn check_join_columns(
        &self,
        source: &str,
        target: &str,
        pairs: &[ColumnPair],
    ) -> PlanResult<Vec<ColumnPair>> {
        pairs
            .iter()
            .map(|p| {
                Ok(ColumnPair::new(
                    self.column(source, &p.source_column)?,
                    self.column(target, &p.target_column)?,
                ))
            })
            .collect()
    }

    fn check_operation(&self, operation: Operation, source: &str) -> PlanResult<Operation> {
        match operation {
            Operation::Aggregate {
                function,
                column,
                group_by,
            } => {
                let column = column.map(|c| self.column(source, &c)).transpose()?;
                if column.is_none() && function != AggregateFunction::Count {
                    return Err(PlanError::InvalidIntent(format!(
                        "{} needs a column",
                        function.sql_name()
                    )));
                }
                let group_by = group_by
                    .iter()
                    .map(|c| self.column(source, c))
                    .collect::<PlanResult<Vec<_>>>()?;
                Ok(Operation::Aggregate {
                    function,
                    column,
                    group_by,
                })
            }
            other => Ok(other),
        }
    }

    /// Path from the source to `table`, or `None` when no join is needed
    /// beyond the primary one.
    fn path_to(
        &self,
        table: &str,
        source: &str,
        target: Option<&str>,
        target_path: Option<&JoinPath>,
    ) -> PlanResult<Option<JoinPath>> {
        if table == source {
            return Ok(None);
        }
        if Some(table) == target {
            return Ok(target_path.cloned());
        }
        self.graph.find_path(source, table, &self.scoring).map(Some)
    }

    fn build_filter(
        &self,
        filter: &PartialFilter,
        source: &str,
        target: Option<&str>,
        target_path: Option<&JoinPath>,
        state: &mut BuildState,
    ) -> PlanResult<Filter> {
        let table = match &filter.table {
            Some(term) => self.resolve(term, state)?,
            None => source.to_string(),
        };
        let column = self.column(&table, &filter.column)?;

        if !filter.value.is_finite() {
            return Err(PlanError::InvalidIntent(format!(
                "filter on '{}.{}' has a non-finite number",
                table, column
            )));
        }

        let value = match (filter.op, &filter.value) {
            (FilterOp::IsNull | FilterOp::IsNotNull, _) => FilterValue::Null,
            (FilterOp::In | FilterOp::NotIn, FilterValue::List(_)) => filter.value.clone(),
            (FilterOp::In | FilterOp::NotIn, scalar) => FilterValue::List(vec![scalar.clone()]),
            (_, FilterValue::List(_)) => {
                return Err(PlanError::InvalidIntent(format!(
                    "filter on '{}.{}' compares a single value against a list",
                    table, column
                )));
            }
            (FilterOp::Like, FilterValue::String(_)) => filter.value.clone(),
            (FilterOp::Like, _) => {
                return Err(PlanError::InvalidIntent(format!(
                    "LIKE filter on '{}.{}' needs a string pattern",
                    table, column
                )));
            }
            _ => filter.value.clone(),
        };

        if let FilterValue::List(items) = &value {
            if items.iter().any(|v| matches!(v, FilterValue::List(_))) {
                return Err(PlanError::InvalidIntent(format!(
                    "filter on '{}.{}' has a nested list",
                    table, column
                )));
            }
        }

        let join_path = self.path_to(&table, source, target, target_path)?;
        Ok(Filter {
            table,
            column,
            op: filter.op,
            value,
            join_path,
        })
    }

    fn build_column(
        &self,
        requested: &RequestedColumn,
        source: &str,
        target: Option<&str>,
        target_path: Option<&JoinPath>,
        state: &mut BuildState,
    ) -> PlanResult<AdditionalColumn> {
        let table = self.resolve(&requested.table, state)?;
        let column = self.column(&table, &requested.column)?;
        let join_path = self.path_to(&table, source, target, target_path)?;

        let base = match &requested.alias {
            Some(alias) => alias.clone(),
            None => self.default_alias(&table, &column),
        };
        let alias = unique_alias(&base, &mut state.aliases);

        Ok(AdditionalColumn {
            table,
            column,
            alias,
            join_path,
        })
    }

    /// `{short table}_{column}`, where the short table is the first
    /// normalized token of the table name.
    fn default_alias(&self, table: &str, column: &str) -> String {
        let short = normalize::tokens(table, &self.resolver.config().strip_prefixes)
            .into_iter()
            .next()
            .unwrap_or_else(|| table.to_lowercase());
        format!("{}_{}", short, column.to_lowercase())
    }
}

fn unique_alias(base: &str, taken: &mut HashSet<String>) -> String {
    let mut alias = base.to_string();
    let mut n = 2;
    while taken.contains(&alias) {
        alias = format!("{}_{}", base, n);
        n += 1;
    }
    taken.insert(alias.clone());
    alias
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::gpu_graph;

    fn build(graph: &KnowledgeGraph, partial: PartialIntent) -> PlanResult<QueryIntent> {
        IntentBuilder::new(graph, ResolverConfig::default(), PathScoring::default())
            .with_default_limit(Some(1000))
            .build(partial)
    }

    #[test]
    fn test_single_hop_fills_join_columns() {
        let g = gpu_graph();
        let intent = build(&g, PartialIntent::not_in("RBP_GPU", "OPS_EXCEL_GPU")).unwrap();
        assert_eq!(intent.source_table(), "RBP_GPU");
        assert_eq!(intent.target_table(), Some("OPS_EXCEL_GPU"));
        assert_eq!(
            intent.join_columns(),
            &[ColumnPair::new("Material", "PLANNING_SKU")]
        );
        assert_eq!(intent.target_path().map(|p| p.hops()), Some(1));
        assert_eq!(intent.limit(), Some(1000));
        assert_eq!(intent.confidence(), 1.0);
    }

    #[test]
    fn test_multi_hop_target_keeps_path_only() {
        let g = gpu_graph();
        let intent = build(&g, PartialIntent::in_target("RBP_GPU", "MATERIAL_MASTER")).unwrap();
        assert!(intent.join_columns().is_empty());
        assert_eq!(
            intent.target_path().unwrap().tables(),
            vec!["RBP_GPU", "OPS_EXCEL_GPU", "MATERIAL_MASTER"]
        );
    }

    #[test]
    fn test_additional_column_gets_path_and_alias() {
        let g = gpu_graph();
        let partial = PartialIntent::not_in("RBP_GPU", "OPS_EXCEL_GPU")
            .with_column("MATERIAL_MASTER", "description")
            .with_column("gpu master", "DESCRIPTION");
        let intent = build(&g, partial).unwrap();

        let cols = intent.additional_columns();
        assert_eq!(cols[0].column, "DESCRIPTION");
        assert_eq!(cols[0].alias, "material_description");
        assert_eq!(cols[0].join_path.as_ref().unwrap().hops(), 2);
        assert_eq!(cols[1].alias, "material_description_2");
        // "gpu master" is an alias, not an exact name
        assert_eq!(intent.confidence(), 0.95);
    }

    #[test]
    fn test_source_column_has_no_path() {
        let g = gpu_graph();
        let intent = build(
            &g,
            PartialIntent::new(Operation::Filter, "RBP_GPU").with_column("RBP_GPU", "plant"),
        )
        .unwrap();
        assert!(intent.additional_columns()[0].join_path.is_none());
        assert_eq!(intent.additional_columns()[0].alias, "rbp_plant");
    }

    #[test]
    fn test_unknown_column_lists_available() {
        let g = gpu_graph();
        let err = build(
            &g,
            PartialIntent::not_in("RBP_GPU", "OPS_EXCEL_GPU").with_column("PLANT", "Nope"),
        )
        .unwrap_err();
        match err {
            PlanError::ColumnNotFound {
                table, available, ..
            } => {
                assert_eq!(table, "PLANT");
                assert_eq!(available, vec!["Plant", "PlantName"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_table_is_fatal() {
        let g = gpu_graph();
        let err = build(&g, PartialIntent::not_in("RBP_GPU", "zzz_qqq")).unwrap_err();
        assert!(matches!(err, PlanError::TableNotFound { .. }));
    }

    #[test]
    fn test_target_rules() {
        let g = gpu_graph();
        let err = build(&g, PartialIntent::new(Operation::NotIn, "RBP_GPU")).unwrap_err();
        assert!(matches!(err, PlanError::InvalidIntent(_)));

        let err = build(
            &g,
            PartialIntent::new(Operation::Filter, "RBP_GPU").with_target("PLANT"),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidIntent(_)));

        let err = build(&g, PartialIntent::in_target("RBP_GPU", "rbp")).unwrap_err();
        assert!(matches!(err, PlanError::InvalidIntent(_)));
    }

    #[test]
    fn test_supplied_join_columns_are_validated() {
        let g = gpu_graph();
        let ok = build(
            &g,
            PartialIntent::in_target("RBP_GPU", "PLANT")
                .with_join_columns(vec![ColumnPair::new("plant", "PLANT")]),
        )
        .unwrap();
        assert_eq!(ok.join_columns(), &[ColumnPair::new("Plant", "Plant")]);
        assert!(ok.target_path().is_none());

        let err = build(
            &g,
            PartialIntent::in_target("RBP_GPU", "PLANT")
                .with_join_columns(vec![ColumnPair::new("Plant", "Missing")]),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::ColumnNotFound { .. }));
    }

    #[test]
    fn test_filter_values() {
        let g = gpu_graph();
        let partial = PartialIntent::new(Operation::Filter, "RBP_GPU")
            .with_filter(PartialFilter {
                table: None,
                column: "status".into(),
                op: FilterOp::In,
                value: FilterValue::String("OPEN".into()),
            })
            .with_filter(PartialFilter {
                table: Some("MATERIAL_MASTER".into()),
                column: "Category".into(),
                op: FilterOp::Eq,
                value: FilterValue::String("GPU".into()),
            });
        let intent = build(&g, partial).unwrap();
        assert_eq!(
            intent.filters()[0].value,
            FilterValue::List(vec![FilterValue::String("OPEN".into())])
        );
        assert!(intent.filters()[0].join_path.is_none());
        assert_eq!(intent.filters()[1].join_path.as_ref().unwrap().hops(), 2);

        let err = build(
            &g,
            PartialIntent::new(Operation::Filter, "RBP_GPU").with_filter(PartialFilter {
                table: None,
                column: "Quantity".into(),
                op: FilterOp::Gt,
                value: FilterValue::Float(f64::NAN),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidIntent(_)));
    }

    #[test]
    fn test_aggregate_columns_checked() {
        let g = gpu_graph();
        let op = Operation::Aggregate {
            function: AggregateFunction::Sum,
            column: Some("quantity".into()),
            group_by: vec!["plant".into()],
        };
        let intent = build(&g, PartialIntent::new(op, "RBP_GPU")).unwrap();
        assert_eq!(
            intent.operation(),
            &Operation::Aggregate {
                function: AggregateFunction::Sum,
                column: Some("Quantity".into()),
                group_by: vec!["Plant".into()],
            }
        );

        let op = Operation::Aggregate {
            function: AggregateFunction::Avg,
            column: None,
            group_by: vec![],
        };
        assert!(build(&g, PartialIntent::new(op, "RBP_GPU")).is_err());
    }

    #[test]
    fn test_limit_and_confidence_bounds() {
        let g = gpu_graph();
        let err = build(
            &g,
            PartialIntent::new(Operation::Filter, "RBP_GPU").with_limit(0),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidIntent(_)));

        let mut partial = PartialIntent::new(Operation::Filter, "RBP_GPU");
        partial.confidence = Some(1.5);
        assert!(build(&g, partial).is_err());

        let mut partial = PartialIntent::new(Operation::Filter, "rbp");
        partial.confidence = Some(0.5);
        assert!((build(&g, partial).unwrap().confidence() - 0.6).abs() < 1e-9);
    }
}
