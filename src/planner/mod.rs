//! SQL generation from validated intents, and the [`Planner`] facade.
//!
//! The generator never guesses a join: every JOIN comes from a path (or
//! explicit column pairs) carried by the intent, and every path hop is
//! checked against the graph again before it is emitted.
//!
//! ```text
//! PartialIntent ──► IntentBuilder ──► QueryIntent ──► SqlGenerator ──► SQL
//!                    (resolve, path)                   (JoinPlanner)
//! ```

pub mod joins;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PlanError, PlanResult};
use crate::graph::{JoinPath, KnowledgeGraph, PathScoring};
use crate::intent::{
    FilterOp, FilterValue, IntentBuilder, IntentParser, Operation, PartialIntent, QueryIntent,
    Vocabulary,
};
use crate::resolve::{Resolution, ResolverConfig, TableResolver};
use crate::sql::expr::{
    count_star, func, lit_bool, lit_float, lit_int, lit_null, lit_str, table_col, table_star,
    Expr, ExprExt,
};
use crate::sql::query::{JoinType, Query, SelectExpr};
use crate::sql::Dialect;

pub use joins::{JoinPlanner, SOURCE_ALIAS, TARGET_ALIAS};

// ============================================================================
// Configuration
// ============================================================================

/// Planner tuning, the `[planner]` settings section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_hops: usize,
    pub confidence_weight: f64,
    pub length_weight: f64,
    /// Row limit for intents that carry none.
    pub default_limit: u64,
    /// `SELECT DISTINCT` for non-aggregate queries.
    pub distinct: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let scoring = PathScoring::default();
        Self {
            max_hops: scoring.max_hops,
            confidence_weight: scoring.confidence_weight,
            length_weight: scoring.length_weight,
            default_limit: 1000,
            distinct: true,
        }
    }
}

impl PlannerConfig {
    pub fn scoring(&self) -> PathScoring {
        PathScoring {
            max_hops: self.max_hops,
            confidence_weight: self.confidence_weight,
            length_weight: self.length_weight,
        }
    }
}

// ============================================================================
// SQL generator
// ============================================================================

/// Renders a [`QueryIntent`] as SQL for one dialect.
#[derive(Debug, Clone)]
pub struct SqlGenerator<'g> {
    graph: &'g KnowledgeGraph,
    distinct: bool,
}

impl<'g> SqlGenerator<'g> {
    pub fn new(graph: &'g KnowledgeGraph) -> Self {
        Self {
            graph,
            distinct: true,
        }
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Generate SQL text. Fails rather than emit SQL with an unresolved join.
    pub fn generate(&self, intent: &QueryIntent, dialect: Dialect) -> PlanResult<String> {
        let query = self.build_query(intent)?;
        let sql = query.to_sql(dialect);
        debug!(%dialect, source = intent.source_table(), sql = %sql, "generated SQL");
        Ok(sql)
    }

    /// Build the dialect-independent query.
    pub fn build_query(&self, intent: &QueryIntent) -> PlanResult<Query> {
        let source = intent.source_table();
        if !self.graph.contains(source) {
            return Err(PlanError::TableNotFound {
                term: source.into(),
                suggestions: Vec::new(),
            });
        }

        let mut joins = JoinPlanner::new(self.graph, source);
        let mut conditions = Vec::new();

        match intent.operation() {
            Operation::In | Operation::Equals => {
                self.join_target(intent, &mut joins, JoinType::Inner)?;
            }
            Operation::NotIn => {
                let null_column = self.join_target(intent, &mut joins, JoinType::Left)?;
                conditions.push(table_col(TARGET_ALIAS, &null_column).is_null());
            }
            Operation::Aggregate { .. } | Operation::Filter => {}
        }

        let mut extra = Vec::new();
        for column in intent.additional_columns() {
            let alias = self.alias_for(&column.table, column.join_path.as_ref(), &mut joins)?;
            extra.push(table_col(&alias, &column.column).alias(&column.alias));
        }

        for filter in intent.filters() {
            let alias = self.alias_for(&filter.table, filter.join_path.as_ref(), &mut joins)?;
            conditions.push(filter_expr(&alias, &filter.column, filter.op, &filter.value)?);
        }

        let mut query = match intent.operation() {
            Operation::Aggregate {
                function,
                column,
                group_by,
            } => {
                let mut select: Vec<SelectExpr> = Vec::new();
                let mut grouping: Vec<Expr> = Vec::new();
                for g in group_by {
                    select.push(table_col(SOURCE_ALIAS, g).into());
                    grouping.push(table_col(SOURCE_ALIAS, g));
                }
                for e in &extra {
                    grouping.push(e.expr.clone());
                }
                select.extend(extra);

                let (value, name) = match column {
                    Some(c) => (
                        func(function.sql_name(), vec![table_col(SOURCE_ALIAS, c)]),
                        format!("{}_{}", function.sql_name().to_lowercase(), c.to_lowercase()),
                    ),
                    None => (count_star(), "count".to_string()),
                };
                select.push(value.alias(&name));
                Query::new().select(select).group_by(grouping)
            }
            op => {
                let mut select: Vec<SelectExpr> = vec![table_star(SOURCE_ALIAS).into()];
                if matches!(op, Operation::Equals) {
                    select.push(table_star(TARGET_ALIAS).into());
                }
                select.extend(extra);
                let q = Query::new().select(select);
                if self.distinct {
                    q.distinct()
                } else {
                    q
                }
            }
        };

        query = query.from(joins.table_ref(source, SOURCE_ALIAS));
        query = joins.apply(query);
        for condition in conditions {
            query = query.filter(condition);
        }
        if let Some(limit) = intent.limit() {
            query = query.limit(limit);
        }
        Ok(query)
    }

    /// Join the target table and return the target column that is NULL
    /// exactly when a source row has no match.
    fn join_target(
        &self,
        intent: &QueryIntent,
        joins: &mut JoinPlanner<'_>,
        join_type: JoinType,
    ) -> PlanResult<String> {
        let target = intent.target_table().ok_or_else(|| {
            PlanError::SqlGeneration(format!(
                "'{}' needs a target table",
                intent.operation().name()
            ))
        })?;

        match intent.target_path() {
            Some(path) if !path.is_empty() => {
                joins.join_path(path, join_type, Some(TARGET_ALIAS))?;
                let last = path.steps.last().map(|s| s.to_column.clone());
                last.ok_or_else(|| PlanError::SqlGeneration("empty target path".into()))
            }
            _ if !intent.join_columns().is_empty() => {
                joins.join_on_columns(target, intent.join_columns(), join_type)?;
                Ok(intent.join_columns()[0].target_column.clone())
            }
            _ => Err(PlanError::SqlGeneration(format!(
                "no join between '{}' and '{}'",
                intent.source_table(),
                target
            ))),
        }
    }

    /// Alias for a table referenced by a column or filter, joining it with
    /// LEFT JOINs along its path when it is not in the query yet.
    fn alias_for(
        &self,
        table: &str,
        path: Option<&JoinPath>,
        joins: &mut JoinPlanner<'_>,
    ) -> PlanResult<String> {
        if let Some(alias) = joins.alias_of(table) {
            return Ok(alias.to_string());
        }
        match path {
            Some(path) => joins.join_path(path, JoinType::Left, None),
            None => Err(PlanError::SqlGeneration(format!(
                "no join path to '{}'",
                table
            ))),
        }
    }
}

fn value_expr(value: &FilterValue) -> PlanResult<Expr> {
    Ok(match value {
        FilterValue::Null => lit_null(),
        FilterValue::Bool(b) => lit_bool(*b),
        FilterValue::Int(n) => lit_int(*n),
        FilterValue::Float(f) if f.is_finite() => lit_float(*f),
        FilterValue::Float(f) => {
            return Err(PlanError::SqlGeneration(format!(
                "cannot render {} as SQL",
                f
            )))
        }
        FilterValue::String(s) => lit_str(s),
        FilterValue::List(_) => {
            return Err(PlanError::SqlGeneration(
                "a list is only valid with IN / NOT IN".into(),
            ))
        }
    })
}

fn list_exprs(value: &FilterValue) -> PlanResult<Vec<Expr>> {
    match value {
        FilterValue::List(items) => items.iter().map(value_expr).collect(),
        scalar => Ok(vec![value_expr(scalar)?]),
    }
}

/// Predicate for one filter on `alias.column`.
pub(crate) fn filter_expr(
    alias: &str,
    column: &str,
    op: FilterOp,
    value: &FilterValue,
) -> PlanResult<Expr> {
    let c = table_col(alias, column);
    Ok(match (op, value) {
        (FilterOp::IsNull, _) | (FilterOp::Eq, FilterValue::Null) => c.is_null(),
        (FilterOp::IsNotNull, _) | (FilterOp::Ne, FilterValue::Null) => c.is_not_null(),
        (FilterOp::In, v) => c.in_list(list_exprs(v)?),
        (FilterOp::NotIn, v) => c.not_in_list(list_exprs(v)?),
        (FilterOp::Eq, v) => c.eq(value_expr(v)?),
        (FilterOp::Ne, v) => c.ne(value_expr(v)?),
        (FilterOp::Gt, v) => c.gt(value_expr(v)?),
        (FilterOp::Gte, v) => c.gte(value_expr(v)?),
        (FilterOp::Lt, v) => c.lt(value_expr(v)?),
        (FilterOp::Lte, v) => c.lte(value_expr(v)?),
        (FilterOp::Like, v) => c.like(value_expr(v)?),
    })
}

// ============================================================================
// Facade
// ============================================================================

/// An intent together with the SQL generated for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedQuery {
    pub intent: QueryIntent,
    pub dialect: Dialect,
    pub sql: String,
}

/// One-stop planning over a graph snapshot.
#[derive(Debug, Clone)]
pub struct Planner {
    graph: Arc<KnowledgeGraph>,
    config: PlannerConfig,
    resolver: ResolverConfig,
}

impl Planner {
    pub fn new(graph: Arc<KnowledgeGraph>) -> Self {
        Self::with_config(graph, PlannerConfig::default(), ResolverConfig::default())
    }

    pub fn with_config(
        graph: Arc<KnowledgeGraph>,
        config: PlannerConfig,
        resolver: ResolverConfig,
    ) -> Self {
        Self {
            graph,
            config,
            resolver,
        }
    }

    pub fn graph(&self) -> &Arc<KnowledgeGraph> {
        &self.graph
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn resolver(&self) -> TableResolver<'_> {
        TableResolver::new(&self.graph, self.resolver.clone())
    }

    /// Resolve a business term to a table, with suggestions on failure.
    pub fn resolve_table(&self, term: &str) -> PlanResult<Resolution> {
        self.resolver().resolve_strict(term)
    }

    /// Best join path between two table terms.
    pub fn find_path(&self, from: &str, to: &str) -> PlanResult<JoinPath> {
        let resolver = self.resolver();
        let from = resolver.resolve_strict(from)?.table;
        let to = resolver.resolve_strict(to)?.table;
        self.graph.find_path(&from, &to, &self.config.scoring())
    }

    pub fn build_intent(&self, partial: PartialIntent) -> PlanResult<QueryIntent> {
        IntentBuilder::new(&self.graph, self.resolver.clone(), self.config.scoring())
            .with_default_limit(Some(self.config.default_limit))
            .build(partial)
    }

    pub fn generate(&self, intent: &QueryIntent, dialect: Dialect) -> PlanResult<String> {
        SqlGenerator::new(&self.graph)
            .with_distinct(self.config.distinct)
            .generate(intent, dialect)
    }

    /// The query for an intent, before dialect rendering.
    pub fn build_query(&self, intent: &QueryIntent) -> PlanResult<Query> {
        SqlGenerator::new(&self.graph)
            .with_distinct(self.config.distinct)
            .build_query(intent)
    }

    /// Build and render a partial intent.
    pub fn plan(&self, partial: PartialIntent, dialect: Dialect) -> PlanResult<PlannedQuery> {
        let intent = self.build_intent(partial)?;
        let sql = self.generate(&intent, dialect)?;
        Ok(PlannedQuery {
            intent,
            dialect,
            sql,
        })
    }

    /// Parse a question, then plan it like any other partial intent.
    pub async fn plan_text(
        &self,
        parser: &dyn IntentParser,
        text: &str,
        dialect: Dialect,
    ) -> PlanResult<PlannedQuery> {
        let vocabulary = Vocabulary::from_graph(&self.graph);
        let parsed = parser.parse(text, &vocabulary).await?;
        info!(
            operation = parsed.intent.operation.name(),
            source = %parsed.intent.source,
            confidence = parsed.confidence,
            "parsed question"
        );
        let mut partial = parsed.intent;
        partial.confidence = Some(parsed.confidence);
        self.plan(partial, dialect)
    }
}
