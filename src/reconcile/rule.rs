//! Reconciliation rules and the SQL they compile to.
//!
//! A rule names a source and a target table and says how their rows match.
//! Older rules carry only `source_columns`/`target_columns`; newer ones may
//! chain extra tables through `join_tables`, `join_conditions` and
//! `join_order`. Both shapes normalize into one [`RulePlan`], so a
//! two-table rule renders the same SQL whether the multi-table fields are
//! missing or present but empty.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};
use crate::intent::{FilterOp, FilterValue};
use crate::planner::filter_expr;
use crate::sql::expr::{
    and_all, count_star, exists, lit_int, not_exists, table_col, table_star, Expr, ExprExt,
};
use crate::sql::query::{JoinType, Query, SelectExpr, TableRef};
use crate::sql::{Dialect, SqlDialect};

/// Column name of every count query.
pub const COUNT_COLUMN: &str = "row_count";

// ============================================================================
// Rule definition
// ============================================================================

/// `left_table.left_column = right_table.right_column`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

impl JoinCondition {
    pub fn new(
        left_table: impl Into<String>,
        left_column: impl Into<String>,
        right_table: impl Into<String>,
        right_column: impl Into<String>,
    ) -> Self {
        Self {
            left_table: left_table.into(),
            left_column: left_column.into(),
            right_table: right_table.into(),
            right_column: right_column.into(),
        }
    }

    fn touches(&self, table: &str) -> bool {
        self.left_table == table || self.right_table == table
    }

    /// The same condition with `table` on the left.
    fn oriented_from(&self, table: &str) -> Self {
        if self.left_table == table {
            self.clone()
        } else {
            Self::new(
                &self.right_table,
                &self.right_column,
                &self.left_table,
                &self.left_column,
            )
        }
    }
}

/// A predicate applied to one table of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFilter {
    pub table: String,
    pub column: String,
    pub op: FilterOp,
    #[serde(default = "null_value")]
    pub value: FilterValue,
}

fn null_value() -> FilterValue {
    FilterValue::Null
}

/// Source column marking a row as active, and the value that means active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveFlag {
    pub column: String,
    pub active_value: FilterValue,
}

fn full_confidence() -> f64 {
    1.0
}

/// A stored reconciliation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRule {
    pub name: String,
    pub source_table: String,
    pub target_table: String,
    /// Two-table form: paired with `target_columns` by position.
    #[serde(default)]
    pub source_columns: Vec<String>,
    #[serde(default)]
    pub target_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_tables: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_conditions: Option<Vec<JoinCondition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_order: Option<Vec<String>>,
    /// Join type per joined table (`inner`, `left`, `right`, `full`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_types: Option<BTreeMap<String, String>>,
    /// Projected columns per table; tables left out project `alias.*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_columns: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_conditions: Option<Vec<RuleFilter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_flag: Option<ActiveFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

impl ReconciliationRule {
    /// A two-table rule matching `source_columns[i] = target_columns[i]`.
    pub fn two_table(
        name: impl Into<String>,
        source_table: impl Into<String>,
        source_columns: &[&str],
        target_table: impl Into<String>,
        target_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            source_table: source_table.into(),
            target_table: target_table.into(),
            source_columns: source_columns.iter().map(|c| c.to_string()).collect(),
            target_columns: target_columns.iter().map(|c| c.to_string()).collect(),
            join_tables: None,
            join_conditions: None,
            join_order: None,
            join_types: None,
            select_columns: None,
            filter_conditions: None,
            active_flag: None,
            schema: None,
            confidence: 1.0,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_active_flag(mut self, column: impl Into<String>, active_value: FilterValue) -> Self {
        self.active_flag = Some(ActiveFlag {
            column: column.into(),
            active_value,
        });
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Normalize into a [`RulePlan`], validating the rule on the way.
    pub fn plan(&self) -> PlanResult<RulePlan> {
        RulePlan::from_rule(self)
    }
}

// ============================================================================
// Normalized plan
// ============================================================================

/// One table of a rule plan, in join order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanTable {
    pub name: String,
    pub alias: String,
    /// How this table joins the ones before it; ignored for the first.
    pub join_type: JoinType,
    /// Conditions to earlier tables, earlier table on the left.
    pub conditions: Vec<JoinCondition>,
    /// Projected columns; empty means `alias.*`.
    pub columns: Vec<String>,
}

/// A validated rule with aliases and per-table join conditions worked out.
#[derive(Debug, Clone, PartialEq)]
pub struct RulePlan {
    pub name: String,
    pub source: String,
    pub target: String,
    pub tables: Vec<PlanTable>,
    pub schema: Option<String>,
    pub filters: Vec<RuleFilter>,
    pub active_flag: Option<ActiveFlag>,
    pub confidence: f64,
}

/// Which endpoint an anti-join starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Target,
}

/// Every statement a rule run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleQueries {
    pub matched: Query,
    pub unmatched_source: Query,
    pub unmatched_target: Query,
    pub source_count: Query,
    pub target_count: Query,
    pub matched_count: Query,
    pub unmatched_source_count: Query,
    pub unmatched_target_count: Query,
    pub inactive_count: Option<Query>,
}

fn non_empty<T: Clone>(v: &Option<Vec<T>>) -> Option<Vec<T>> {
    v.as_ref().filter(|v| !v.is_empty()).cloned()
}

impl RulePlan {
    pub fn from_rule(rule: &ReconciliationRule) -> PlanResult<Self> {
        let invalid = |msg: String| PlanError::invalid_rule(&rule.name, msg);

        if !rule.confidence.is_finite() || !(0.0..=1.0).contains(&rule.confidence) {
            return Err(invalid(format!(
                "confidence {} is outside [0, 1]",
                rule.confidence
            )));
        }
        if rule.source_table == rule.target_table {
            return Err(invalid("source and target are the same table".into()));
        }

        let order = non_empty(&rule.join_order)
            .or_else(|| non_empty(&rule.join_tables))
            .unwrap_or_else(|| vec![rule.source_table.clone(), rule.target_table.clone()]);

        let mut seen = BTreeSet::new();
        for t in &order {
            if !seen.insert(t.as_str()) {
                return Err(invalid(format!("table '{}' appears twice in the join order", t)));
            }
        }
        if order.first() != Some(&rule.source_table) {
            return Err(invalid(format!(
                "join order must start with the source table '{}'",
                rule.source_table
            )));
        }
        if !seen.contains(rule.target_table.as_str()) {
            return Err(invalid(format!(
                "join order does not include the target table '{}'",
                rule.target_table
            )));
        }

        let conditions = match non_empty(&rule.join_conditions) {
            Some(conditions) => conditions,
            None if order.len() > 2 => {
                return Err(invalid("multi-table rules need join_conditions".into()));
            }
            None => {
                if rule.source_columns.is_empty()
                    || rule.source_columns.len() != rule.target_columns.len()
                {
                    return Err(invalid(format!(
                        "{} source columns and {} target columns",
                        rule.source_columns.len(),
                        rule.target_columns.len()
                    )));
                }
                rule.source_columns
                    .iter()
                    .zip(&rule.target_columns)
                    .map(|(s, t)| JoinCondition::new(&rule.source_table, s, &rule.target_table, t))
                    .collect()
            }
        };

        for c in &conditions {
            if !seen.contains(c.left_table.as_str()) || !seen.contains(c.right_table.as_str()) {
                return Err(invalid(format!(
                    "condition {}.{} = {}.{} names a table outside the join order",
                    c.left_table, c.left_column, c.right_table, c.right_column
                )));
            }
            if c.left_table == c.right_table {
                return Err(invalid(format!(
                    "condition on '{}' compares the table with itself",
                    c.left_table
                )));
            }
            if c.left_column.trim().is_empty() || c.right_column.trim().is_empty() {
                return Err(invalid("join condition with an empty column".into()));
            }
        }

        let join_types = rule.join_types.clone().unwrap_or_default();
        let select_columns = rule.select_columns.clone().unwrap_or_default();
        for key in join_types.keys().chain(select_columns.keys()) {
            if !seen.contains(key.as_str()) {
                return Err(invalid(format!("'{}' is not part of the join order", key)));
            }
        }

        let mut tables = Vec::with_capacity(order.len());
        for (i, name) in order.iter().enumerate() {
            let alias = if *name == rule.source_table {
                "s".to_string()
            } else if *name == rule.target_table {
                "t".to_string()
            } else {
                format!("j{}", i)
            };

            let earlier = &order[..i];
            let own: Vec<JoinCondition> = conditions
                .iter()
                .filter(|c| c.touches(name))
                .map(|c| c.oriented_from(if c.left_table == *name { &c.right_table } else { &c.left_table }))
                .filter(|c| earlier.contains(&c.left_table))
                .collect();
            if i > 0 && own.is_empty() {
                return Err(invalid(format!(
                    "'{}' has no join condition to an earlier table",
                    name
                )));
            }

            let join_type = match join_types.get(name) {
                Some(text) => JoinType::from_str(text).map_err(|e| invalid(e))?,
                None => JoinType::Inner,
            };

            tables.push(PlanTable {
                name: name.clone(),
                alias,
                join_type,
                conditions: own,
                columns: select_columns.get(name).cloned().unwrap_or_default(),
            });
        }

        let filters = rule.filter_conditions.clone().unwrap_or_default();
        for f in &filters {
            if !seen.contains(f.table.as_str()) {
                return Err(invalid(format!(
                    "filter on '{}' names a table outside the join order",
                    f.table
                )));
            }
        }

        Ok(Self {
            name: rule.name.clone(),
            source: rule.source_table.clone(),
            target: rule.target_table.clone(),
            tables,
            schema: rule.schema.clone(),
            filters,
            active_flag: rule.active_flag.clone(),
            confidence: rule.confidence,
        })
    }

    fn table(&self, name: &str) -> Option<&PlanTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.table(name).map(|t| t.alias.as_str()).unwrap_or(name)
    }

    fn table_ref(&self, t: &PlanTable) -> TableRef {
        TableRef::new(&t.name)
            .with_schema_opt(self.schema.as_deref())
            .with_alias(&t.alias)
    }

    fn on(&self, conditions: &[JoinCondition]) -> Option<Expr> {
        and_all(conditions.iter().map(|c| {
            table_col(self.alias(&c.left_table), &c.left_column)
                .eq(table_col(self.alias(&c.right_table), &c.right_column))
        }))
    }

    /// Predicates of the filters on any of `tables`.
    fn filter_exprs(&self, tables: &[&str]) -> PlanResult<Vec<Expr>> {
        self.filters
            .iter()
            .filter(|f| tables.contains(&f.table.as_str()))
            .map(|f| filter_expr(self.alias(&f.table), &f.column, f.op, &f.value))
            .collect()
    }

    fn reject_unsupported(&self, dialect: Dialect) -> PlanResult<()> {
        for t in &self.tables[1..] {
            if t.join_type == JoinType::Full && !dialect.supports_full_outer_join() {
                return Err(PlanError::invalid_rule(
                    &self.name,
                    format!("{} does not support FULL OUTER JOIN (table '{}')", dialect, t.name),
                ));
            }
        }
        Ok(())
    }

    /// Rows matched across the whole join chain.
    ///
    /// Outer join types keep their keyword, but null-extended rows are
    /// filtered out so the sample covers the same rows `matched_count_query`
    /// counts.
    pub fn matched_query(&self, limit: Option<u64>) -> PlanResult<Query> {
        let select: Vec<SelectExpr> = self
            .tables
            .iter()
            .flat_map(|t| {
                if t.columns.is_empty() {
                    vec![table_star(&t.alias).into()]
                } else {
                    t.columns
                        .iter()
                        .map(|c| table_col(&t.alias, c).into())
                        .collect::<Vec<SelectExpr>>()
                }
            })
            .collect();

        let mut query = Query::new().select(select).from(self.table_ref(&self.tables[0]));
        for t in &self.tables[1..] {
            let on = self.on(&t.conditions).ok_or_else(|| {
                PlanError::invalid_rule(&self.name, format!("'{}' has no join condition", t.name))
            })?;
            query = query.join(t.join_type, self.table_ref(t), on);
        }
        for e in self.outer_join_guards() {
            query = query.filter(e);
        }
        let all: Vec<&str> = self.tables.iter().map(|t| t.name.as_str()).collect();
        for e in self.filter_exprs(&all)? {
            query = query.filter(e);
        }
        if let Some(n) = limit {
            query = query.limit(n);
        }
        Ok(query)
    }

    /// `IS NOT NULL` on both sides of every outer join's conditions.
    fn outer_join_guards(&self) -> Vec<Expr> {
        let mut seen: Vec<(&str, &str)> = Vec::new();
        for t in self.tables[1..].iter().filter(|t| t.join_type != JoinType::Inner) {
            for c in &t.conditions {
                for key in [
                    (self.alias(&c.left_table), c.left_column.as_str()),
                    (self.alias(&c.right_table), c.right_column.as_str()),
                ] {
                    if !seen.contains(&key) {
                        seen.push(key);
                    }
                }
            }
        }
        seen.into_iter()
            .map(|(alias, column)| table_col(alias, column).is_not_null())
            .collect()
    }

    /// One correlated `EXISTS` subquery per connected group of the tables
    /// other than `outer`.
    fn existence_subqueries(&self, outer: &str) -> PlanResult<Vec<Query>> {
        let rest: Vec<&PlanTable> = self.tables.iter().filter(|t| t.name != outer).collect();
        let inner_conditions: Vec<JoinCondition> = self
            .tables
            .iter()
            .flat_map(|t| t.conditions.iter().cloned())
            .collect();

        // connected components of `rest` ignoring the outer table
        let mut group: Vec<usize> = (0..rest.len()).collect();
        fn find(group: &mut [usize], i: usize) -> usize {
            let mut root = i;
            while group[root] != root {
                root = group[root];
            }
            group[i] = root;
            root
        }
        let index = |name: &str| rest.iter().position(|t| t.name == name);
        for c in inner_conditions.iter().filter(|c| !c.touches(outer)) {
            if let (Some(a), Some(b)) = (index(&c.left_table), index(&c.right_table)) {
                let (ra, rb) = (find(&mut group, a), find(&mut group, b));
                group[ra.max(rb)] = ra.min(rb);
            }
        }

        let mut components: BTreeMap<usize, Vec<&PlanTable>> = BTreeMap::new();
        for i in 0..rest.len() {
            let root = find(&mut group, i);
            components.entry(root).or_default().push(rest[i]);
        }

        components
            .into_values()
            .map(|members| self.existence_subquery(outer, &members, &inner_conditions))
            .collect()
    }

    fn existence_subquery(
        &self,
        outer: &str,
        members: &[&PlanTable],
        conditions: &[JoinCondition],
    ) -> PlanResult<Query> {
        let names: Vec<&str> = members.iter().map(|t| t.name.as_str()).collect();

        let mut placed: Vec<&str> = vec![names[0]];
        let mut query = Query::new()
            .select(vec![lit_int(1)])
            .from(self.table_ref(members[0]));

        while placed.len() < members.len() {
            let next = members.iter().find_map(|t| {
                if placed.contains(&t.name.as_str()) {
                    return None;
                }
                let links: Vec<JoinCondition> = conditions
                    .iter()
                    .filter(|c| c.touches(&t.name))
                    .map(|c| c.oriented_from(if c.left_table == t.name { &c.right_table } else { &c.left_table }))
                    .filter(|c| placed.contains(&c.left_table.as_str()))
                    .collect();
                (!links.is_empty()).then_some((*t, links))
            });
            let (table, links) = next.ok_or_else(|| {
                PlanError::invalid_rule(&self.name, "join conditions do not connect every table")
            })?;
            let on = self.on(&links).ok_or_else(|| {
                PlanError::invalid_rule(&self.name, "join conditions do not connect every table")
            })?;
            query = query.inner_join(self.table_ref(table), on);
            placed.push(&table.name);
        }

        let correlation: Vec<JoinCondition> = conditions
            .iter()
            .filter(|c| c.touches(outer))
            .map(|c| c.oriented_from(outer))
            .filter(|c| names.contains(&c.right_table.as_str()))
            .collect();
        let correlated = self.on(&correlation).ok_or_else(|| {
            PlanError::invalid_rule(
                &self.name,
                format!("no join condition links '{}' to '{}'", outer, names.join(", ")),
            )
        })?;
        query = query.filter(correlated);
        for e in self.filter_exprs(&names)? {
            query = query.filter(e);
        }
        Ok(query)
    }

    fn endpoint_table(&self, endpoint: Endpoint) -> PlanResult<&PlanTable> {
        let name = match endpoint {
            Endpoint::Source => &self.source,
            Endpoint::Target => &self.target,
        };
        self.table(name)
            .ok_or_else(|| PlanError::invalid_rule(&self.name, format!("unknown table '{}'", name)))
    }

    /// `NOT EXISTS` anti-join of one endpoint against the rest of the chain.
    fn unmatched(&self, endpoint: Endpoint, select: Vec<SelectExpr>, limit: Option<u64>) -> PlanResult<Query> {
        let outer = self.endpoint_table(endpoint)?;
        let missing = self
            .existence_subqueries(&outer.name)?
            .into_iter()
            .map(not_exists)
            .reduce(|a, b| a.or(b))
            .ok_or_else(|| PlanError::invalid_rule(&self.name, "rule has a single table"))?;

        let mut query = Query::new()
            .select(select)
            .from(self.table_ref(outer))
            .filter(missing);
        for e in self.filter_exprs(&[outer.name.as_str()])? {
            query = query.filter(e);
        }
        if let Some(n) = limit {
            query = query.limit(n);
        }
        Ok(query)
    }

    /// Endpoint rows with no match in the rest of the chain.
    pub fn unmatched_query(&self, endpoint: Endpoint, limit: Option<u64>) -> PlanResult<Query> {
        let alias = self.endpoint_table(endpoint)?.alias.clone();
        self.unmatched(endpoint, vec![table_star(&alias).into()], limit)
    }

    fn count(&self, table: &PlanTable) -> PlanResult<Query> {
        let mut query = Query::new()
            .select(vec![count_star().alias(COUNT_COLUMN)])
            .from(self.table_ref(table));
        for e in self.filter_exprs(&[table.name.as_str()])? {
            query = query.filter(e);
        }
        Ok(query)
    }

    /// Source rows with at least one match across the chain.
    pub fn matched_count_query(&self) -> PlanResult<Query> {
        let source = self.endpoint_table(Endpoint::Source)?;
        let found = and_all(self.existence_subqueries(&source.name)?.into_iter().map(exists))
            .ok_or_else(|| PlanError::invalid_rule(&self.name, "rule has a single table"))?;
        Ok(self.count(source)?.filter(found))
    }

    /// Source rows whose active flag is not the active value (or is NULL).
    pub fn inactive_count_query(&self) -> PlanResult<Option<Query>> {
        let Some(flag) = &self.active_flag else {
            return Ok(None);
        };
        let source = self.endpoint_table(Endpoint::Source)?;
        let differs = filter_expr(&source.alias, &flag.column, FilterOp::Ne, &flag.active_value)?;
        let missing = table_col(&source.alias, &flag.column).is_null();
        let query = Query::new()
            .select(vec![count_star().alias(COUNT_COLUMN)])
            .from(self.table_ref(source))
            .filter(differs.or(missing).paren());
        Ok(Some(query))
    }

    /// Every statement for one run; `limit` caps the row samples.
    pub fn queries(&self, dialect: Dialect, limit: Option<u64>) -> PlanResult<RuleQueries> {
        self.reject_unsupported(dialect)?;
        let count = || vec![SelectExpr::from(count_star()).with_alias(COUNT_COLUMN)];
        Ok(RuleQueries {
            matched: self.matched_query(limit)?,
            unmatched_source: self.unmatched_query(Endpoint::Source, limit)?,
            unmatched_target: self.unmatched_query(Endpoint::Target, limit)?,
            source_count: self.count(self.endpoint_table(Endpoint::Source)?)?,
            target_count: self.count(self.endpoint_table(Endpoint::Target)?)?,
            matched_count: self.matched_count_query()?,
            unmatched_source_count: self.unmatched(Endpoint::Source, count(), None)?,
            unmatched_target_count: self.unmatched(Endpoint::Target, count(), None)?,
            inactive_count: self.inactive_count_query()?,
        })
    }

    /// Matched query as SQL text.
    pub fn matched_sql(&self, dialect: Dialect, limit: Option<u64>) -> PlanResult<String> {
        self.reject_unsupported(dialect)?;
        Ok(self.matched_query(limit)?.to_sql(dialect))
    }
}
