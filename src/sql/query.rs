//! Query builder - construct SQL queries with a fluent API.

use std::str::FromStr;

use super::dialect::{Dialect, LimitStyle, SqlDialect};
use super::expr::{BinaryOperator, Expr, ExprExt};
use super::token::{Token, TokenStream};

// =============================================================================
// Select Expression (column with optional alias)
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.expr.to_tokens_for_dialect(dialect);
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

// =============================================================================
// Table Reference
// =============================================================================

/// A table reference with optional schema and alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: &str) -> Self {
        Self {
            schema: None,
            table: table.into(),
            alias: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set the schema only when one is given.
    pub fn with_schema_opt(mut self, schema: Option<&str>) -> Self {
        self.schema = schema.map(String::from);
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Render as `table [AS] alias`; Oracle rejects `AS` before a table alias.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::QualifiedIdent {
            schema: self.schema.clone(),
            name: self.table.clone(),
        });
        if let Some(alias) = &self.alias {
            ts.space();
            if dialect.table_alias_uses_as() {
                ts.push(Token::As).space();
            }
            ts.push(Token::Ident(alias.clone()));
        }
        ts
    }
}

// =============================================================================
// Joins
// =============================================================================

/// Type of join. Every join carries an ON condition; there is no cross join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl FromStr for JoinType {
    type Err = String;

    /// Accepts `inner`, `left`, `left outer`, `right join`, `FULL OUTER JOIN`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<String> = s
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| w != "join" && w != "outer")
            .collect();
        match words.as_slice() {
            [] => Ok(JoinType::Inner),
            [w] if w == "inner" => Ok(JoinType::Inner),
            [w] if w == "left" => Ok(JoinType::Left),
            [w] if w == "right" => Ok(JoinType::Right),
            [w] if w == "full" => Ok(JoinType::Full),
            _ => Err(format!("unsupported join type '{}'", s)),
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Expr,
}

impl Join {
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        match self.join_type {
            JoinType::Inner => ts.push(Token::Inner),
            JoinType::Left => ts.push(Token::Left),
            JoinType::Right => ts.push(Token::Right),
            JoinType::Full => ts.push(Token::Full).space().push(Token::Outer),
        };

        ts.space().push(Token::Join).space();
        ts.append(&self.table.to_tokens_for_dialect(dialect));
        ts.space().push(Token::On).space();
        ts.append(&self.on.to_tokens_for_dialect(dialect));

        ts
    }
}

// =============================================================================
// Query Builder
// =============================================================================

/// A SELECT query.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Query has no effect until converted to SQL with to_sql() or to_tokens()"]
pub struct Query {
    pub select: Vec<SelectExpr>,
    pub distinct: bool,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    /// Row limit, placed according to the dialect's `LimitStyle`.
    pub limit: Option<u64>,
}

impl Query {
    /// Create a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SELECT list.
    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.select = exprs.into_iter().map(|e| e.into()).collect();
        self
    }

    /// SELECT *
    pub fn select_star(mut self) -> Self {
        self.select = vec![SelectExpr::new(crate::sql::expr::star())];
        self
    }

    /// Add DISTINCT.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Set the FROM table.
    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    /// Add a JOIN.
    pub fn join(mut self, join_type: JoinType, table: TableRef, on: Expr) -> Self {
        self.joins.push(Join {
            join_type,
            table,
            on,
        });
        self
    }

    /// Add an INNER JOIN.
    pub fn inner_join(self, table: TableRef, on: Expr) -> Self {
        self.join(JoinType::Inner, table, on)
    }

    /// Add a LEFT JOIN.
    pub fn left_join(self, table: TableRef, on: Expr) -> Self {
        self.join(JoinType::Left, table, on)
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    ///
    /// OR expressions on either side are parenthesized so AND precedence
    /// can't split them.
    pub fn filter(mut self, condition: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => guard_or(existing).and(guard_or(condition)),
            None => condition,
        });
        self
    }

    /// Set the GROUP BY clause.
    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    /// Set the row limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Does any table reference in this query (or its subqueries) carry a schema?
    pub fn has_schema(&self) -> bool {
        let mut probe = self.clone();
        probe.table_refs_mut().iter().any(|t| t.schema.is_some())
    }

    /// A copy of this query with every schema qualifier removed, including
    /// those inside EXISTS subqueries.
    pub fn without_schemas(&self) -> Query {
        let mut q = self.clone();
        for table in q.table_refs_mut() {
            table.schema = None;
        }
        q
    }

    fn table_refs_mut(&mut self) -> Vec<&mut TableRef> {
        let mut refs: Vec<&mut TableRef> = Vec::new();
        if let Some(from) = self.from.as_mut() {
            refs.push(from);
        }
        for join in self.joins.iter_mut() {
            refs.push(&mut join.table);
        }
        if let Some(where_clause) = self.where_clause.as_mut() {
            for sub in where_clause.subqueries_mut() {
                refs.extend(sub.table_refs_mut());
            }
        }
        refs
    }

    /// Convert to token stream (default dialect).
    pub fn to_tokens(&self) -> TokenStream {
        self.to_tokens_for_dialect(Dialect::default())
    }

    /// Convert to token stream for a specific dialect.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        let limit_style = dialect.limit_style();

        // SELECT
        ts.push(Token::Select);
        if self.distinct {
            ts.space().push(Token::Distinct);
        }
        if let (Some(n), LimitStyle::Top) = (self.limit, limit_style) {
            ts.space().append(&dialect.emit_limit(n));
        }

        // Columns
        for (i, select_expr) in self.select.iter().enumerate() {
            if i == 0 {
                ts.newline().indent(1);
            } else {
                ts.comma().newline().indent(1);
            }
            ts.append(&select_expr.to_tokens_for_dialect(dialect));
        }

        // FROM
        if let Some(from) = &self.from {
            ts.newline().push(Token::From).space();
            ts.append(&from.to_tokens_for_dialect(dialect));
        }

        // JOINs
        for join in &self.joins {
            ts.newline();
            ts.append(&join.to_tokens_for_dialect(dialect));
        }

        // WHERE (Oracle's ROWNUM limit rides along here)
        let rownum = match (self.limit, limit_style) {
            (Some(n), LimitStyle::RowNum) => Some(dialect.emit_limit(n)),
            _ => None,
        };
        match (&self.where_clause, rownum) {
            (Some(where_clause), rownum) => {
                ts.newline().push(Token::Where).space();
                match rownum {
                    Some(limit) => {
                        ts.append(&guard_or(where_clause.clone()).to_tokens_for_dialect(dialect));
                        ts.space().push(Token::And).space().append(&limit);
                    }
                    None => {
                        ts.append(&where_clause.to_tokens_for_dialect(dialect));
                    }
                }
            }
            (None, Some(limit)) => {
                ts.newline().push(Token::Where).space().append(&limit);
            }
            (None, None) => {}
        }

        // GROUP BY
        if !self.group_by.is_empty() {
            ts.newline().push(Token::GroupBy).space();
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&expr.to_tokens_for_dialect(dialect));
            }
        }

        // LIMIT
        if let (Some(n), LimitStyle::Trailing) = (self.limit, limit_style) {
            ts.newline().append(&dialect.emit_limit(n));
        }

        ts
    }

    /// Generate SQL string for a specific dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens_for_dialect(dialect).serialize(dialect)
    }
}

impl std::fmt::Display for Query {
    /// Formats the query using the default dialect (PostgreSQL).
    ///
    /// For dialect-specific SQL, use [`Query::to_sql`] instead.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql(Dialect::default()))
    }
}

fn guard_or(expr: Expr) -> Expr {
    match expr {
        Expr::BinaryOp {
            op: BinaryOperator::Or,
            ..
        } => expr.paren(),
        other => other,
    }
}

// =============================================================================
// Tests
// =============================================================================
