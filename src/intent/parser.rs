//! Natural-language front end.
//!
//! [`IntentParser`] is the seam for anything that turns a question into a
//! [`PartialIntent`]. Its output is never trusted: it goes through the
//! [`IntentBuilder`](super::IntentBuilder) like any hand-written intent.
//!
//! [`RuleBasedParser`] is the built-in implementation. It understands a
//! small, predictable grammar:
//!
//! ```text
//! [top N] <source> (not in | missing from | without) <target>
//! [top N] <source> (in | found in) <target>
//! [top N] <source> matching <target>
//! count of <source> [by <column>]
//! <source>
//!     [include <col> from <table>, <table>.<col>, <col> ...]
//!     [where <col> <op> <value> and ...]
//!     [limit N]
//! ```

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{
    AggregateFunction, FilterOp, FilterValue, Operation, PartialFilter, PartialIntent,
    RequestedColumn,
};
use crate::error::{PlanError, PlanResult};
use crate::graph::KnowledgeGraph;

/// Confidence of a parse that found a source/target comparison.
const COMPARISON_CONFIDENCE: f64 = 0.9;

/// Confidence of a parse that fell back to a plain selection.
const FILTER_CONFIDENCE: f64 = 0.7;

static LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:limit|top|first)\s+(\d+)\b").unwrap());

static CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(include|including|where)\b").unwrap());

static LEADING_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:(?:show|list|find|get|return|select|give)\s+)?(?:me\s+)?(?:all\s+)?(?:the\s+)?(?:(?:records|rows|entries)\s+)?(?:(?:in|from|of)\s+)?",
    )
    .unwrap()
});

static COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:count|number)\s+(?:of\s+)?(?:(?:records|rows)\s+(?:in\s+)?)?(.+?)(?:\s+by\s+([\w.]+))?$")
        .unwrap()
});

static NOT_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.+?)\s+(?:not\s+in|missing\s+from|absent\s+from|without(?:\s+a\s+match\s+in)?)\s+(.+)$")
        .unwrap()
});

static MATCHING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.+?)\s+(?:matching|matched\s+to|joined\s+to|joined\s+with)\s+(.+)$").unwrap()
});

static IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.+?)\s+(?:in|found\s+in|present\s+in|also\s+in)\s+(.+)$").unwrap()
});

static COLUMN_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\w+)\s+(?:from|of)\s+(.+)$").unwrap());

static DOTTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\w+)\.(\w+)$").unwrap());

static CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:(\w+)\.)?(\w+)\s*(is\s+not\s+null|is\s+null|not\s+in\b|in\b|like\b|!=|<>|>=|<=|==|=|>|<)\s*(.*)$",
    )
    .unwrap()
});

// ============================================================================
// Vocabulary
// ============================================================================

/// A table as the parser sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyTable {
    pub name: String,
    pub aliases: Vec<String>,
    pub columns: Vec<String>,
}

/// Names a parser may use: tables, their aliases and their columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub tables: Vec<VocabularyTable>,
}

impl Vocabulary {
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        let mut tables: Vec<VocabularyTable> = graph
            .tables()
            .map(|t| VocabularyTable {
                name: t.name.clone(),
                aliases: t.aliases.clone(),
                columns: t.column_names(),
            })
            .collect();
        for (alias, target) in graph.aliases() {
            if let Some(t) = tables.iter_mut().find(|t| t.name == target) {
                if !t.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias)) {
                    t.aliases.push(alias.to_string());
                }
            }
        }
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Self { tables }
    }

    /// Tables that have a column with this name (case-insensitive).
    pub fn tables_with_column(&self, column: &str) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.columns.iter().any(|c| c.eq_ignore_ascii_case(column)))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Does `term` name this table directly or through an alias?
    fn names(table: &VocabularyTable, term: &str) -> bool {
        table.name.eq_ignore_ascii_case(term)
            || table.aliases.iter().any(|a| a.eq_ignore_ascii_case(term))
    }
}

// ============================================================================
// Parser trait
// ============================================================================

/// What a parser produced, with its own confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub intent: PartialIntent,
    pub confidence: f64,
}

/// Turns free text into a partial intent.
#[async_trait]
pub trait IntentParser: Send + Sync {
    async fn parse(&self, text: &str, vocabulary: &Vocabulary) -> PlanResult<ParsedIntent>;
}

/// Deterministic keyword parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedParser;

impl RuleBasedParser {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous entry point used by the trait impl.
    pub fn parse_text(&self, text: &str, vocabulary: &Vocabulary) -> PlanResult<ParsedIntent> {
        let text = text.trim().trim_end_matches(['?', '.', '!', ';']).trim();
        if text.is_empty() {
            return Err(PlanError::InvalidIntent("nothing to parse".into()));
        }

        let mut limit = None;
        let found = LIMIT
            .captures_iter(text)
            .find(|caps| caps.get(0).is_some_and(|m| !in_quotes(text, m.start())));
        let text = match found {
            Some(caps) => {
                let n = &caps[1];
                limit = Some(n.parse::<u64>().map_err(|_| {
                    PlanError::InvalidIntent(format!("row limit '{}' is out of range", n))
                })?);
                let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
                format!("{} {}", &text[..whole.start], &text[whole.end..])
            }
            None => text.to_string(),
        };

        let mut clauses = split_clauses(&text);
        let core = clauses.remove(0).1;
        let mut intent = parse_core(core.trim())?;
        intent.limit = limit;

        for (keyword, body) in clauses {
            if keyword.eq_ignore_ascii_case("where") {
                for cond in split_conjunction(body) {
                    intent.filters.push(parse_condition(cond)?);
                }
            } else {
                for item in split_items(body) {
                    let column = parse_column(item, &intent, vocabulary)?;
                    intent.columns.push(column);
                }
            }
        }

        let confidence = if matches!(intent.operation, Operation::Filter) {
            FILTER_CONFIDENCE
        } else {
            COMPARISON_CONFIDENCE
        };
        intent.confidence = Some(confidence);
        Ok(ParsedIntent { intent, confidence })
    }
}

#[async_trait]
impl IntentParser for RuleBasedParser {
    async fn parse(&self, text: &str, vocabulary: &Vocabulary) -> PlanResult<ParsedIntent> {
        self.parse_text(text, vocabulary)
    }
}

// ============================================================================
// Grammar
// ============================================================================

/// Split into `("", core)` followed by `(keyword, body)` pairs.
fn split_clauses(text: &str) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let mut keyword = "";
    let mut start = 0;
    for m in CLAUSE.find_iter(text) {
        if in_quotes(text, m.start()) {
            continue;
        }
        out.push((keyword, &text[start..m.start()]));
        keyword = m.as_str();
        start = m.end();
    }
    out.push((keyword, &text[start..]));
    out
}

fn parse_core(core: &str) -> PlanResult<PartialIntent> {
    if let Some(caps) = COUNT.captures(core) {
        let source = clean_term(&caps[1]);
        let group_by = caps
            .get(2)
            .map(|m| vec![last_segment(m.as_str()).to_string()])
            .unwrap_or_default();
        return Ok(PartialIntent::new(
            Operation::Aggregate {
                function: AggregateFunction::Count,
                column: None,
                group_by,
            },
            source,
        ));
    }

    let core = LEADING_NOISE.replace(core, "");
    let core = core.trim();
    if core.is_empty() {
        return Err(PlanError::InvalidIntent("no table named".into()));
    }

    let patterns: [(&Regex, Operation); 3] = [
        (&*NOT_IN, Operation::NotIn),
        (&*MATCHING, Operation::Equals),
        (&*IN, Operation::In),
    ];
    for (re, op) in patterns {
        if let Some(caps) = re.captures(core) {
            return Ok(
                PartialIntent::new(op, clean_term(&caps[1])).with_target(clean_term(&caps[2]))
            );
        }
    }
    Ok(PartialIntent::new(Operation::Filter, clean_term(core)))
}

fn parse_column(
    item: &str,
    intent: &PartialIntent,
    vocabulary: &Vocabulary,
) -> PlanResult<RequestedColumn> {
    if let Some(caps) = COLUMN_FROM.captures(item) {
        return Ok(RequestedColumn::new(clean_term(&caps[2]), &caps[1]));
    }
    if let Some(caps) = DOTTED.captures(item) {
        return Ok(RequestedColumn::new(&caps[1], &caps[2]));
    }

    let column = clean_term(item);
    let owners = vocabulary.tables_with_column(&column);
    let named = |term: &str| {
        vocabulary
            .tables
            .iter()
            .find(|t| Vocabulary::names(t, term) && owners.contains(&t.name.as_str()))
            .map(|t| t.name.clone())
    };
    let table = match owners.as_slice() {
        [only] => only.to_string(),
        [] => {
            return Err(PlanError::InvalidIntent(format!(
                "no table has a column named '{}'",
                column
            )))
        }
        _ => named(&intent.source)
            .or_else(|| intent.target.as_deref().and_then(named))
            .ok_or_else(|| {
                PlanError::InvalidIntent(format!(
                    "column '{}' is ambiguous (found on: {}); use <table>.{}",
                    column,
                    owners.join(", "),
                    column
                ))
            })?,
    };
    Ok(RequestedColumn::new(table, column))
}

fn parse_condition(cond: &str) -> PlanResult<PartialFilter> {
    let caps = CONDITION.captures(cond.trim()).ok_or_else(|| {
        PlanError::InvalidIntent(format!("cannot read condition '{}'", cond.trim()))
    })?;

    let op_text = caps[3].to_lowercase();
    let op_text = op_text.split_whitespace().collect::<Vec<_>>().join(" ");
    let op = match op_text.as_str() {
        "=" | "==" => FilterOp::Eq,
        "!=" | "<>" => FilterOp::Ne,
        ">" => FilterOp::Gt,
        ">=" => FilterOp::Gte,
        "<" => FilterOp::Lt,
        "<=" => FilterOp::Lte,
        "like" => FilterOp::Like,
        "in" => FilterOp::In,
        "not in" => FilterOp::NotIn,
        "is null" => FilterOp::IsNull,
        "is not null" => FilterOp::IsNotNull,
        other => {
            return Err(PlanError::InvalidIntent(format!(
                "unknown operator '{}'",
                other
            )))
        }
    };

    let raw = caps.get(4).map(|m| m.as_str().trim()).unwrap_or("");
    let value = match op {
        FilterOp::IsNull | FilterOp::IsNotNull => FilterValue::Null,
        _ if raw.is_empty() => {
            return Err(PlanError::InvalidIntent(format!(
                "condition '{}' has no value",
                cond.trim()
            )))
        }
        _ => parse_value(raw),
    };

    Ok(PartialFilter {
        table: caps.get(1).map(|m| m.as_str().to_string()),
        column: caps[2].to_string(),
        op,
        value,
    })
}

fn parse_value(raw: &str) -> FilterValue {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        return FilterValue::List(split_items(inner).into_iter().map(parse_value).collect());
    }
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            let doubled = format!("{}{}", quote, quote);
            return FilterValue::String(raw[1..raw.len() - 1].replace(&doubled, &quote.to_string()));
        }
    }
    match raw.to_lowercase().as_str() {
        "null" => return FilterValue::Null,
        "true" => return FilterValue::Bool(true),
        "false" => return FilterValue::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return FilterValue::Int(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return FilterValue::Float(f);
        }
    }
    FilterValue::String(raw.to_string())
}

// ============================================================================
// Text helpers
// ============================================================================

fn in_quotes(text: &str, pos: usize) -> bool {
    let mut quote = None;
    for (i, c) in text.char_indices() {
        if i >= pos {
            break;
        }
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    quote.is_some()
}

/// Split on ` and ` outside quotes.
fn split_conjunction(text: &str) -> Vec<&str> {
    let lower = text.to_ascii_lowercase();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut from = 0;
    while let Some(found) = lower[from..].find(" and ") {
        let at = from + found;
        if !in_quotes(text, at) {
            parts.push(&text[start..at]);
            start = at + " and ".len();
        }
        from = at + " and ".len();
    }
    parts.push(&text[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

/// Split a list on commas (and ` and `) outside quotes.
fn split_items(text: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == ',' && !in_quotes(text, i) {
            items.push(&text[start..i]);
            start = i + 1;
        }
    }
    items.push(&text[start..]);
    items
        .into_iter()
        .flat_map(split_conjunction)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Trim articles, quotes and a trailing "table" from a table term.
fn clean_term(term: &str) -> String {
    let mut t = term.trim().trim_matches(|c: char| c == '`' || c == '"' || c == '\'').trim();
    for article in ["the ", "The ", "THE "] {
        if let Some(rest) = t.strip_prefix(article) {
            t = rest.trim();
        }
    }
    for suffix in [" table", " Table", " TABLE"] {
        if let Some(rest) = t.strip_suffix(suffix) {
            t = rest.trim();
        }
    }
    t.to_string()
}

fn last_segment(s: &str) -> &str {
    s.rsplit('.').next().unwrap_or(s)
}
