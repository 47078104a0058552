//! Planning errors shared by the graph, resolver, intent, SQL generator
//! and reconciliation layers.
//!
//! Every message is meant to be shown to an end user as-is.

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Error raised while turning an intent or rule into SQL.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    /// A table term matched nothing in the graph.
    #[error("table '{term}' not found{}", did_you_mean(.suggestions))]
    TableNotFound {
        term: String,
        suggestions: Vec<String>,
    },

    /// A column does not exist on its table.
    #[error("column '{column}' not found on table '{table}' (available: {})", list_or_none(.available))]
    ColumnNotFound {
        table: String,
        column: String,
        available: Vec<String>,
    },

    /// No chain of relationships connects the two tables.
    #[error(
        "no join path from '{from}' to '{to}' within {max_hops} hops ('{from}' connects to: {}; '{to}' connects to: {})",
        list_or_none(.from_neighbors),
        list_or_none(.to_neighbors)
    )]
    JoinPathNotFound {
        from: String,
        to: String,
        max_hops: usize,
        from_neighbors: Vec<String>,
        to_neighbors: Vec<String>,
    },

    /// SQL could not be produced without guessing a join.
    #[error("SQL generation failed: {0}")]
    SqlGeneration(String),

    /// The intent is structurally invalid.
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    /// A reconciliation rule is inconsistent.
    #[error("invalid rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },
}

impl PlanError {
    pub fn invalid_rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        PlanError::InvalidRule {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

fn did_you_mean(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!("; did you mean: {}?", suggestions.join(", "))
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".into()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_not_found_message() {
        let err = PlanError::TableNotFound {
            term: "gpu".into(),
            suggestions: vec!["RBP_GPU".into(), "OPS_EXCEL_GPU".into()],
        };
        assert_eq!(
            err.to_string(),
            "table 'gpu' not found; did you mean: RBP_GPU, OPS_EXCEL_GPU?"
        );

        let err = PlanError::TableNotFound {
            term: "zzz".into(),
            suggestions: vec![],
        };
        assert_eq!(err.to_string(), "table 'zzz' not found");
    }

    #[test]
    fn test_join_path_message_lists_neighbors() {
        let err = PlanError::JoinPathNotFound {
            from: "A".into(),
            to: "D".into(),
            max_hops: 5,
            from_neighbors: vec!["B".into()],
            to_neighbors: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("within 5 hops"));
        assert!(msg.contains("'A' connects to: B"));
        assert!(msg.contains("'D' connects to: none"));
    }
}
