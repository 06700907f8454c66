//! Task filter - a pure predicate over task names and static metadata.
//!
//! Expressions (all must match):
//! - `key=value`   metadata value equals `value` (arrays match if any element does)
//! - `key!=value`  negation of the above; a missing key matches
//! - `pattern`     glob on the task name, or a member of the `tags` array

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use glob::Pattern;
use serde_json::Value;

use crate::error::{EvalLoopError, Result};

/// Static metadata attached to a task.
pub type TaskMetadata = BTreeMap<String, Value>;

/// Metadata key holding a task's tags.
pub const TAGS_KEY: &str = "tags";

#[derive(Debug, Clone)]
enum Clause {
    Equals(String, String),
    NotEquals(String, String),
    Name(Pattern),
}

impl Clause {
    fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(EvalLoopError::Registry("empty filter expression".into()));
        }
        if let Some((key, value)) = expr.split_once("!=") {
            return Ok(Clause::NotEquals(non_empty_key(key, expr)?, value.trim().to_string()));
        }
        if let Some((key, value)) = expr.split_once('=') {
            return Ok(Clause::Equals(non_empty_key(key, expr)?, value.trim().to_string()));
        }
        let pattern = Pattern::new(expr)
            .map_err(|e| EvalLoopError::Registry(format!("invalid name pattern '{}': {}", expr, e)))?;
        Ok(Clause::Name(pattern))
    }

    fn matches(&self, name: &str, metadata: &TaskMetadata) -> bool {
        match self {
            Clause::Equals(key, expected) => metadata.get(key).is_some_and(|v| value_matches(v, expected)),
            Clause::NotEquals(key, expected) => metadata.get(key).is_none_or(|v| !value_matches(v, expected)),
            Clause::Name(pattern) => {
                pattern.matches(name)
                    || metadata
                        .get(TAGS_KEY)
                        .is_some_and(|tags| value_matches(tags, pattern.as_str()))
            }
        }
    }
}

fn non_empty_key(key: &str, expr: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(EvalLoopError::Registry(format!("missing key in filter '{}'", expr)));
    }
    Ok(key.to_string())
}

fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Array(items) => items.iter().any(|item| value_matches(item, expected)),
        other => other.to_string() == expected,
    }
}

/// Conjunction of filter expressions. An empty filter matches every task.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    clauses: Vec<Clause>,
    source: Vec<String>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a list of expressions, e.g. from repeated `--filter` flags.
    pub fn parse<I, T>(exprs: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut filter = Self::default();
        for expr in exprs {
            let expr = expr.as_ref();
            filter.clauses.push(Clause::parse(expr)?);
            filter.source.push(expr.trim().to_string());
        }
        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, name: &str, metadata: &TaskMetadata) -> bool {
        self.clauses.iter().all(|c| c.matches(name, metadata))
    }
}

impl FromStr for TaskFilter {
    type Err = EvalLoopError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s.split(',').filter(|part| !part.trim().is_empty()))
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.source.join(","))
        }
    }
}
