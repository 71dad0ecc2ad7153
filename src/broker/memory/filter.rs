//! Minimal message selectors for the in-memory broker
//!
//! Supports conjunctions of property comparisons:
//! `color = 'red' AND region <> 'eu'`. Anything richer is rejected when the
//! queue or consumer is created.

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::types::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Comparison {
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    property: String,
    comparison: Comparison,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Selector {
    clauses: Vec<Clause>,
}

impl Selector {
    pub(crate) fn parse(expression: &str) -> BrokerResult<Self> {
        let invalid = |message: &str| BrokerError::InvalidFilter {
            expression: expression.to_string(),
            message: message.to_string(),
        };

        if expression.trim().is_empty() {
            return Err(invalid("expression is empty"));
        }

        let mut clauses = Vec::new();
        for raw in split_conjunction(expression) {
            let (property, comparison, value) = if let Some((left, right)) = raw.split_once("<>") {
                (left, Comparison::NotEquals, right)
            } else if let Some((left, right)) = raw.split_once('=') {
                (left, Comparison::Equals, right)
            } else {
                return Err(invalid("expected '=' or '<>'"));
            };

            let property = property.trim();
            if property.is_empty() || property.contains(char::is_whitespace) {
                return Err(invalid("property name must be a single identifier"));
            }

            let value = value.trim();
            let value = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .ok_or_else(|| invalid("value must be a single-quoted string"))?;

            clauses.push(Clause {
                property: property.to_string(),
                comparison,
                value: value.to_string(),
            });
        }

        Ok(Self { clauses })
    }

    pub(crate) fn matches(&self, message: &Message) -> bool {
        self.clauses.iter().all(|clause| {
            let actual = message.property(&clause.property);
            match clause.comparison {
                Comparison::Equals => actual == Some(clause.value.as_str()),
                Comparison::NotEquals => actual != Some(clause.value.as_str()),
            }
        })
    }
}

// Split on the AND keyword, case-insensitively, outside of quoted values
fn split_conjunction(expression: &str) -> Vec<&str> {
    let bytes = expression.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_quotes = !in_quotes,
            b' ' if !in_quotes
                && i + 5 <= bytes.len()
                && bytes[i + 1..i + 4].eq_ignore_ascii_case(b"and")
                && bytes[i + 4] == b' ' =>
            {
                parts.push(&expression[start..i]);
                start = i + 5;
                i += 4;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expression[start..]);
    parts
}
