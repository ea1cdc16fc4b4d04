//! Field expressions used by object and namespace selectors
//!
//! Two flavours share one entry point:
//!
//! - plain comparisons (`spec.replicas>=2`, `!metadata.deletionTimestamp`),
//!   see [`comparator`];
//! - expressions with `{{path}}` placeholders, compiled and run by the
//!   expression language in [`parser`] / [`interpreter`], e.g.
//!   `any({{spec.containers.#.resources.requests}}, { MemoryToNumber(.memory) > MemoryToNumber('64Mi') })`.
//!
//! Anything that fails to parse or evaluate, or yields a non-boolean, does
//! not match.

pub mod comparator;
pub mod functions;
pub mod interpreter;
pub mod parser;
pub mod path;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::warn;

use self::functions::QuantityParser;
use self::interpreter::{Interpreter, Value};

const PLACEHOLDER_PATTERN: &str = r"\{\{([^{}]*)\}\}";

/// Errors raised while parsing or evaluating an expression
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("unknown function {0:?}")]
    UnknownFunction(String),

    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),

    #[error("invalid pattern: {0}")]
    Pattern(String),
}

impl From<regex::Error> for ExpressionError {
    fn from(error: regex::Error) -> Self {
        ExpressionError::Pattern(error.to_string())
    }
}

/// Evaluates selector expressions against object manifests
///
/// Built once at startup and shared by every reconcile.
#[derive(Debug, Clone)]
pub struct Evaluator {
    placeholder: Regex,
    quantities: QuantityParser,
}

impl Evaluator {
    pub fn new() -> Result<Self, ExpressionError> {
        Ok(Self {
            placeholder: Regex::new(PLACEHOLDER_PATTERN)?,
            quantities: QuantityParser::new()?,
        })
    }

    /// Quantity parser shared with resource comparisons
    #[must_use]
    pub fn quantities(&self) -> &QuantityParser {
        &self.quantities
    }

    /// Whether `manifest` satisfies `expression`; failures count as no match
    pub fn matches(&self, expression: &str, manifest: &serde_json::Value) -> bool {
        self.matches_at(expression, manifest, Utc::now())
    }

    /// [`matches`](Self::matches) with a fixed value for `Now()`
    pub fn matches_at(&self, expression: &str, manifest: &serde_json::Value, now: DateTime<Utc>) -> bool {
        match self.evaluate_at(expression, manifest, now) {
            Ok(matched) => matched,
            Err(e) => {
                warn!("Expression {:?} does not match: {}", expression, e);
                false
            }
        }
    }

    /// Evaluate `expression`, surfacing parse and evaluation errors
    pub fn evaluate_at(
        &self,
        expression: &str,
        manifest: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, ExpressionError> {
        if !expression.contains("{{") {
            return comparator::evaluate(manifest, expression);
        }

        let (rewritten, variables) = self.bind_placeholders(expression, manifest);
        let program = parser::parse(&rewritten)?;
        match Interpreter::new(&variables, &self.quantities, now).eval(&program)? {
            Value::Bool(result) => Ok(result),
            _ => Ok(false),
        }
    }

    /// Replace each distinct `{{path}}` by `varN` bound to the resolved value
    fn bind_placeholders(&self, expression: &str, manifest: &serde_json::Value) -> (String, BTreeMap<String, Value>) {
        let mut names: BTreeMap<String, String> = BTreeMap::new();
        let mut variables = BTreeMap::new();

        let rewritten = self.placeholder.replace_all(expression, |captures: &regex::Captures<'_>| {
            let path = captures[1].trim().to_string();
            if let Some(name) = names.get(&path) {
                return name.clone();
            }
            let name = format!("var{}", names.len());
            let value = path::resolve(manifest, &path).map_or(Value::Nil, Value::from);
            variables.insert(name.clone(), value);
            names.insert(path, name.clone());
            name
        });
        (rewritten.into_owned(), variables)
    }
}
