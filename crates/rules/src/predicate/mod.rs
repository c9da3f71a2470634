//! JMESPath-style predicate language evaluated against a resource's JSON document.
//!
//! Supported: field paths, quoted identifiers, `@`, index and slice access,
//! `[*]`/`*`/`[]` projections, `[?cond]` filters, comparisons, `&&`/`||`/`!`,
//! pipes, multi-select lists and hashes, raw and JSON literals, and the standard
//! built-in functions, including `&expr` keys for `map`, `sort_by`, `max_by` and `min_by`.

use serde_json::Value;
use thiserror::Error;

mod ast;
mod eval;
mod functions;
mod lexer;
mod parser;

pub use eval::is_truthy;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

impl PredicateError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        PredicateError::Syntax { offset, message: message.into() }
    }
}

/// A compiled predicate. Compilation validates syntax, function names and arity.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: ast::Ast,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, PredicateError> {
        let ast = parser::parse(source)?;
        Ok(Self { source: source.to_string(), ast })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn search(&self, data: &Value) -> Result<Value, PredicateError> {
        eval::evaluate(&self.ast, data)
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
