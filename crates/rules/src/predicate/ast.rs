use serde_json::Value;

use super::functions::Function;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Compiled predicate tree. Projections carry their right-hand side so that
/// `a[*].b` and `a[?x].b` apply `b` per element.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    /// `@`
    Identity,
    Field(String),
    Index(i64),
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
    Literal(Value),
    /// Evaluate the right side against the result of the left side.
    Subexpr(Box<Ast>, Box<Ast>),
    /// Evaluate the right side against every element of the (array) left side,
    /// dropping nulls.
    Projection(Box<Ast>, Box<Ast>),
    ObjectValues(Box<Ast>),
    Flatten(Box<Ast>),
    /// Filter step: right side only if the condition is truthy, else null.
    Condition(Box<Ast>, Box<Ast>),
    Compare(Comparator, Box<Ast>, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Not(Box<Ast>),
    MultiList(Vec<Ast>),
    MultiHash(Vec<(String, Ast)>),
    Call(Function, Vec<Ast>),
    /// `&expr`: only valid as the key argument of a higher-order function.
    ExprRef(Box<Ast>),
}
