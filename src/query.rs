//! Filter expressions over aggregated values, used by `search_value`.
//!
//! A query is a JSON object tree. A binary operator applied to a scalar
//! compares the measured value against it (`{">": 4}`); applied to a pair it
//! compares two sub-expressions, where a bare number is a constant and a
//! nested object is evaluated against the measured value
//! (`{"=": [{"%": 5}, 0]}`). `and`/`or` take a list of sub-expressions,
//! `not` a single one. The empty object matches nothing.

use serde_json::Value;

use crate::errors::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "=" | "==" | "eq" => Some(BinOp::Eq),
            "!=" | "≠" | "ne" => Some(BinOp::Ne),
            "<" | "lt" => Some(BinOp::Lt),
            "<=" | "≤" | "le" => Some(BinOp::Le),
            ">" | "gt" => Some(BinOp::Gt),
            ">=" | "≥" | "ge" => Some(BinOp::Ge),
            "+" | "add" => Some(BinOp::Add),
            "-" | "sub" => Some(BinOp::Sub),
            "*" | "×" | "mul" => Some(BinOp::Mul),
            "/" | "÷" | "div" => Some(BinOp::Div),
            "%" | "mod" => Some(BinOp::Mod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    /// The measured value.
    Value,
    /// A literal number.
    Literal(f64),
    Binary(BinOp, Box<Node>, Box<Node>),
    All(Vec<Node>),
    Any(Vec<Node>),
    Not(Box<Node>),
    /// The empty query; matches nothing.
    Nothing,
}

/// Result of evaluating a sub-expression: comparisons and combinators yield
/// booleans, arithmetic yields numbers. Truthiness follows the usual rules
/// (a number is true when non-zero).
#[derive(Debug, Clone, Copy)]
enum Evaluated {
    Number(f64),
    Boolean(bool),
}

impl Evaluated {
    fn truthy(self) -> bool {
        match self {
            Evaluated::Number(n) => n != 0.0,
            Evaluated::Boolean(b) => b,
        }
    }

    fn as_number(self) -> f64 {
        match self {
            Evaluated::Number(n) => n,
            Evaluated::Boolean(b) => b as u8 as f64,
        }
    }
}

/// A compiled filter expression; a pure `f64 -> bool` predicate.
#[derive(Debug, Clone)]
pub struct MeasureQuery {
    root: Node,
}

impl MeasureQuery {
    pub fn new(expr: &Value) -> Result<Self, StorageError> {
        Ok(Self {
            root: build_node(expr)?,
        })
    }

    pub fn matches(&self, value: f64) -> bool {
        eval(&self.root, value).truthy()
    }
}

fn invalid(message: impl Into<String>) -> StorageError {
    StorageError::InvalidQuery(message.into())
}

fn build_node(expr: &Value) -> Result<Node, StorageError> {
    match expr {
        Value::Number(n) => n
            .as_f64()
            .map(Node::Literal)
            .ok_or_else(|| invalid(format!("not a finite number: {n}"))),
        Value::Object(map) => {
            let Some((operator, operand)) = map.iter().next() else {
                return Ok(Node::Nothing);
            };
            match operator.as_str() {
                "and" | "∧" => Ok(Node::All(build_list(operator, operand)?)),
                "or" | "∨" => Ok(Node::Any(build_list(operator, operand)?)),
                "not" | "¬" => Ok(Node::Not(Box::new(build_node(operand)?))),
                name => {
                    let op = BinOp::parse(name)
                        .ok_or_else(|| invalid(format!("unknown operator {name:?}")))?;
                    build_binary(op, operand)
                }
            }
        }
        other => Err(invalid(format!("unexpected expression: {other}"))),
    }
}

fn build_list(operator: &str, operand: &Value) -> Result<Vec<Node>, StorageError> {
    let items = operand
        .as_array()
        .ok_or_else(|| invalid(format!("operator {operator:?} needs a list of expressions")))?;
    items.iter().map(build_node).collect()
}

fn build_binary(op: BinOp, operand: &Value) -> Result<Node, StorageError> {
    match operand {
        // Scalar operand: apply against the measured value.
        Value::Number(_) => Ok(Node::Binary(
            op,
            Box::new(Node::Value),
            Box::new(build_node(operand)?),
        )),
        Value::Array(items) => {
            if items.len() != 2 {
                return Err(invalid(format!(
                    "binary operator needs 2 arguments, {} given",
                    items.len()
                )));
            }
            Ok(Node::Binary(
                op,
                Box::new(build_node(&items[0])?),
                Box::new(build_node(&items[1])?),
            ))
        }
        other => Err(invalid(format!("unexpected operand: {other}"))),
    }
}

fn eval(node: &Node, value: f64) -> Evaluated {
    match node {
        Node::Value => Evaluated::Number(value),
        Node::Literal(n) => Evaluated::Number(*n),
        Node::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, value).as_number();
            let rhs = eval(rhs, value).as_number();
            match op {
                BinOp::Eq => Evaluated::Boolean(lhs == rhs),
                BinOp::Ne => Evaluated::Boolean(lhs != rhs),
                BinOp::Lt => Evaluated::Boolean(lhs < rhs),
                BinOp::Le => Evaluated::Boolean(lhs <= rhs),
                BinOp::Gt => Evaluated::Boolean(lhs > rhs),
                BinOp::Ge => Evaluated::Boolean(lhs >= rhs),
                BinOp::Add => Evaluated::Number(lhs + rhs),
                BinOp::Sub => Evaluated::Number(lhs - rhs),
                BinOp::Mul => Evaluated::Number(lhs * rhs),
                BinOp::Div => Evaluated::Number(lhs / rhs),
                BinOp::Mod => Evaluated::Number(lhs.rem_euclid(rhs)),
            }
        }
        Node::All(nodes) => Evaluated::Boolean(nodes.iter().all(|n| eval(n, value).truthy())),
        Node::Any(nodes) => Evaluated::Boolean(nodes.iter().any(|n| eval(n, value).truthy())),
        Node::Not(node) => Evaluated::Boolean(!eval(node, value).truthy()),
        Node::Nothing => Evaluated::Boolean(false),
    }
}
