// Condition Evaluator
// Evaluates condition ASTs against a job's variables

use crate::expression::lexer::SyntaxError;
use crate::expression::parser::{self, BinaryOp, Expr};

use indexmap::IndexMap;
use std::fmt;

/// Evaluation error
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The condition reads a variable the job does not define
    UnknownVariable(String),
    Invalid(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnknownVariable(name) => write!(f, "undeclared variable '{}'", name),
            EvalError::Invalid(message) => write!(f, "evaluation error: {}", message),
        }
    }
}

impl std::error::Error for EvalError {}

/// Runtime value of a condition sub-expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    String(String),
}

impl Value {
    /// Non-empty strings other than "false" are truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::String(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::String(s) => s.clone(),
        }
    }
}

/// Tree-walking evaluator over one job's variables
pub struct Evaluator<'a> {
    variables: &'a IndexMap<String, String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(variables: &'a IndexMap<String, String>) -> Self {
        Self { variables }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Reference(name) => self
                .variables
                .get(name)
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::FunctionCall { name, args } => self.eval_function(name, args),
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, EvalError> {
        match op {
            BinaryOp::And => {
                if !self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            BinaryOp::Or => {
                if self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            BinaryOp::Eq => {
                let (l, r) = (self.eval(left)?, self.eval(right)?);
                Ok(Value::Bool(values_equal(&l, &r)))
            }
            BinaryOp::Ne => {
                let (l, r) = (self.eval(left)?, self.eval(right)?);
                Ok(Value::Bool(!values_equal(&l, &r)))
            }
        }
    }

    fn eval_function(&self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        match name {
            "eq" | "ne" => {
                let (l, r) = (self.eval(&args[0])?, self.eval(&args[1])?);
                let equal = values_equal(&l, &r);
                Ok(Value::Bool(if name == "eq" { equal } else { !equal }))
            }
            "not" => Ok(Value::Bool(!self.eval(&args[0])?.is_truthy())),
            "and" => {
                for arg in args {
                    if !self.eval(arg)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            "or" => {
                for arg in args {
                    if self.eval(arg)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "in" => {
                let needle = self.eval(&args[0])?;
                for candidate in &args[1..] {
                    if values_equal(&needle, &self.eval(candidate)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "contains" | "startswith" | "endswith" => {
                let haystack = self.eval(&args[0])?.as_string().to_lowercase();
                let needle = self.eval(&args[1])?.as_string().to_lowercase();
                let found = match name {
                    "contains" => haystack.contains(&needle),
                    "startswith" => haystack.starts_with(&needle),
                    _ => haystack.ends_with(&needle),
                };
                Ok(Value::Bool(found))
            }
            other => Err(EvalError::Invalid(format!("unknown function: {}", other))),
        }
    }
}

/// String comparison ignores case; booleans compare against "true"/"false"
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => left.as_string().to_lowercase() == right.as_string().to_lowercase(),
    }
}

/// A parsed step condition, ready to evaluate against any job
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, SyntaxError> {
        let expr = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Every variable name the condition reads, deduplicated, in source order
    pub fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.expr.collect_references(&mut refs);
        let mut seen = std::collections::HashSet::new();
        refs.retain(|name| seen.insert(*name));
        refs
    }

    /// First referenced variable that `variables` does not define
    pub fn first_unknown<'s>(&'s self, variables: &IndexMap<String, String>) -> Option<&'s str> {
        self.references()
            .into_iter()
            .find(|name| !variables.contains_key(*name))
    }

    pub fn evaluate(&self, variables: &IndexMap<String, String>) -> Result<bool, EvalError> {
        Ok(Evaluator::new(variables).eval(&self.expr)?.is_truthy())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Substitute `$(name)` macros with variable values; unknown names are left as written
pub fn substitute_macros(text: &str, variables: &IndexMap<String, String>) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("$(") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find(')') {
            Some(end) => {
                let name = after[..end].trim();
                match variables.get(name) {
                    Some(value) => result.push_str(value),
                    None => result.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}
