use crate::parser::{self, ParseError};
use crate::ParamEnv;

/// A scalar value bound to a parameter name.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    String(String),
    Int(i64),
    Float(f64),
    Null,
}

impl ParamValue {
    fn is_truthy(&self) -> bool {
        match self {
            ParamValue::Bool(b) => *b,
            ParamValue::String(s) => !s.is_empty() && s != "false" && s != "0",
            ParamValue::Int(i) => *i != 0,
            ParamValue::Float(f) => *f != 0.0,
            ParamValue::Null => false,
        }
    }

    fn as_compare_str(&self) -> String {
        match self {
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::String(s) => s.clone(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => f.to_string(),
            ParamValue::Null => String::new(),
        }
    }
}

/// A parsed `when` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum CondExpr {
    /// A bare parameter name, e.g. `linux`.
    Name(String),
    /// `name = "value"`.
    Equals(String, String),
    Not(Box<CondExpr>),
    All(Vec<CondExpr>),
    Any(Vec<CondExpr>),
}

impl CondExpr {
    pub fn parse(input: &str) -> Result<CondExpr, ParseError> {
        parser::parse(input)
    }

    pub fn eval(&self, env: &dyn ParamEnv) -> bool {
        match self {
            CondExpr::Name(name) => env.lookup(name).map(|v| v.is_truthy()).unwrap_or(false),
            CondExpr::Equals(name, value) => env
                .lookup(name)
                .map(|v| v.as_compare_str() == *value)
                .unwrap_or(false),
            CondExpr::Not(inner) => !inner.eval(env),
            CondExpr::All(parts) => parts.iter().all(|p| p.eval(env)),
            CondExpr::Any(parts) => parts.iter().any(|p| p.eval(env)),
        }
    }
}
