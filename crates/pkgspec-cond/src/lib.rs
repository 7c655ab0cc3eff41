//! Parsing and evaluation of the boolean expressions used in `when <expr>`
//! clauses, `when:` keys, and package-level `when` selectors.
//!
//! The grammar is intentionally small:
//!
//! ```text
//! expr    := name
//!          | name '=' string
//!          | 'not' '(' expr ')'
//!          | 'all' '(' expr (',' expr)* ')'
//!          | 'any' '(' expr (',' expr)* ')'
//! ```
//!
//! A bare `name` is true when the parameter environment defines `name` to a
//! truthy value (a non-empty string other than `"false"`/`"0"`, a `true`
//! bool, or a nonzero number). `name = "value"` compares the parameter's
//! string form against the literal.

mod expr;
mod parser;

pub use expr::{CondExpr, ParamValue};
pub use parser::ParseError;

use std::collections::HashMap;

/// A read-only mapping from parameter name to scalar value, consulted while
/// evaluating a [`CondExpr`].
pub trait ParamEnv {
    fn lookup(&self, name: &str) -> Option<ParamValue>;
}

impl ParamEnv for HashMap<String, ParamValue> {
    fn lookup(&self, name: &str) -> Option<ParamValue> {
        self.get(name).cloned()
    }
}

/// Parses `expr` and evaluates it against `env` in one step. This is the
/// `evaluate(expr, env) -> bool` collaborator contract the resolver depends
/// on.
pub fn evaluate(expr: &str, env: &dyn ParamEnv) -> Result<bool, ParseError> {
    let parsed = CondExpr::parse(expr)?;
    Ok(parsed.eval(env))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, ParamValue)]) -> HashMap<String, ParamValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn bare_name_truthy() {
        let e = env(&[("linux", ParamValue::Bool(true))]);
        assert!(evaluate("linux", &e).unwrap());
    }

    #[test]
    fn bare_name_missing_is_false() {
        let e = env(&[]);
        assert!(!evaluate("linux", &e).unwrap());
    }

    #[test]
    fn not_negates() {
        let e = env(&[("linux", ParamValue::Bool(false))]);
        assert!(evaluate("not(linux)", &e).unwrap());
    }

    #[test]
    fn all_and_any() {
        let e = env(&[
            ("linux", ParamValue::Bool(true)),
            ("debug", ParamValue::Bool(false)),
        ]);
        assert!(!evaluate("all(linux, debug)", &e).unwrap());
        assert!(evaluate("any(linux, debug)", &e).unwrap());
    }

    #[test]
    fn key_value_equality() {
        let e = env(&[("arch", ParamValue::String("x86_64".into()))]);
        assert!(evaluate(r#"arch = "x86_64""#, &e).unwrap());
        assert!(!evaluate(r#"arch = "arm64""#, &e).unwrap());
    }
}
