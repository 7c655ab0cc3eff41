use crate::expr::CondExpr;
use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("expected identifier in `when` expression, found `{0}`")]
    ExpectedIdent(String),
    #[error("expected `{0}` in `when` expression at `{1}`")]
    Expected(&'static str, String),
    #[error("unexpected trailing input in `when` expression: `{0}`")]
    TrailingInput(String),
    #[error("unterminated string literal in `when` expression")]
    UnterminatedString,
    #[error("empty `when` expression")]
    Empty,
}

impl fmt::Display for CondExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CondExpr::Name(n) => write!(f, "{n}"),
            CondExpr::Equals(n, v) => write!(f, "{n} = \"{v}\""),
            CondExpr::Not(inner) => write!(f, "not({inner})"),
            CondExpr::All(parts) => {
                write!(f, "all(")?;
                write_list(f, parts)?;
                write!(f, ")")
            }
            CondExpr::Any(parts) => {
                write!(f, "any(")?;
                write_list(f, parts)?;
                write!(f, ")")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, parts: &[CondExpr]) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{part}")?;
    }
    Ok(())
}

pub fn parse(input: &str) -> Result<CondExpr, ParseError> {
    let mut p = Parser {
        rest: input.trim(),
    };
    if p.rest.is_empty() {
        return Err(ParseError::Empty);
    }
    let expr = p.expr()?;
    p.skip_ws();
    if !p.rest.is_empty() {
        return Err(ParseError::TrailingInput(p.rest.to_string()));
    }
    Ok(expr)
}

struct Parser<'a> {
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn peek_char(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn eat_char(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.rest.starts_with(c) {
            self.rest = &self.rest[c.len_utf8()..];
            true
        } else {
            false
        }
    }

    fn expect_char(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat_char(c) {
            Ok(())
        } else {
            Err(ParseError::Expected(
                match c {
                    '(' => "(",
                    ')' => ")",
                    ',' => ",",
                    _ => "?",
                },
                self.rest.to_string(),
            ))
        }
    }

    fn ident(&mut self) -> Result<&'a str, ParseError> {
        self.skip_ws();
        let len = self
            .rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-' || c == '.'))
            .unwrap_or(self.rest.len());
        if len == 0 {
            return Err(ParseError::ExpectedIdent(self.rest.to_string()));
        }
        let (word, rest) = self.rest.split_at(len);
        self.rest = rest;
        Ok(word)
    }

    fn string_literal(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        if !self.eat_char('"') {
            return Err(ParseError::Expected("\"", self.rest.to_string()));
        }
        let end = self
            .rest
            .find('"')
            .ok_or(ParseError::UnterminatedString)?;
        let (value, rest) = self.rest.split_at(end);
        self.rest = &rest[1..];
        Ok(value.to_string())
    }

    fn expr_list(&mut self) -> Result<Vec<CondExpr>, ParseError> {
        self.expect_char('(')?;
        let mut parts = Vec::new();
        loop {
            parts.push(self.expr()?);
            self.skip_ws();
            if self.eat_char(',') {
                continue;
            }
            break;
        }
        self.expect_char(')')?;
        Ok(parts)
    }

    fn expr(&mut self) -> Result<CondExpr, ParseError> {
        self.skip_ws();
        let word = self.ident()?;
        match word {
            "not" => {
                self.expect_char('(')?;
                let inner = self.expr()?;
                self.expect_char(')')?;
                Ok(CondExpr::Not(Box::new(inner)))
            }
            "all" => Ok(CondExpr::All(self.expr_list()?)),
            "any" => Ok(CondExpr::Any(self.expr_list()?)),
            name => {
                self.skip_ws();
                if self.peek_char() == Some('=') {
                    self.expect_char('=')?;
                    let value = self.string_literal()?;
                    Ok(CondExpr::Equals(name.to_string(), value))
                } else {
                    Ok(CondExpr::Name(name.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good(s: &str, expected: CondExpr) {
        match parse(s) {
            Ok(e) => assert_eq!(e, expected),
            Err(e) => panic!("failed to parse `{s}`: {e}"),
        }
    }

    fn bad(s: &str) {
        assert!(parse(s).is_err(), "expected `{s}` to fail parsing");
    }

    #[test]
    fn names() {
        good("foo", CondExpr::Name("foo".into()));
        good("  foo  ", CondExpr::Name("foo".into()));
        good("foo-bar", CondExpr::Name("foo-bar".into()));
    }

    #[test]
    fn equals() {
        good(
            r#"arch = "x86_64""#,
            CondExpr::Equals("arch".into(), "x86_64".into()),
        );
        good(r#"arch=""#, CondExpr::Equals("arch".into(), "".into()));
    }

    #[test]
    fn not_all_any() {
        good(
            "not(linux)",
            CondExpr::Not(Box::new(CondExpr::Name("linux".into()))),
        );
        good(
            "all(linux, debug)",
            CondExpr::All(vec![
                CondExpr::Name("linux".into()),
                CondExpr::Name("debug".into()),
            ]),
        );
        good(
            "any(linux, any(debug, release))",
            CondExpr::Any(vec![
                CondExpr::Name("linux".into()),
                CondExpr::Any(vec![
                    CondExpr::Name("debug".into()),
                    CondExpr::Name("release".into()),
                ]),
            ]),
        );
    }

    #[test]
    fn syntax_errors() {
        bad("");
        bad("not(");
        bad("all(foo,)");
        bad("foo bar");
        bad(r#"arch = "unterminated"#);
    }
}
