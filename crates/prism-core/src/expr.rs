//! Shape and grid expression mini-language
//!
//! Array extents (`u32[nf + 1]`) and grid sizes (`[ceilDiv(n,64)*64]`) share
//! one small arithmetic language: integer literals, identifiers, `+ - *`, and
//! the pseudo-function `ceilDiv(a, b)`. Expressions are parsed once when a
//! kernel spec is built and evaluated at bind time under an environment of
//! dimension extents, tuneables, and primitive parameter values.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Ceiling division; the number of `b`-sized blocks covering `a` items
pub const fn ceil_div(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

/// Expression tree over named symbols
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShapeExpr {
    Const(i64),
    Ident(String),
    Add(Box<ShapeExpr>, Box<ShapeExpr>),
    Sub(Box<ShapeExpr>, Box<ShapeExpr>),
    Mul(Box<ShapeExpr>, Box<ShapeExpr>),
    CeilDiv(Box<ShapeExpr>, Box<ShapeExpr>),
}

impl ShapeExpr {
    /// Parse a single expression
    pub fn parse(src: &str, context: &str) -> Result<ShapeExpr> {
        let mut p = Parser::new(src, context);
        let expr = p.expr()?;
        p.expect_end()?;
        Ok(expr)
    }

    /// Parse a bracketed, comma-separated expression list: `[e1, e2, ...]`
    pub fn parse_list(src: &str, context: &str) -> Result<Vec<ShapeExpr>> {
        let mut p = Parser::new(src, context);
        let list = p.bracketed_list()?;
        p.expect_end()?;
        Ok(list)
    }

    /// Evaluate under an environment
    ///
    /// # Errors
    ///
    /// `UnknownIdentifier` for unbound names; `InvalidExpression` for a zero
    /// `ceilDiv` divisor.
    pub fn eval(&self, env: &Env, context: &str) -> Result<i64> {
        Ok(match self {
            ShapeExpr::Const(v) => *v,
            ShapeExpr::Ident(name) => env.get(name).ok_or_else(|| Error::UnknownIdentifier {
                context: context.to_string(),
                name: name.clone(),
            })?,
            ShapeExpr::Add(a, b) => a.eval(env, context)? + b.eval(env, context)?,
            ShapeExpr::Sub(a, b) => a.eval(env, context)? - b.eval(env, context)?,
            ShapeExpr::Mul(a, b) => a.eval(env, context)? * b.eval(env, context)?,
            ShapeExpr::CeilDiv(a, b) => {
                let num = a.eval(env, context)?;
                let den = b.eval(env, context)?;
                if den <= 0 || num < 0 {
                    return Err(Error::InvalidExpression {
                        context: context.to_string(),
                        detail: format!("ceilDiv({num}, {den}) is undefined"),
                    });
                }
                ceil_div(num as u64, den as u64) as i64
            }
        })
    }

    /// Collect every identifier referenced by this expression
    pub fn idents<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ShapeExpr::Const(_) => {}
            ShapeExpr::Ident(name) => out.push(name),
            ShapeExpr::Add(a, b)
            | ShapeExpr::Sub(a, b)
            | ShapeExpr::Mul(a, b)
            | ShapeExpr::CeilDiv(a, b) => {
                a.idents(out);
                b.idents(out);
            }
        }
    }

    /// Whether every referenced identifier is bound in `env`
    pub fn is_resolvable(&self, env: &Env) -> bool {
        let mut names = Vec::new();
        self.idents(&mut names);
        names.iter().all(|name| env.contains(name))
    }
}

impl fmt::Display for ShapeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeExpr::Const(v) => write!(f, "{v}"),
            ShapeExpr::Ident(name) => f.write_str(name),
            ShapeExpr::Add(a, b) => write!(f, "({a} + {b})"),
            ShapeExpr::Sub(a, b) => write!(f, "({a} - {b})"),
            ShapeExpr::Mul(a, b) => write!(f, "({a} * {b})"),
            ShapeExpr::CeilDiv(a, b) => write!(f, "ceilDiv({a}, {b})"),
        }
    }
}

/// Name-to-value bindings for expression evaluation
#[derive(Clone, Debug, Default)]
pub struct Env {
    values: HashMap<String, i64>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: i64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

// ================================================================================================
// Parser
// ================================================================================================

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    context: &'a str,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, context: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            context,
        }
    }

    fn err(&self, detail: impl Into<String>) -> Error {
        Error::InvalidExpression {
            context: self.context.to_string(),
            detail: detail.into(),
        }
    }

    fn skip_ws(&mut self) {
        while self.src.get(self.pos).is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        if self.eat(b) {
            Ok(())
        } else {
            Err(self.err(format!("expected {:?}", b as char)))
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(b) => Err(self.err(format!("trailing input at {:?}", b as char))),
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<ShapeExpr> {
        let mut lhs = self.term()?;
        loop {
            if self.eat(b'+') {
                lhs = ShapeExpr::Add(Box::new(lhs), Box::new(self.term()?));
            } else if self.eat(b'-') {
                lhs = ShapeExpr::Sub(Box::new(lhs), Box::new(self.term()?));
            } else {
                return Ok(lhs);
            }
        }
    }

    // term := atom ('*' atom)*
    fn term(&mut self) -> Result<ShapeExpr> {
        let mut lhs = self.atom()?;
        while self.eat(b'*') {
            lhs = ShapeExpr::Mul(Box::new(lhs), Box::new(self.atom()?));
        }
        Ok(lhs)
    }

    // atom := INT | IDENT | 'ceilDiv' '(' expr ',' expr ')' | '(' expr ')'
    fn atom(&mut self) -> Result<ShapeExpr> {
        match self.peek() {
            Some(b'(') => {
                self.bump();
                let inner = self.expr()?;
                self.expect(b')')?;
                Ok(inner)
            }
            Some(b) if b.is_ascii_digit() => self.number(),
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => {
                let name = self.ident();
                if name == "ceilDiv" {
                    self.expect(b'(')?;
                    let a = self.expr()?;
                    self.expect(b',')?;
                    let b = self.expr()?;
                    self.expect(b')')?;
                    Ok(ShapeExpr::CeilDiv(Box::new(a), Box::new(b)))
                } else {
                    Ok(ShapeExpr::Ident(name))
                }
            }
            Some(b) => Err(self.err(format!("unexpected {:?}", b as char))),
            None => Err(self.err("unexpected end of input")),
        }
    }

    fn number(&mut self) -> Result<ShapeExpr> {
        self.skip_ws();
        let start = self.pos;
        while self.src.get(self.pos).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii digits");
        text.parse::<i64>()
            .map(ShapeExpr::Const)
            .map_err(|_| self.err(format!("integer literal {text:?} out of range")))
    }

    fn ident(&mut self) -> String {
        self.skip_ws();
        let start = self.pos;
        while self
            .src
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn bracketed_list(&mut self) -> Result<Vec<ShapeExpr>> {
        self.expect(b'[')?;
        let mut list = Vec::new();
        if self.eat(b']') {
            return Ok(list);
        }
        loop {
            list.push(self.expr()?);
            if self.eat(b']') {
                return Ok(list);
            }
            self.expect(b',')?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, i64)]) -> Env {
        let mut e = Env::new();
        for (k, v) in pairs {
            e.insert(*k, *v);
        }
        e
    }

    #[test]
    fn test_precedence() {
        let e = ShapeExpr::parse("1 + 2 * 3", "test").unwrap();
        assert_eq!(e.eval(&Env::new(), "test").unwrap(), 7);

        let e = ShapeExpr::parse("(1 + 2) * 3", "test").unwrap();
        assert_eq!(e.eval(&Env::new(), "test").unwrap(), 9);
    }

    #[test]
    fn test_identifiers() {
        let e = ShapeExpr::parse("nf + 1", "test").unwrap();
        assert_eq!(e.eval(&env(&[("nf", 4)]), "test").unwrap(), 5);

        let mut names = Vec::new();
        e.idents(&mut names);
        assert_eq!(names, vec!["nf"]);
    }

    #[test]
    fn test_ceil_div() {
        let e = ShapeExpr::parse("ceilDiv(n, 64) * 64", "test").unwrap();
        assert_eq!(e.eval(&env(&[("n", 100)]), "test").unwrap(), 128);
        assert_eq!(e.eval(&env(&[("n", 128)]), "test").unwrap(), 128);
        assert_eq!(e.eval(&env(&[("n", 1)]), "test").unwrap(), 64);
    }

    #[test]
    fn test_ceil_div_zero_divisor() {
        let e = ShapeExpr::parse("ceilDiv(n, b)", "test").unwrap();
        let err = e.eval(&env(&[("n", 10), ("b", 0)]), "test").unwrap_err();
        assert!(matches!(err, Error::InvalidExpression { .. }));
    }

    #[test]
    fn test_unknown_identifier() {
        let e = ShapeExpr::parse("rows * cols", "grid of kernel k").unwrap();
        let err = e.eval(&env(&[("rows", 2)]), "grid of kernel k").unwrap_err();
        match err {
            Error::UnknownIdentifier { context, name } => {
                assert_eq!(context, "grid of kernel k");
                assert_eq!(name, "cols");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_list() {
        let list = ShapeExpr::parse_list("[blocksPerGrid, numActiveFeatures+1]", "test").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], ShapeExpr::Ident("blocksPerGrid".to_string()));
    }

    #[test]
    fn test_empty_list() {
        assert!(ShapeExpr::parse_list("[]", "test").unwrap().is_empty());
    }

    #[test]
    fn test_syntax_errors() {
        assert!(ShapeExpr::parse("1 +", "test").is_err());
        assert!(ShapeExpr::parse("ceilDiv(1)", "test").is_err());
        assert!(ShapeExpr::parse("a b", "test").is_err());
        assert!(ShapeExpr::parse_list("[a,", "test").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let e = ShapeExpr::parse("ceilDiv(n+1, 2) * k", "test").unwrap();
        let printed = e.to_string();
        let reparsed = ShapeExpr::parse(&printed, "test").unwrap();
        assert_eq!(e, reparsed);
    }
}
