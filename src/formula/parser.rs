//! Recursive-descent parser for infix arithmetic over named variables.
//!
//! Grammar (standard precedence, `**` binds tighter than unary minus,
//! which binds tighter than `* /`, which binds tighter than `+ -`):
//!
//! ```text
//! expr    := comparison
//! comparison := sum (('<' | '<=' | '>' | '>=' | '==') sum)?
//! sum     := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | power
//! power   := atom ('**' unary)?         // right-associative
//! atom    := number | ident | ident '(' args ')' | '(' expr ')'
//! args    := expr (',' expr)*
//! ```
//!
//! `power`'s base is an `atom`, not a `unary` — so a leading minus is
//! only ever consumed by the outer `unary` rule, never folded into the
//! base of a `**`. `-2 ** 2` parses as `-(2 ** 2)` (`-4`), matching
//! standard precedence; `2 ** -2` still parses fine because `power`'s
//! exponent side is itself a `unary`.

use super::expr::{BinOp, Cmp, Expr, Func};
use crate::error::CalculationError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    LParen,
    RParen,
    Comma,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Eof,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { chars: src.chars().peekable() }
    }

    fn next_token(&mut self) -> Result<Token, CalculationError> {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
        let Some(&c) = self.chars.peek() else {
            return Ok(Token::Eof);
        };
        match c {
            '+' => { self.chars.next(); Ok(Token::Plus) }
            '-' => { self.chars.next(); Ok(Token::Minus) }
            '*' => {
                self.chars.next();
                if self.chars.peek() == Some(&'*') {
                    self.chars.next();
                    Ok(Token::StarStar)
                } else {
                    Ok(Token::Star)
                }
            }
            '/' => { self.chars.next(); Ok(Token::Slash) }
            '(' => { self.chars.next(); Ok(Token::LParen) }
            ')' => { self.chars.next(); Ok(Token::RParen) }
            ',' => { self.chars.next(); Ok(Token::Comma) }
            '<' => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') { self.chars.next(); Ok(Token::Le) } else { Ok(Token::Lt) }
            }
            '>' => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') { self.chars.next(); Ok(Token::Ge) } else { Ok(Token::Gt) }
            }
            '=' => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Ok(Token::EqEq)
                } else {
                    Err(CalculationError::UnboundVariable("=".to_string()))
                }
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut s = String::new();
                while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
                    s.push(self.chars.next().unwrap());
                }
                s.parse::<f64>()
                    .map(Token::Number)
                    .map_err(|_| CalculationError::UnboundVariable(s))
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
                    s.push(self.chars.next().unwrap());
                }
                Ok(Token::Ident(s))
            }
            other => Err(CalculationError::UnboundVariable(other.to_string())),
        }
    }
}

/// Parses formula source into an [`Expr`] tree. Stateless; safe to reuse
/// across formulas.
pub struct FormulaParser;

impl FormulaParser {
    pub fn parse(src: &str) -> Result<Expr, CalculationError> {
        let mut tokens = Vec::new();
        let mut lexer = Lexer::new(src);
        loop {
            let tok = lexer.next_token()?;
            let done = tok == Token::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        let mut parser = TokenParser { tokens, pos: 0 };
        let expr = parser.parse_comparison()?;
        parser.expect(Token::Eof)?;
        Ok(expr)
    }
}

struct TokenParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenParser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: Token) -> Result<(), CalculationError> {
        if *self.peek() == want {
            self.advance();
            Ok(())
        } else {
            Err(CalculationError::UnboundVariable(format!("expected {:?}, found {:?}", want, self.peek())))
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, CalculationError> {
        let lhs = self.parse_sum()?;
        let cmp = match self.peek() {
            Token::Lt => Some(Cmp::Lt),
            Token::Le => Some(Cmp::Le),
            Token::Gt => Some(Cmp::Gt),
            Token::Ge => Some(Cmp::Ge),
            Token::EqEq => Some(Cmp::Eq),
            _ => None,
        };
        match cmp {
            Some(c) => {
                self.advance();
                let rhs = self.parse_sum()?;
                Ok(Expr::Compare(c, Box::new(lhs), Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, CalculationError> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Token::Plus => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Bin(BinOp::Add, Box::new(lhs), Box::new(rhs));
                }
                Token::Minus => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Bin(BinOp::Sub, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, CalculationError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Token::Star => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Bin(BinOp::Mul, Box::new(lhs), Box::new(rhs));
                }
                Token::Slash => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Bin(BinOp::Div, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CalculationError> {
        if *self.peek() == Token::Minus {
            self.advance();
            let inner = self.parse_unary()?;
            Ok(Expr::Neg(Box::new(inner)))
        } else {
            self.parse_power()
        }
    }

    fn parse_power(&mut self) -> Result<Expr, CalculationError> {
        let base = self.parse_atom()?;
        if *self.peek() == Token::StarStar {
            self.advance();
            let exp = self.parse_unary()?; // right-associative; allows a negative exponent
            Ok(Expr::Bin(BinOp::Pow, Box::new(base), Box::new(exp)))
        } else {
            Ok(base)
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, CalculationError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::LParen => {
                let inner = self.parse_comparison()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.peek() != Token::RParen {
                        args.push(self.parse_comparison()?);
                        while *self.peek() == Token::Comma {
                            self.advance();
                            args.push(self.parse_comparison()?);
                        }
                    }
                    self.expect(Token::RParen)?;
                    let func = match name.as_str() {
                        "abs" => Func::Abs,
                        "min" => Func::Min,
                        "max" => Func::Max,
                        "log" => Func::Log,
                        "exp" => Func::Exp,
                        other => {
                            return Err(CalculationError::UnboundVariable(format!(
                                "unknown function '{other}'"
                            )))
                        }
                    };
                    Ok(Expr::Call(func, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => Err(CalculationError::UnboundVariable(format!("unexpected token {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn eval_str(src: &str, bindings: &[(&str, f64)]) -> f64 {
        let expr = FormulaParser::parse(src).unwrap();
        let map: HashMap<String, f64> = bindings.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        expr.eval(&map, crate::formula::expr::DivisionZeroPolicy::Error).unwrap()
    }

    #[rstest]
    #[case("1 + 2 * 3", 7.0)]
    #[case("(1 + 2) * 3", 9.0)]
    #[case("2 ** 3 ** 2", 512.0)] // right-assoc: 2 ** (3 ** 2)
    #[case("-2 + 3", 1.0)]
    #[case("abs(-5)", 5.0)]
    #[case("min(3, 7)", 3.0)]
    #[case("max(3, 7)", 7.0)]
    fn literal_expressions(#[case] src: &str, #[case] expected: f64) {
        assert_eq!(eval_str(src, &[]), expected);
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        // -2 ** 2 == -(2 ** 2) == -4, not (-2) ** 2 == 4.
        assert_eq!(eval_str("-2 ** 2", &[]), -4.0);
    }

    #[test]
    fn power_exponent_may_itself_be_negative() {
        assert_eq!(eval_str("2 ** -2", &[]), 0.25);
    }

    #[test]
    fn variables_bind_by_name() {
        assert_eq!(eval_str("revenue - cogs", &[("revenue", 100.0), ("cogs", 40.0)]), 60.0);
    }

    #[test]
    fn unknown_function_is_rejected() {
        assert!(FormulaParser::parse("eval(1)").is_err());
    }

    #[test]
    fn comparison_yields_boolean_zero_or_one() {
        assert_eq!(eval_str("current_ratio > 1.5", &[("current_ratio", 2.0)]), 1.0);
    }
}
