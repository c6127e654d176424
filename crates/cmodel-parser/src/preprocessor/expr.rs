//! Conditional expression parsing and evaluation
//!
//! Handles the integer expressions found after `#if` and `#elif`:
//! - `FOO`, `FOO == 1`, `BAR > FOO`
//! - `defined(X)`, `defined X`, `!defined(X) || X`
//! - arithmetic, bitwise, shifts and `a ? b : c`
//!
//! Identifiers resolve through the macro table. Undefined identifiers are 0.

use thiserror::Error;

use super::macros::MacroTable;
use crate::tokenizer::{filter_significant, tokenize, Token, TokenKind};

/// How many macro-to-macro hops are followed when resolving a value
const MAX_EXPANSION_DEPTH: usize = 16;

/// Errors from parsing or evaluating a condition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("empty condition")]
    Empty,

    #[error("unexpected token '{0}'")]
    Unexpected(String),

    #[error("unexpected end of condition")]
    UnexpectedEnd,

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Parsed condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionExpr {
    Number(i64),
    /// Identifier resolved through the macro table
    Symbol(String),
    Defined(String),
    Unary(UnaryOp, Box<ConditionExpr>),
    Binary(BinaryOp, Box<ConditionExpr>, Box<ConditionExpr>),
    Ternary(Box<ConditionExpr>, Box<ConditionExpr>, Box<ConditionExpr>),
}

/// Binary operators from lowest to highest precedence
const PRECEDENCE: &[&[(&str, BinaryOp)]] = &[
    &[("||", BinaryOp::Or)],
    &[("&&", BinaryOp::And)],
    &[("|", BinaryOp::BitOr)],
    &[("^", BinaryOp::BitXor)],
    &[("&", BinaryOp::BitAnd)],
    &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
    &[
        ("<", BinaryOp::Lt),
        ("<=", BinaryOp::Le),
        (">", BinaryOp::Gt),
        (">=", BinaryOp::Ge),
    ],
    &[("<<", BinaryOp::Shl), (">>", BinaryOp::Shr)],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
];

impl ConditionExpr {
    /// Parse the text after `#if`/`#elif`
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        let tokens = filter_significant(&tokenize(text));
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = ExprParser {
            tokens,
            position: 0,
        };
        let expr = parser.parse_ternary()?;
        match parser.peek() {
            Some(token) => Err(ConditionError::Unexpected(token.value.clone())),
            None => Ok(expr),
        }
    }

    /// Evaluate to an integer
    pub fn eval(&self, macros: &MacroTable) -> Result<i64, ConditionError> {
        self.eval_at(macros, 0)
    }

    fn eval_at(&self, macros: &MacroTable, depth: usize) -> Result<i64, ConditionError> {
        Ok(match self {
            ConditionExpr::Number(n) => *n,
            ConditionExpr::Symbol(name) => resolve_symbol(name, macros, depth),
            ConditionExpr::Defined(name) => macros.is_defined(name) as i64,
            ConditionExpr::Unary(op, inner) => {
                let v = inner.eval_at(macros, depth)?;
                match op {
                    UnaryOp::Not => (v == 0) as i64,
                    UnaryOp::Neg => v.wrapping_neg(),
                    UnaryOp::Plus => v,
                    UnaryOp::BitNot => !v,
                }
            }
            ConditionExpr::Binary(BinaryOp::Or, l, r) => {
                (l.eval_at(macros, depth)? != 0 || r.eval_at(macros, depth)? != 0) as i64
            }
            ConditionExpr::Binary(BinaryOp::And, l, r) => {
                (l.eval_at(macros, depth)? != 0 && r.eval_at(macros, depth)? != 0) as i64
            }
            ConditionExpr::Binary(op, l, r) => {
                let a = l.eval_at(macros, depth)?;
                let b = r.eval_at(macros, depth)?;
                apply_binary(*op, a, b)?
            }
            ConditionExpr::Ternary(cond, then, otherwise) => {
                if cond.eval_at(macros, depth)? != 0 {
                    then.eval_at(macros, depth)?
                } else {
                    otherwise.eval_at(macros, depth)?
                }
            }
        })
    }
}

fn apply_binary(op: BinaryOp, a: i64, b: i64) -> Result<i64, ConditionError> {
    Ok(match op {
        BinaryOp::Or => (a != 0 || b != 0) as i64,
        BinaryOp::And => (a != 0 && b != 0) as i64,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::BitAnd => a & b,
        BinaryOp::Eq => (a == b) as i64,
        BinaryOp::Ne => (a != b) as i64,
        BinaryOp::Lt => (a < b) as i64,
        BinaryOp::Le => (a <= b) as i64,
        BinaryOp::Gt => (a > b) as i64,
        BinaryOp::Ge => (a >= b) as i64,
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a.checked_div(b).ok_or(ConditionError::DivisionByZero)?,
        BinaryOp::Rem => a.checked_rem(b).ok_or(ConditionError::DivisionByZero)?,
    })
}

/// Value of a macro used inside a condition. Undefined names, empty values
/// and values that are not expressions all count as 0.
fn resolve_symbol(name: &str, macros: &MacroTable, depth: usize) -> i64 {
    if depth >= MAX_EXPANSION_DEPTH {
        return 0;
    }
    let Some(value) = macros.value(name) else {
        return 0;
    };
    if value.trim().is_empty() {
        return 0;
    }
    ConditionExpr::parse(value)
        .and_then(|expr| expr.eval_at(macros, depth + 1))
        .unwrap_or(0)
}

/// Parse an integer literal, accepting hex, octal and `u`/`l` suffixes
pub fn parse_integer(text: &str) -> Result<i64, ConditionError> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let parsed = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).map(|v| v as i64)
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).map(|v| v as i64)
    } else {
        digits.parse::<u64>().map(|v| v as i64)
    };
    parsed.map_err(|_| ConditionError::InvalidNumber(text.to_string()))
}

struct ExprParser {
    tokens: Vec<Token>,
    position: usize,
}

impl ExprParser {
    fn parse_ternary(&mut self) -> Result<ConditionExpr, ConditionError> {
        let cond = self.parse_binary(0)?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.parse_ternary()?;
        self.expect(":")?;
        let otherwise = self.parse_ternary()?;
        Ok(ConditionExpr::Ternary(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_binary(&mut self, level: usize) -> Result<ConditionExpr, ConditionError> {
        let Some(operators) = PRECEDENCE.get(level) else {
            return self.parse_unary();
        };
        let mut left = self.parse_binary(level + 1)?;
        while let Some(op) = self.peek_operator(operators) {
            self.position += 1;
            let right = self.parse_binary(level + 1)?;
            left = ConditionExpr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ConditionExpr, ConditionError> {
        let op = match self.peek().map(|t| t.value.as_str()) {
            Some("!") => UnaryOp::Not,
            Some("-") => UnaryOp::Neg,
            Some("+") => UnaryOp::Plus,
            Some("~") => UnaryOp::BitNot,
            _ => return self.parse_primary(),
        };
        self.position += 1;
        let inner = self.parse_unary()?;
        Ok(ConditionExpr::Unary(op, Box::new(inner)))
    }

    fn parse_primary(&mut self) -> Result<ConditionExpr, ConditionError> {
        let token = self.advance().ok_or(ConditionError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::Number => parse_integer(&token.value).map(ConditionExpr::Number),
            TokenKind::Identifier if token.value == "defined" => {
                let parenthesized = self.eat("(");
                let name = self.advance().ok_or(ConditionError::UnexpectedEnd)?;
                if !matches!(name.kind, TokenKind::Identifier | TokenKind::Keyword) {
                    return Err(ConditionError::Unexpected(name.value));
                }
                if parenthesized {
                    self.expect(")")?;
                }
                Ok(ConditionExpr::Defined(name.value))
            }
            // Keywords such as `true` in C++ sources are ordinary macros here
            TokenKind::Identifier | TokenKind::Keyword => Ok(ConditionExpr::Symbol(token.value)),
            TokenKind::Punctuation if token.value == "(" => {
                let inner = self.parse_ternary()?;
                self.expect(")")?;
                Ok(inner)
            }
            _ => Err(ConditionError::Unexpected(token.value)),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned()?;
        self.position += 1;
        Some(token)
    }

    fn peek_operator(&self, operators: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
        let token = self.peek()?;
        if token.kind != TokenKind::Punctuation {
            return None;
        }
        operators
            .iter()
            .find(|(text, _)| *text == token.value)
            .map(|(_, op)| *op)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(punct)) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ConditionError> {
        if self.eat(punct) {
            return Ok(());
        }
        match self.peek() {
            Some(token) => Err(ConditionError::Unexpected(token.value.clone())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str, defines: &[(&str, &str)]) -> Result<i64, ConditionError> {
        let mut macros = MacroTable::new();
        for (name, value) in defines {
            macros.define(*name, *value);
        }
        ConditionExpr::parse(text)?.eval(&macros)
    }

    #[test]
    fn test_comparisons() {
        let defines = [("FOO", "1"), ("BAR", "2")];
        assert_eq!(eval("FOO == 1", &defines), Ok(1));
        assert_eq!(eval("BAR > FOO", &defines), Ok(1));
        assert_eq!(eval("BAR <= FOO", &defines), Ok(0));
        assert_eq!(eval("!FOO", &defines), Ok(0));
    }

    #[test]
    fn test_defined_forms() {
        let defines = [("X", "")];
        assert_eq!(eval("defined(X)", &defines), Ok(1));
        assert_eq!(eval("defined X && !defined(Y)", &defines), Ok(1));
        // Defined but empty is still false as a value
        assert_eq!(eval("X", &defines), Ok(0));
    }

    #[test]
    fn test_undefined_is_zero() {
        assert_eq!(eval("UNKNOWN", &[]), Ok(0));
        assert_eq!(eval("UNKNOWN || 1", &[]), Ok(1));
    }

    #[test]
    fn test_arithmetic_and_literals() {
        assert_eq!(eval("(2 + 3) * 4 - 1", &[]), Ok(19));
        assert_eq!(eval("0x10 == 16", &[]), Ok(1));
        assert_eq!(eval("010 == 8", &[]), Ok(1));
        assert_eq!(eval("100UL / 10", &[]), Ok(10));
        assert_eq!(eval("1 << 4 | 1", &[]), Ok(17));
        assert_eq!(eval("-1 < 0", &[]), Ok(1));
        assert_eq!(eval("1 ? 2 : 3", &[]), Ok(2));
    }

    #[test]
    fn test_nested_macro_values() {
        let defines = [("VERSION", "MAJOR * 100 + MINOR"), ("MAJOR", "2"), ("MINOR", "5")];
        assert_eq!(eval("VERSION >= 205", &defines), Ok(1));

        let recursive = [("A", "B"), ("B", "A")];
        assert_eq!(eval("A", &recursive), Ok(0));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(eval("", &[]), Err(ConditionError::Empty));
        assert_eq!(eval("(1", &[]), Err(ConditionError::UnexpectedEnd));
        assert!(matches!(eval("1 1", &[]), Err(ConditionError::Unexpected(_))));
        assert_eq!(eval("1 / 0", &[]), Err(ConditionError::DivisionByZero));
    }
}
