//! Integer size expressions over the viewport dimensions.
//!
//! Sizes such as `global_size: [W / 16, H / 16, 1]` or an SSBO `size: W * H * 16` are written as a
//! tiny arithmetic language: integer literals, the variables `W` and `H`, the binary operators
//! `+ - * / // %`, unary minus and parentheses. `/` and `//` both floor-divide.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pixel dimensions that `W` and `H` resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {offset} in '{expr}'")]
    UnexpectedChar {
        ch: char,
        offset: usize,
        expr: String,
    },
    #[error("unexpected end of expression '{0}'")]
    UnexpectedEnd(String),
    #[error("unexpected {found} in '{expr}'")]
    UnexpectedToken { found: String, expr: String },
    #[error("unknown variable '{name}' in '{expr}'; only W and H are defined")]
    UnknownVariable { name: String, expr: String },
    #[error("integer literal '{literal}' out of range in '{expr}'")]
    LiteralRange { literal: String, expr: String },
    #[error("division by zero in '{0}'")]
    DivisionByZero(String),
    #[error("arithmetic overflow in '{0}'")]
    Overflow(String),
    #[error("'{expr}' nests deeper than {limit} levels")]
    TooDeep { expr: String, limit: usize },
    #[error("'{expr}' evaluated to {value}; sizes must be positive")]
    NonPositive { expr: String, value: i64 },
    #[error("expected {expected} components in '{text}', found {found}")]
    Arity {
        text: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Width,
    Height,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    Rem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Literal(i64),
    Var(Variable),
    Neg(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

/// A parsed size expression. Parsing rejects unknown identifiers, so a successfully parsed
/// expression can only fail at evaluation time through division by zero or overflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    text: String,
    root: Node,
}

impl Expr {
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            text,
            tokens: &tokens,
            pos: 0,
            nesting: 0,
        };
        let (root, _) = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(ExprError::UnexpectedToken {
                found: token.describe(),
                expr: text.to_string(),
            });
        }
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns true when the value depends on the viewport.
    pub fn uses_viewport(&self) -> bool {
        fn walk(node: &Node) -> bool {
            match node {
                Node::Literal(_) => false,
                Node::Var(_) => true,
                Node::Neg(inner) => walk(inner),
                Node::Binary(_, lhs, rhs) => walk(lhs) || walk(rhs),
            }
        }
        walk(&self.root)
    }

    pub fn eval(&self, viewport: Viewport) -> Result<i64, ExprError> {
        self.eval_node(&self.root, viewport)
    }

    fn eval_node(&self, node: &Node, viewport: Viewport) -> Result<i64, ExprError> {
        let overflow = || ExprError::Overflow(self.text.clone());
        match node {
            Node::Literal(value) => Ok(*value),
            Node::Var(Variable::Width) => Ok(i64::from(viewport.width)),
            Node::Var(Variable::Height) => Ok(i64::from(viewport.height)),
            Node::Neg(inner) => self
                .eval_node(inner, viewport)?
                .checked_neg()
                .ok_or_else(overflow),
            Node::Binary(op, lhs, rhs) => {
                let a = self.eval_node(lhs, viewport)?;
                let b = self.eval_node(rhs, viewport)?;
                match op {
                    BinaryOp::Add => a.checked_add(b).ok_or_else(overflow),
                    BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow),
                    BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow),
                    BinaryOp::FloorDiv | BinaryOp::Rem => {
                        if b == 0 {
                            return Err(ExprError::DivisionByZero(self.text.clone()));
                        }
                        let quotient = floor_div(a, b).ok_or_else(overflow)?;
                        if *op == BinaryOp::FloorDiv {
                            Ok(quotient)
                        } else {
                            quotient
                                .checked_mul(b)
                                .and_then(|product| a.checked_sub(product))
                                .ok_or_else(overflow)
                        }
                    }
                }
            }
        }
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        quotient.checked_sub(1)
    } else {
        Some(quotient)
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expr::parse(s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Int(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Int(text) => format!("literal '{text}'"),
            Token::Ident(text) => format!("identifier '{text}'"),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Percent => "'%'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((offset, ch)) = chars.next() {
        match ch {
            c if c.is_whitespace() => {}
            '+' => tokens.push(Token::Plus),
            '-' => tokens.push(Token::Minus),
            '*' => tokens.push(Token::Star),
            '%' => tokens.push(Token::Percent),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '/' => {
                // `//` is accepted as a synonym for `/`.
                if matches!(chars.peek(), Some((_, '/'))) {
                    chars.next();
                }
                tokens.push(Token::Slash);
            }
            c if c.is_ascii_digit() => {
                let mut literal = String::from(c);
                while let Some((_, next)) = chars.peek().copied() {
                    if next.is_ascii_digit() || next == '_' {
                        if next != '_' {
                            literal.push(next);
                        }
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Int(literal));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some((_, next)) = chars.peek().copied() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(ExprError::UnexpectedChar {
                    ch: other,
                    offset,
                    expr: text.to_string(),
                })
            }
        }
    }
    Ok(tokens)
}

/// Deepest expression tree accepted, counting operators and parenthesized groups.
pub const MAX_DEPTH: usize = 64;

/// A subtree with its height.
type Parsed = (Node, usize);

struct Parser<'a> {
    text: &'a str,
    tokens: &'a [Token],
    pos: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn too_deep(&self) -> ExprError {
        ExprError::TooDeep {
            expr: self.text.to_string(),
            limit: MAX_DEPTH,
        }
    }

    fn node(&self, node: Node, depth: usize) -> Result<Parsed, ExprError> {
        if depth > MAX_DEPTH {
            return Err(self.too_deep());
        }
        Ok((node, depth))
    }

    fn binary(&self, op: BinaryOp, lhs: Parsed, rhs: Parsed) -> Result<Parsed, ExprError> {
        let depth = lhs.1.max(rhs.1) + 1;
        self.node(Node::Binary(op, Box::new(lhs.0), Box::new(rhs.0)), depth)
    }

    fn expr(&mut self) -> Result<Parsed, ExprError> {
        let mut parsed = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(parsed),
            };
            self.pos += 1;
            let rhs = self.term()?;
            parsed = self.binary(op, parsed, rhs)?;
        }
    }

    fn term(&mut self) -> Result<Parsed, ExprError> {
        let mut parsed = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(parsed),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            parsed = self.binary(op, parsed, rhs)?;
        }
    }

    /// Every nested group and unary minus passes through here, which bounds the recursion.
    fn unary(&mut self) -> Result<Parsed, ExprError> {
        if self.nesting >= MAX_DEPTH {
            return Err(self.too_deep());
        }
        self.nesting += 1;
        let parsed = if matches!(self.peek(), Some(Token::Minus)) {
            self.pos += 1;
            self.unary()
                .and_then(|(inner, depth)| self.node(Node::Neg(Box::new(inner)), depth + 1))
        } else {
            self.atom()
        };
        self.nesting -= 1;
        parsed
    }

    fn atom(&mut self) -> Result<Parsed, ExprError> {
        let Some(token) = self.next() else {
            return Err(ExprError::UnexpectedEnd(self.text.to_string()));
        };
        match token {
            Token::Int(literal) => literal
                .parse::<i64>()
                .map(|value| (Node::Literal(value), 1))
                .map_err(|_| ExprError::LiteralRange {
                    literal: literal.clone(),
                    expr: self.text.to_string(),
                }),
            Token::Ident(name) => match name.as_str() {
                "W" => Ok((Node::Var(Variable::Width), 1)),
                "H" => Ok((Node::Var(Variable::Height), 1)),
                _ => Err(ExprError::UnknownVariable {
                    name: name.clone(),
                    expr: self.text.to_string(),
                }),
            },
            Token::LParen => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ExprError::UnexpectedToken {
                        found: other.describe(),
                        expr: self.text.to_string(),
                    }),
                    None => Err(ExprError::UnexpectedEnd(self.text.to_string())),
                }
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.describe(),
                expr: self.text.to_string(),
            }),
        }
    }
}

/// One size component: either a plain integer or an expression over `W`/`H`.
///
/// Expressions are kept as text until they are resolved so that decoding a configuration block
/// never fails on a bad expression; `check` and `resolve` report those problems instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Literal(i64),
    Expr(String),
}

impl Dim {
    pub fn check(&self) -> Result<(), ExprError> {
        match self {
            Dim::Literal(_) => Ok(()),
            Dim::Expr(text) => Expr::parse(text).map(|_| ()),
        }
    }

    pub fn eval(&self, viewport: Viewport) -> Result<i64, ExprError> {
        match self {
            Dim::Literal(value) => Ok(*value),
            Dim::Expr(text) => Expr::parse(text)?.eval(viewport),
        }
    }

    /// Whether the value depends on `W` or `H`. Unparseable expressions count as dependent.
    pub fn uses_viewport(&self) -> bool {
        match self {
            Dim::Literal(_) => false,
            Dim::Expr(text) => Expr::parse(text).map_or(true, |expr| expr.uses_viewport()),
        }
    }

    /// Evaluates and requires a strictly positive result that fits a GPU size.
    pub fn resolve(&self, viewport: Viewport) -> Result<u32, ExprError> {
        let value = self.eval(viewport)?;
        if value <= 0 {
            return Err(ExprError::NonPositive {
                expr: self.to_string(),
                value,
            });
        }
        u32::try_from(value).map_err(|_| ExprError::Overflow(self.to_string()))
    }
}

impl From<i64> for Dim {
    fn from(value: i64) -> Self {
        Dim::Literal(value)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Literal(value) => write!(f, "{value}"),
            Dim::Expr(text) => f.write_str(text),
        }
    }
}

/// Splits a bracketed list such as `"[W / 8, H / 8, 1]"` into its component expressions.
pub fn split_list(text: &str) -> Vec<Dim> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .or_else(|| {
            trimmed
                .strip_prefix('(')
                .and_then(|rest| rest.strip_suffix(')'))
                .filter(|rest| !rest.contains(')') || balanced(rest))
        })
        .unwrap_or(trimmed);

    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in inner.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current);
    }
    parts
        .into_iter()
        .map(|part| {
            let part = part.trim();
            match part.parse::<i64>() {
                Ok(value) => Dim::Literal(value),
                Err(_) => Dim::Expr(part.to_string()),
            }
        })
        .collect()
}

fn balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for ch in text.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str, width: u32, height: u32) -> Result<i64, ExprError> {
        Expr::parse(text)?.eval(Viewport::new(width, height))
    }

    #[test]
    fn evaluates_viewport_arithmetic() {
        assert_eq!(eval("W * H * 4 * 4", 8, 2).unwrap(), 256);
        assert_eq!(eval("(W + 15) / 16", 100, 1).unwrap(), 7);
        assert_eq!(eval("W // 2 - H % 3", 10, 7).unwrap(), 4);
        assert_eq!(eval("-W + 2 * (H - 1)", 3, 5).unwrap(), 5);
    }

    #[test]
    fn floor_division_matches_mathematical_floor() {
        assert_eq!(eval("-7 / 2", 1, 1).unwrap(), -4);
        assert_eq!(eval("7 / -2", 1, 1).unwrap(), -4);
        assert_eq!(eval("-7 % 2", 1, 1).unwrap(), 1);
        assert_eq!(eval("7 % 3", 1, 1).unwrap(), 1);
    }

    #[test]
    fn rejects_unknown_variables_at_parse_time() {
        let err = Expr::parse("W * D").unwrap_err();
        assert!(matches!(err, ExprError::UnknownVariable { ref name, .. } if name == "D"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            Expr::parse("W +").unwrap_err(),
            ExprError::UnexpectedEnd(_)
        ));
        assert!(matches!(
            Expr::parse("(W").unwrap_err(),
            ExprError::UnexpectedEnd(_)
        ));
        assert!(matches!(
            Expr::parse("W H").unwrap_err(),
            ExprError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            Expr::parse("W ** 2").unwrap_err(),
            ExprError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            Expr::parse("W.5").unwrap_err(),
            ExprError::UnexpectedChar { ch: '.', .. }
        ));
    }

    #[test]
    fn caps_nesting_depth() {
        let nested = |levels: usize| format!("{}W{}", "(".repeat(levels), ")".repeat(levels));
        assert_eq!(eval(&nested(30), 5, 1).unwrap(), 5);
        assert!(matches!(
            Expr::parse(&nested(200_000)).unwrap_err(),
            ExprError::TooDeep { limit: MAX_DEPTH, .. }
        ));
        assert!(matches!(
            Expr::parse(&format!("{}H", "-".repeat(200_000))).unwrap_err(),
            ExprError::TooDeep { .. }
        ));
    }

    #[test]
    fn caps_operator_chains() {
        let chain = |terms: usize| vec!["1"; terms].join(" + ");
        assert_eq!(eval(&chain(40), 1, 1).unwrap(), 40);
        assert!(matches!(
            Expr::parse(&chain(200_000)).unwrap_err(),
            ExprError::TooDeep { .. }
        ));
    }

    #[test]
    fn reports_division_by_zero_and_overflow() {
        assert!(matches!(
            eval("W / (H - H)", 4, 4).unwrap_err(),
            ExprError::DivisionByZero(_)
        ));
        assert!(matches!(
            eval("9223372036854775807 + W", 1, 1).unwrap_err(),
            ExprError::Overflow(_)
        ));
    }

    #[test]
    fn dims_resolve_to_positive_sizes() {
        let viewport = Viewport::new(640, 480);
        assert_eq!(Dim::Literal(3).resolve(viewport).unwrap(), 3);
        assert_eq!(Dim::Expr("W / 2".into()).resolve(viewport).unwrap(), 320);
        assert!(matches!(
            Dim::Expr("H - 480".into()).resolve(viewport).unwrap_err(),
            ExprError::NonPositive { value: 0, .. }
        ));
    }

    #[test]
    fn detects_viewport_dependence() {
        assert!(Expr::parse("W / 16").unwrap().uses_viewport());
        assert!(!Expr::parse("16 * 2").unwrap().uses_viewport());
    }

    #[test]
    fn splits_bracketed_lists() {
        let dims = split_list("[(W + 7) / 8, H / 8, 1]");
        assert_eq!(
            dims,
            vec![
                Dim::Expr("(W + 7) / 8".into()),
                Dim::Expr("H / 8".into()),
                Dim::Literal(1),
            ]
        );
        assert_eq!(split_list("W, H").len(), 2);
        assert!(split_list("[]").is_empty());
    }
}
