//! Expression lexer and parser
//!
//! Parses the body of a `{{ ... }}` segment into an [`Expr`] tree. The
//! grammar is a small Jinja-like subset: literals, names, attribute and
//! index access, method and macro calls, filters, arithmetic, comparisons,
//! boolean operators and the `x if cond else y` conditional.

use crate::error::{Error, Result};
use crate::types::JsonValue;

// ============================================================================
// AST
// ============================================================================

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(JsonValue),
    Name(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Method(Box<Expr>, String, Vec<Expr>),
    Call(String, Vec<Expr>),
    Filter(Box<Expr>, String, Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    /// `x is [not] none|defined`
    Test {
        expr: Box<Expr>,
        test: String,
        negated: bool,
    },
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Pipe,
    Tilde,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => push(&mut tokens, Token::LParen, &mut i),
            ')' => push(&mut tokens, Token::RParen, &mut i),
            '[' => push(&mut tokens, Token::LBracket, &mut i),
            ']' => push(&mut tokens, Token::RBracket, &mut i),
            '{' => push(&mut tokens, Token::LBrace, &mut i),
            '}' => push(&mut tokens, Token::RBrace, &mut i),
            ',' => push(&mut tokens, Token::Comma, &mut i),
            ':' => push(&mut tokens, Token::Colon, &mut i),
            '.' if !chars.get(i + 1).is_some_and(char::is_ascii_digit)
                || matches!(
                    tokens.last(),
                    Some(Token::Ident(_) | Token::RBracket | Token::RParen)
                ) =>
            {
                push(&mut tokens, Token::Dot, &mut i);
            }
            '|' => push(&mut tokens, Token::Pipe, &mut i),
            '~' => push(&mut tokens, Token::Tilde, &mut i),
            '+' => push(&mut tokens, Token::Plus, &mut i),
            '-' => push(&mut tokens, Token::Minus, &mut i),
            '*' => push(&mut tokens, Token::Star, &mut i),
            '/' => push(&mut tokens, Token::Slash, &mut i),
            '%' => push(&mut tokens, Token::Percent, &mut i),
            '=' | '!' | '<' | '>' => {
                let next_is_eq = chars.get(i + 1) == Some(&'=');
                let token = match (c, next_is_eq) {
                    ('=', true) => Token::EqEq,
                    ('!', true) => Token::NotEq,
                    ('<', true) => Token::Le,
                    ('>', true) => Token::Ge,
                    ('<', false) => Token::Lt,
                    ('>', false) => Token::Gt,
                    ('=', false) => Token::Assign,
                    _ => return Err(Error::template(format!("Unexpected '{c}' in '{src}'"))),
                };
                tokens.push(token);
                i += if next_is_eq { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(Error::template(format!(
                                "Unterminated string literal in '{src}'"
                            )))
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).copied().unwrap_or('\\');
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                let after_dot = tokens.last() == Some(&Token::Dot);
                let mut seen_point = after_dot;
                while i < chars.len() {
                    let ch = chars[i];
                    let is_point = ch == '.'
                        && !seen_point
                        && chars.get(i + 1).is_some_and(char::is_ascii_digit);
                    if !(ch.is_ascii_digit() || ch == '_' || is_point) {
                        break;
                    }
                    seen_point |= is_point;
                    i += 1;
                }
                let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
                if text.contains('.') {
                    let value = text
                        .parse::<f64>()
                        .map_err(|_| Error::template(format!("Invalid number '{text}'")))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = text
                        .parse::<i64>()
                        .map_err(|_| Error::template(format!("Invalid number '{text}'")))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::template(format!(
                    "Unexpected character '{other}' in '{src}'"
                )))
            }
        }
    }

    Ok(tokens)
}

fn push(tokens: &mut Vec<Token>, token: Token, i: &mut usize) {
    tokens.push(token);
    *i += 1;
}

// ============================================================================
// Parser
// ============================================================================

/// Parse one expression; trailing tokens are an error
pub fn parse_expression(src: &str) -> Result<Expr> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(Error::template("Empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        src,
    };
    let expr = parser.conditional()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'s> {
    tokens: Vec<Token>,
    pos: usize,
    src: &'s str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn peek_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.tokens.get(self.pos + offset), Some(Token::Ident(name)) if name == keyword)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {token:?}")))
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::template(format!("{message} in '{}'", self.src))
    }

    fn conditional(&mut self) -> Result<Expr> {
        let then = self.or_expr()?;
        if self.peek_keyword("if") {
            self.pos += 1;
            let condition = self.or_expr()?;
            let otherwise = if self.peek_keyword("else") {
                self.pos += 1;
                Some(Box::new(self.conditional()?))
            } else {
                None
            };
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise,
            });
        }
        Ok(then)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.concat()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Ident(k)) if k == "in" => BinaryOp::In,
                Some(Token::Ident(k)) if k == "not" && self.peek_keyword_at(1, "in") => {
                    self.pos += 1;
                    BinaryOp::NotIn
                }
                Some(Token::Ident(k)) if k == "is" => {
                    self.pos += 1;
                    let negated = if self.peek_keyword("not") {
                        self.pos += 1;
                        true
                    } else {
                        false
                    };
                    let test = match self.next() {
                        Some(Token::Ident(name)) => name.to_lowercase(),
                        _ => return Err(self.error("expected test name after 'is'")),
                    };
                    left = Expr::Test {
                        expr: Box::new(left),
                        test,
                        negated,
                    };
                    continue;
                }
                _ => break,
            };
            self.pos += 1;
            let right = self.concat()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn concat(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        while self.eat(&Token::Tilde) {
            let right = self.additive()?;
            left = Expr::Binary(BinaryOp::Concat, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.next() {
                    Some(Token::Ident(name)) => name,
                    Some(Token::Int(i)) => {
                        expr = Expr::Index(Box::new(expr), Box::new(Expr::Literal(i.into())));
                        continue;
                    }
                    _ => return Err(self.error("expected attribute name after '.'")),
                };
                if self.eat(&Token::LParen) {
                    let args = self.arguments(&Token::RParen)?;
                    expr = Expr::Method(Box::new(expr), name, args);
                } else {
                    expr = Expr::Attr(Box::new(expr), name);
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.conditional()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat(&Token::Pipe) {
                let name = match self.next() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(self.error("expected filter name after '|'")),
                };
                let args = if self.eat(&Token::LParen) {
                    self.arguments(&Token::RParen)?
                } else {
                    Vec::new()
                };
                expr = Expr::Filter(Box::new(expr), name, args);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self, close: &Token) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            // keyword arguments are accepted positionally
            if matches!(self.peek(), Some(Token::Ident(_)))
                && self.tokens.get(self.pos + 1) == Some(&Token::Assign)
            {
                self.pos += 2;
            }
            args.push(self.conditional()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
            if self.eat(close) {
                return Ok(args);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(JsonValue::String(s))),
            Some(Token::Int(i)) => Ok(Expr::Literal(i.into())),
            Some(Token::Float(f)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
            )),
            Some(Token::LParen) => {
                let expr = self.conditional()?;
                if self.eat(&Token::Comma) {
                    let mut items = vec![expr];
                    items.extend(self.arguments(&Token::RParen)?);
                    return Ok(Expr::List(items));
                }
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::LBracket) => Ok(Expr::List(self.arguments(&Token::RBracket)?)),
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if self.eat(&Token::RBrace) {
                    return Ok(Expr::Dict(entries));
                }
                loop {
                    let key = self.conditional()?;
                    self.expect(&Token::Colon)?;
                    let value = self.conditional()?;
                    entries.push((key, value));
                    if self.eat(&Token::RBrace) {
                        return Ok(Expr::Dict(entries));
                    }
                    self.expect(&Token::Comma)?;
                }
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(JsonValue::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(JsonValue::Bool(false))),
                "none" | "None" | "null" => Ok(Expr::Literal(JsonValue::Null)),
                _ => {
                    if self.eat(&Token::LParen) {
                        let args = self.arguments(&Token::RParen)?;
                        Ok(Expr::Call(name, args))
                    } else {
                        Ok(Expr::Name(name))
                    }
                }
            },
            Some(other) => Err(self.error(&format!("unexpected token {other:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}
