//! Boolean expressions evaluated by CONDITION nodes.
//!
//! Grammar:
//!
//! ```text
//! or   := and ("||" and)*
//! and  := not ("&&" not)*
//! not  := "!" not | cmp
//! cmp  := atom (("==" | "!=" | "<" | "<=" | ">" | ">=") atom)?
//! atom := number | 'string' | "string" | true | false | null
//!       | ${ref.path} | ref.path | "(" or ")"
//! ```
//!
//! References resolve against the execution context; missing ones are `null`.

use crate::template::{Reference, ReferenceSource};
use crate::{NodeError, Value};
use std::cmp::Ordering;

/// Deepest allowed chain of `!` and `(` before parsing gives up.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ref(Reference),
    True,
    False,
    Null,
    Op(&'static str),
    LParen,
    RParen,
}

/// Evaluate `expression` to a boolean.
pub fn evaluate<S: ReferenceSource + ?Sized>(expression: &str, source: &S) -> Result<bool, NodeError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(NodeError::Expression("empty expression".into()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        source,
    };
    let value = parser.parse_or()?;
    if let Some(token) = parser.tokens.get(parser.pos) {
        return Err(NodeError::Expression(format!("unexpected token {token:?}")));
    }
    Ok(value.is_truthy())
}

fn tokenize(input: &str) -> Result<Vec<Token>, NodeError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| NodeError::Expression("unterminated string literal".into()))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                let end = chars[i + 2..]
                    .iter()
                    .position(|&ch| ch == '}')
                    .ok_or_else(|| NodeError::Expression("unterminated reference".into()))?;
                let body: String = chars[i + 2..i + 2 + end].iter().collect();
                let reference = Reference::parse(&body)
                    .ok_or_else(|| NodeError::Expression(format!("invalid reference '${{{body}}}'")))?;
                tokens.push(Token::Ref(reference));
                i += end + 3;
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => ("==", 2),
                    ('!', Some('=')) => ("!=", 2),
                    ('<', Some('=')) => ("<=", 2),
                    ('>', Some('=')) => (">=", 2),
                    ('&', Some('&')) => ("&&", 2),
                    ('|', Some('|')) => ("||", 2),
                    ('!', _) => ("!", 1),
                    ('<', _) => ("<", 1),
                    ('>', _) => (">", 1),
                    _ => return Err(NodeError::Expression(format!("unexpected character '{c}'"))),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            _ if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| NodeError::Expression(format!("invalid number '{text}'")))?;
                tokens.push(Token::Num(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ref(
                        Reference::parse(&word)
                            .ok_or_else(|| NodeError::Expression(format!("invalid reference '{word}'")))?,
                    ),
                });
            }
            _ => return Err(NodeError::Expression(format!("unexpected character '{c}'"))),
        }
    }

    Ok(tokens)
}

struct Parser<'a, S: ?Sized> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    source: &'a S,
}

impl<S: ReferenceSource + ?Sized> Parser<'_, S> {
    fn peek_op(&self, op: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Op(o)) if *o == op)
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, NodeError>) -> Result<T, NodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(NodeError::Expression("expression nested too deeply".into()));
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    fn parse_or(&mut self) -> Result<Value, NodeError> {
        let mut left = self.parse_and()?;
        while self.peek_op("||") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Value::Bool(left.is_truthy() || right.is_truthy());
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value, NodeError> {
        let mut left = self.parse_not()?;
        while self.peek_op("&&") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Value::Bool(left.is_truthy() && right.is_truthy());
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Value, NodeError> {
        if self.peek_op("!") {
            self.pos += 1;
            let inner = self.nested(Self::parse_not)?;
            return Ok(Value::Bool(!inner.is_truthy()));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Value, NodeError> {
        let left = self.parse_atom()?;
        let op = match self.tokens.get(self.pos) {
            Some(Token::Op(op)) if matches!(*op, "==" | "!=" | "<" | "<=" | ">" | ">=") => *op,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_atom()?;

        let result = match op {
            "==" => loose_eq(&left, &right),
            "!=" => !loose_eq(&left, &right),
            _ => {
                let ordering = compare(&left, &right).ok_or_else(|| {
                    NodeError::Expression(format!(
                        "cannot compare {} with {}",
                        left.type_name(),
                        right.type_name()
                    ))
                })?;
                match op {
                    "<" => ordering == Ordering::Less,
                    "<=" => ordering != Ordering::Greater,
                    ">" => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }
        };
        Ok(Value::Bool(result))
    }

    fn parse_atom(&mut self) -> Result<Value, NodeError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| NodeError::Expression("unexpected end of expression".into()))?;
        self.pos += 1;

        match token {
            Token::Num(n) => Ok(Value::Number(n)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::True => Ok(Value::Bool(true)),
            Token::False => Ok(Value::Bool(false)),
            Token::Null => Ok(Value::Null),
            Token::Ref(reference) => Ok(self.source.lookup(&reference).unwrap_or(Value::Null)),
            Token::LParen => {
                let inner = self.nested(Self::parse_or)?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(NodeError::Expression("missing ')'".into())),
                }
            }
            other => Err(NodeError::Expression(format!("unexpected token {other:?}"))),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((as_number(left), as_number(right)), (Some(a), Some(b)) if a == b)
        }
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => match (as_number(left), as_number(right)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(a.cmp(b)),
        },
        _ => as_number(left)?.partial_cmp(&as_number(right)?),
    }
}
