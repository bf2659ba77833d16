//! Node conditions: a small boolean expression language over form data.
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | compare
//! compare := operand (("==" | "!=" | "<" | "<=" | ">" | ">=") operand)?
//! operand := path | string | number | true | false | null | "(" expr ")"
//! path    := ident ("." ident)*
//! ```
//!
//! Paths resolve against the latest form revision. A missing path is `null`.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
  #[error("unexpected character {ch:?} at {pos}")]
  UnexpectedChar { ch: char, pos: usize },

  #[error("unterminated string starting at {0}")]
  UnterminatedString(usize),

  #[error("invalid number {0:?}")]
  BadNumber(String),

  #[error("unexpected {found} at token {pos}")]
  UnexpectedToken { found: String, pos: usize },

  #[error("unexpected end of expression")]
  UnexpectedEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Literal(Value),
  Path(Vec<String>),
  Not(Box<Expr>),
  And(Box<Expr>, Box<Expr>),
  Or(Box<Expr>, Box<Expr>),
  Compare(Box<Expr>, CmpOp, Box<Expr>),
}

/// A parsed condition together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
  source: String,
  expr:   Expr,
}

impl Condition {
  pub fn parse(source: &str) -> Result<Self, ConditionError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    match parser.peek() {
      None => Ok(Self { source: source.trim().to_owned(), expr }),
      Some(tok) => Err(ConditionError::UnexpectedToken {
        found: tok.to_string(),
        pos:   parser.pos,
      }),
    }
  }

  pub fn source(&self) -> &str { &self.source }

  pub fn expr(&self) -> &Expr { &self.expr }

  pub fn evaluate(&self, form: &Value) -> bool { truthy(&eval(&self.expr, form)) }
}

impl FromStr for Condition {
  type Err = ConditionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl fmt::Display for Condition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.source) }
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Ident(String),
  Str(String),
  Num(f64),
  Dot,
  LParen,
  RParen,
  Not,
  And,
  Or,
  Cmp(CmpOp),
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Token::Ident(s) => write!(f, "identifier {s:?}"),
      Token::Str(s) => write!(f, "string {s:?}"),
      Token::Num(n) => write!(f, "number {n}"),
      Token::Dot => f.write_str("'.'"),
      Token::LParen => f.write_str("'('"),
      Token::RParen => f.write_str("')'"),
      Token::Not => f.write_str("'!'"),
      Token::And => f.write_str("'&&'"),
      Token::Or => f.write_str("'||'"),
      Token::Cmp(op) => write!(f, "operator {op:?}"),
    }
  }
}

fn lex(src: &str) -> Result<Vec<Token>, ConditionError> {
  let chars: Vec<char> = src.chars().collect();
  let mut out = Vec::new();
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    let next = chars.get(i + 1).copied();
    match c {
      c if c.is_whitespace() => i += 1,
      '(' => {
        out.push(Token::LParen);
        i += 1;
      }
      ')' => {
        out.push(Token::RParen);
        i += 1;
      }
      '.' => {
        out.push(Token::Dot);
        i += 1;
      }
      '&' if next == Some('&') => {
        out.push(Token::And);
        i += 2;
      }
      '|' if next == Some('|') => {
        out.push(Token::Or);
        i += 2;
      }
      '=' if next == Some('=') => {
        out.push(Token::Cmp(CmpOp::Eq));
        i += 2;
      }
      '!' if next == Some('=') => {
        out.push(Token::Cmp(CmpOp::Ne));
        i += 2;
      }
      '!' => {
        out.push(Token::Not);
        i += 1;
      }
      '<' | '>' => {
        let eq = next == Some('=');
        let op = match (c, eq) {
          ('<', false) => CmpOp::Lt,
          ('<', true) => CmpOp::Le,
          ('>', false) => CmpOp::Gt,
          _ => CmpOp::Ge,
        };
        out.push(Token::Cmp(op));
        i += if eq { 2 } else { 1 };
      }
      '"' | '\'' => {
        let start = i;
        i += 1;
        let mut s = String::new();
        loop {
          match chars.get(i) {
            None => return Err(ConditionError::UnterminatedString(start)),
            Some(&q) if q == c => break,
            Some(&'\\') => {
              if let Some(&esc) = chars.get(i + 1) {
                s.push(esc);
              }
              i += 2;
            }
            Some(&ch) => {
              s.push(ch);
              i += 1;
            }
          }
        }
        i += 1;
        out.push(Token::Str(s));
      }
      c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
        let start = i;
        i += 1;
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
          i += 1;
        }
        let text: String = chars[start..i].iter().collect();
        let n = text
          .parse::<f64>()
          .map_err(|_| ConditionError::BadNumber(text.clone()))?;
        out.push(Token::Num(n));
      }
      c if c.is_alphabetic() || c == '_' => {
        let start = i;
        while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
          i += 1;
        }
        out.push(Token::Ident(chars[start..i].iter().collect()));
      }
      other => return Err(ConditionError::UnexpectedChar { ch: other, pos: i }),
    }
  }

  Ok(out)
}

// ─── Parser ──────────────────────────────────────────────────────────────────

struct Parser {
  tokens: Vec<Token>,
  pos:    usize,
}

impl Parser {
  fn peek(&self) -> Option<&Token> { self.tokens.get(self.pos) }

  fn bump(&mut self) -> Option<Token> {
    let tok = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    tok
  }

  fn or(&mut self) -> Result<Expr, ConditionError> {
    let mut lhs = self.and()?;
    while self.peek() == Some(&Token::Or) {
      self.pos += 1;
      let rhs = self.and()?;
      lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  fn and(&mut self) -> Result<Expr, ConditionError> {
    let mut lhs = self.unary()?;
    while self.peek() == Some(&Token::And) {
      self.pos += 1;
      let rhs = self.unary()?;
      lhs = Expr::And(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  fn unary(&mut self) -> Result<Expr, ConditionError> {
    if self.peek() == Some(&Token::Not) {
      self.pos += 1;
      return Ok(Expr::Not(Box::new(self.unary()?)));
    }
    self.compare()
  }

  fn compare(&mut self) -> Result<Expr, ConditionError> {
    let lhs = self.operand()?;
    if let Some(Token::Cmp(op)) = self.peek() {
      let op = *op;
      self.pos += 1;
      let rhs = self.operand()?;
      return Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)));
    }
    Ok(lhs)
  }

  fn operand(&mut self) -> Result<Expr, ConditionError> {
    let at = self.pos;
    match self.bump() {
      None => Err(ConditionError::UnexpectedEnd),
      Some(Token::LParen) => {
        let inner = self.or()?;
        match self.bump() {
          Some(Token::RParen) => Ok(inner),
          Some(tok) => Err(ConditionError::UnexpectedToken {
            found: tok.to_string(),
            pos:   self.pos - 1,
          }),
          None => Err(ConditionError::UnexpectedEnd),
        }
      }
      Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
      Some(Token::Num(n)) => Ok(Expr::Literal(
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number),
      )),
      Some(Token::Ident(word)) => match word.as_str() {
        "true" => Ok(Expr::Literal(Value::Bool(true))),
        "false" => Ok(Expr::Literal(Value::Bool(false))),
        "null" => Ok(Expr::Literal(Value::Null)),
        _ => {
          let mut path = vec![word];
          while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            match self.bump() {
              Some(Token::Ident(seg)) => path.push(seg),
              Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => {
                path.push((n as u64).to_string())
              }
              Some(tok) => {
                return Err(ConditionError::UnexpectedToken {
                  found: tok.to_string(),
                  pos:   self.pos - 1,
                });
              }
              None => return Err(ConditionError::UnexpectedEnd),
            }
          }
          Ok(Expr::Path(path))
        }
      },
      Some(tok) => Err(ConditionError::UnexpectedToken { found: tok.to_string(), pos: at }),
    }
  }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

fn eval(expr: &Expr, form: &Value) -> Value {
  match expr {
    Expr::Literal(v) => v.clone(),
    Expr::Path(path) => lookup(form, path).cloned().unwrap_or(Value::Null),
    Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, form))),
    Expr::And(a, b) => Value::Bool(truthy(&eval(a, form)) && truthy(&eval(b, form))),
    Expr::Or(a, b) => Value::Bool(truthy(&eval(a, form)) || truthy(&eval(b, form))),
    Expr::Compare(a, op, b) => Value::Bool(compare(&eval(a, form), *op, &eval(b, form))),
  }
}

fn lookup<'a>(form: &'a Value, path: &[String]) -> Option<&'a Value> {
  path.iter().try_fold(form, |cur, seg| match cur {
    Value::Object(map) => map.get(seg),
    Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

fn truthy(v: &Value) -> bool {
  match v {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(a) => !a.is_empty(),
    Value::Object(o) => !o.is_empty(),
  }
}

fn compare(a: &Value, op: CmpOp, b: &Value) -> bool {
  let ordering = match (a, b) {
    (Value::Number(x), Value::Number(y)) => x.as_f64().zip(y.as_f64()).and_then(|(x, y)| x.partial_cmp(&y)),
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
    (Value::Null, Value::Null) => Some(Ordering::Equal),
    _ => None,
  };
  match op {
    CmpOp::Eq => ordering == Some(Ordering::Equal) || (ordering.is_none() && a == b),
    CmpOp::Ne => !(ordering == Some(Ordering::Equal) || (ordering.is_none() && a == b)),
    CmpOp::Lt => ordering == Some(Ordering::Less),
    CmpOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
    CmpOp::Gt => ordering == Some(Ordering::Greater),
    CmpOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn holds(src: &str, form: Value) -> bool { Condition::parse(src).unwrap().evaluate(&form) }

  #[test]
  fn bare_paths_use_truthiness() {
    assert!(holds("rp_required", json!({"rp_required": true})));
    assert!(!holds("rp_required", json!({})));
    assert!(!holds("thesis.title", json!({"thesis": {"title": ""}})));
    assert!(holds("authors.0", json!({"authors": ["A"]})));
  }

  #[test]
  fn comparisons_and_logic() {
    let form = json!({"pages": 120, "lang": "en", "draft": false});
    assert!(holds("pages >= 100 && lang == 'en'", form.clone()));
    assert!(holds("pages < 100 || !draft", form.clone()));
    assert!(!holds("(pages > 200 || lang != \"en\") && true", form.clone()));
    assert!(holds("missing == null", form));
  }

  #[test]
  fn mismatched_types_never_order() {
    assert!(!holds("pages > 'ten'", json!({"pages": 12})));
    assert!(holds("pages != 'ten'", json!({"pages": 12})));
  }

  #[test]
  fn parse_errors() {
    assert!(matches!(Condition::parse("a &&"), Err(ConditionError::UnexpectedEnd)));
    assert!(matches!(Condition::parse("a # b"), Err(ConditionError::UnexpectedChar { ch: '#', .. })));
    assert!(matches!(Condition::parse("'open"), Err(ConditionError::UnterminatedString(0))));
    assert!(matches!(Condition::parse("a b"), Err(ConditionError::UnexpectedToken { .. })));
  }
}
