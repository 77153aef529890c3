//! Guard-condition language for mission steps.
//!
//! A deliberately small, side-effect-free subset: dotted identifier
//! references into completed-step outputs (`content.length`, `score`),
//! numeric and boolean literals, the comparisons `< > <= >= == !=`, and
//! the connectives `&& ||`. A syntactically invalid condition never
//! aborts the mission; the executor skips the step and records why.

use std::collections::HashMap;

use crate::domain::errors::{CoreError, CoreResult};

/// Scope a condition evaluates against: the outputs of completed steps
/// plus the evaluating step's declared dependencies.
pub struct ConditionScope<'a> {
    outputs: &'a HashMap<String, serde_json::Value>,
    dependencies: &'a [String],
}

impl<'a> ConditionScope<'a> {
    pub fn new(outputs: &'a HashMap<String, serde_json::Value>, dependencies: &'a [String]) -> Self {
        Self {
            outputs,
            dependencies,
        }
    }

    /// Resolve a dotted path.
    ///
    /// A leading segment naming a step resolves inside that step's
    /// output; otherwise the whole path is tried against each dependency
    /// output in declaration order, first hit wins.
    fn resolve(&self, path: &[String]) -> Value {
        if let Some(root) = self.outputs.get(&path[0]) {
            if let Some(v) = walk(root, &path[1..]) {
                return v;
            }
        }
        for dep in self.dependencies {
            if let Some(output) = self.outputs.get(dep) {
                if let Some(v) = walk(output, path) {
                    return v;
                }
            }
        }
        Value::Null
    }
}

/// Walk a JSON value along path segments. `length` on a string or array
/// yields its length.
fn walk(root: &serde_json::Value, path: &[String]) -> Option<Value> {
    let mut current = root;
    for (idx, segment) in path.iter().enumerate() {
        match current {
            serde_json::Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return None,
            },
            serde_json::Value::String(s) if segment == "length" && idx == path.len() - 1 => {
                return Some(Value::Number(s.chars().count() as f64));
            }
            serde_json::Value::Array(a) if segment == "length" && idx == path.len() - 1 => {
                return Some(Value::Number(a.len() as f64));
            }
            _ => return None,
        }
    }
    Some(Value::from_json(current))
}

/// Evaluated operand value.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Number(f64),
    Bool(bool),
    /// Missing reference or a failed dependency's `null` output.
    /// Comparisons against it never hold.
    Null,
}

impl Value {
    fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::Bool(b) => Value::Bool(*b),
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Bool(bool),
    Path(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Compare(Operand, CmpOp, Operand),
    /// A bare operand; truthy only when it evaluates to `true`.
    Truthy(Operand),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(Vec<String>),
    Number(f64),
    Op(CmpOp),
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> CoreResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(invalid(input, "single '&'"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(invalid(input, "single '|'"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err(invalid(input, "single '='"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err(invalid(input, "single '!'"));
                }
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| invalid(input, &format!("bad number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.ends_with('.') || text.contains("..") {
                    return Err(invalid(input, &format!("bad reference '{text}'")));
                }
                tokens.push(Token::Ident(text.split('.').map(String::from).collect()));
            }
            other => return Err(invalid(input, &format!("unexpected '{other}'"))),
        }
    }

    if tokens.is_empty() {
        return Err(invalid(input, "empty expression"));
    }
    Ok(tokens)
}

fn invalid(input: &str, detail: &str) -> CoreError {
    CoreError::Validation(format!("invalid condition '{input}': {detail}"))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_expr(&mut self) -> CoreResult<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> CoreResult<Expr> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> CoreResult<Expr> {
        if self.peek() == Some(&Token::LParen) {
            self.next();
            let inner = self.parse_expr()?;
            match self.next() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(invalid(self.input, "missing ')'")),
            }
        }

        let left = self.parse_operand()?;
        match self.peek() {
            Some(Token::Op(_)) => {
                let Some(Token::Op(op)) = self.next() else {
                    return Err(invalid(self.input, "expected comparison"));
                };
                let right = self.parse_operand()?;
                Ok(Expr::Compare(left, op, right))
            }
            _ => Ok(Expr::Truthy(left)),
        }
    }

    fn parse_operand(&mut self) -> CoreResult<Operand> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Operand::Number(n)),
            Some(Token::Ident(path)) => {
                if path.len() == 1 {
                    match path[0].as_str() {
                        "true" => return Ok(Operand::Bool(true)),
                        "false" => return Ok(Operand::Bool(false)),
                        _ => {}
                    }
                }
                Ok(Operand::Path(path))
            }
            _ => Err(invalid(self.input, "expected operand")),
        }
    }
}

/// A parsed, reusable condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    expr: Expr,
    source: String,
}

impl Condition {
    /// Parse a condition expression. Syntax errors are validation errors;
    /// the mission executor turns them into recorded skips.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            input,
        };
        let expr = parser.parse_expr()?;
        if parser.pos != tokens.len() {
            return Err(invalid(input, "trailing tokens"));
        }
        Ok(Self {
            expr,
            source: input.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a scope. Unresolved references behave as `null`:
    /// comparisons against them do not hold.
    pub fn evaluate(&self, scope: &ConditionScope<'_>) -> bool {
        eval(&self.expr, scope)
    }
}

fn eval(expr: &Expr, scope: &ConditionScope<'_>) -> bool {
    match expr {
        Expr::And(l, r) => eval(l, scope) && eval(r, scope),
        Expr::Or(l, r) => eval(l, scope) || eval(r, scope),
        Expr::Truthy(operand) => matches!(eval_operand(operand, scope), Value::Bool(true)),
        Expr::Compare(left, op, right) => {
            let l = eval_operand(left, scope);
            let r = eval_operand(right, scope);
            compare(l, *op, r)
        }
    }
}

fn eval_operand(operand: &Operand, scope: &ConditionScope<'_>) -> Value {
    match operand {
        Operand::Number(n) => Value::Number(*n),
        Operand::Bool(b) => Value::Bool(*b),
        Operand::Path(path) => scope.resolve(path),
    }
}

fn compare(left: Value, op: CmpOp, right: Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match op {
            CmpOp::Lt => l < r,
            CmpOp::Gt => l > r,
            CmpOp::Le => l <= r,
            CmpOp::Ge => l >= r,
            CmpOp::Eq => (l - r).abs() < f64::EPSILON,
            CmpOp::Ne => (l - r).abs() >= f64::EPSILON,
        },
        (Value::Bool(l), Value::Bool(r)) => match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            _ => false,
        },
        _ => false,
    }
}
