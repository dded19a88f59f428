//! `calculate` -- safe arithmetic evaluation.
//!
//! Expressions are tokenized and evaluated by a small recursive-descent
//! parser.  Only numbers, parentheses and `+ - * / **` are accepted; there
//! are no names, calls or assignments to abuse.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/') unary)*
//! unary := ('+' | '-') unary | power
//! power := atom ('**' unary)?          right-associative
//! atom  := number | '(' expr ')'
//! ```
//!
//! Integer arithmetic stays integral until it overflows or divides; `/`
//! always yields a float.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use promptbench_agent::ToolSchema;
use promptbench_agent::tools::{ToolCategory, ToolError, ToolHandler, ToolMetadata, ToolVisibility};

/// Parentheses nested deeper than this are rejected.
const MAX_DEPTH: usize = 64;

const HINT: &str = "Only basic arithmetic is supported: +, -, *, /, **";

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

/// An evaluated value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    fn is_zero(self) -> bool {
        self.as_f64() == 0.0
    }

    pub fn to_json(self) -> Value {
        match self {
            Self::Int(i) => json!(i),
            Self::Float(f) => json!(f),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) if x.fract() == 0.0 && x.abs() < 1e16 => write!(f, "{x:.1}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    #[error("Expression cannot be empty")]
    Empty,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("result is not a real number")]
    NotReal,

    #[error("result is too large")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            b'-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            b'*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                return Err(CalcError::UnsupportedOperator("//".into()));
            }
            b'/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            b'%' | b'^' | b'&' | b'|' | b'<' | b'>' | b'~' => {
                return Err(CalcError::UnsupportedOperator((c as char).to_string()));
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'0'..=b'9' | b'.' => {
                let (number, len) = scan_number(&input[i..])?;
                tokens.push(Token::Num(number));
                i += len;
            }
            _ => {
                let ch = input[i..].chars().next().unwrap_or('?');
                return Err(CalcError::Syntax(format!("unexpected character '{ch}'")));
            }
        }
    }
    Ok(tokens)
}

/// Scan one numeric literal: digits, optional fraction, optional exponent.
fn scan_number(s: &str) -> Result<(Number, usize), CalcError> {
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut is_float = false;

    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if bytes.get(end) == Some(&b'.') {
        is_float = true;
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > digits_start {
            is_float = true;
            end = exp_end;
        }
    }

    let literal = &s[..end];
    if literal == "." {
        return Err(CalcError::Syntax("lone '.'".into()));
    }
    let number = if is_float {
        literal
            .parse::<f64>()
            .map(Number::Float)
            .map_err(|_| CalcError::Syntax(format!("bad number '{literal}'")))?
    } else {
        match literal.parse::<i64>() {
            Ok(i) => Number::Int(i),
            // Larger than i64: keep going as a float.
            Err(_) => literal
                .parse::<f64>()
                .map(Number::Float)
                .map_err(|_| CalcError::Syntax(format!("bad number '{literal}'")))?,
        }
    };
    Ok((number, end))
}

// ---------------------------------------------------------------------------
// Parser / evaluator
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<Number, CalcError> {
        let mut acc = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == Token::Plus {
                add(acc, rhs)
            } else {
                sub(acc, rhs)
            }?;
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<Number, CalcError> {
        let mut acc = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = if op == Token::Star {
                mul(acc, rhs)
            } else {
                div(acc, rhs)
            }?;
        }
        Ok(acc)
    }

    fn unary(&mut self) -> Result<Number, CalcError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            Some(Token::Minus) => {
                self.pos += 1;
                let v = self.nested(Self::unary)?;
                Ok(match v {
                    Number::Int(i) => i
                        .checked_neg()
                        .map_or(Number::Float(-(i as f64)), Number::Int),
                    Number::Float(f) => Number::Float(-f),
                })
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Number, CalcError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            let exponent = self.nested(Self::unary)?;
            return pow(base, exponent);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Number, CalcError> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let v = self.nested(Self::expr)?;
                match self.bump() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err(CalcError::Syntax("missing ')'".into())),
                }
            }
            Some(t) => Err(CalcError::Syntax(format!("unexpected token {t:?}"))),
            None => Err(CalcError::Syntax("unexpected end of expression".into())),
        }
    }

    fn nested(
        &mut self,
        f: fn(&mut Self) -> Result<Number, CalcError>,
    ) -> Result<Number, CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::Syntax("expression is nested too deeply".into()));
        }
        let out = f(self);
        self.depth -= 1;
        out
    }
}

fn finite(x: f64) -> Result<Number, CalcError> {
    if x.is_nan() {
        Err(CalcError::NotReal)
    } else if x.is_infinite() {
        Err(CalcError::Overflow)
    } else {
        Ok(Number::Float(x))
    }
}

/// Integer op when both sides are integers and it does not overflow,
/// float op otherwise.
fn arith(
    a: Number,
    b: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Number, CalcError> {
    if let (Number::Int(x), Number::Int(y)) = (a, b)
        && let Some(v) = int_op(x, y)
    {
        return Ok(Number::Int(v));
    }
    finite(float_op(a.as_f64(), b.as_f64()))
}

fn add(a: Number, b: Number) -> Result<Number, CalcError> {
    arith(a, b, i64::checked_add, |x, y| x + y)
}

fn sub(a: Number, b: Number) -> Result<Number, CalcError> {
    arith(a, b, i64::checked_sub, |x, y| x - y)
}

fn mul(a: Number, b: Number) -> Result<Number, CalcError> {
    arith(a, b, i64::checked_mul, |x, y| x * y)
}

fn div(a: Number, b: Number) -> Result<Number, CalcError> {
    if b.is_zero() {
        return Err(CalcError::DivisionByZero);
    }
    finite(a.as_f64() / b.as_f64())
}

fn pow(base: Number, exponent: Number) -> Result<Number, CalcError> {
    if base.is_zero() && exponent.as_f64() < 0.0 {
        return Err(CalcError::DivisionByZero);
    }
    if let (Number::Int(b), Number::Int(e)) = (base, exponent)
        && let Ok(e) = u32::try_from(e)
        && let Some(v) = b.checked_pow(e)
    {
        return Ok(Number::Int(v));
    }
    finite(base.as_f64().powf(exponent.as_f64()))
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<Number, CalcError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(CalcError::Empty);
    }
    let mut parser = Parser {
        tokens: tokenize(expression)?,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    match parser.peek() {
        None => Ok(value),
        Some(t) => Err(CalcError::Syntax(format!("unexpected token {t:?}"))),
    }
}

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

/// Arithmetic calculator tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct Calculator;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CalcArgs {
    expression: String,
}

/// Tool payload for one expression, including structured errors.
pub fn calculation_payload(expression: &str) -> Value {
    match evaluate(expression) {
        Ok(result) => json!({
            "expression": expression,
            "result": result.to_json(),
            "formatted": format!("{expression} = {result}"),
        }),
        Err(CalcError::Empty) => json!({ "error": CalcError::Empty.to_string() }),
        Err(CalcError::Syntax(detail)) => {
            tracing::debug!(expression, %detail, "rejected expression");
            json!({
                "error": format!("Invalid mathematical expression: '{expression}'"),
                "expression": expression,
            })
        }
        Err(CalcError::DivisionByZero) => json!({
            "error": CalcError::DivisionByZero.to_string(),
            "expression": expression,
        }),
        Err(e) => json!({
            "error": format!("Calculation failed: {e}"),
            "expression": expression,
            "hint": HINT,
        }),
    }
}

#[async_trait]
impl ToolHandler for Calculator {
    fn name(&self) -> &str {
        "calculate"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::function(
            "calculate",
            "Safely evaluate a mathematical expression. Supports basic arithmetic: +, -, *, /, \
             ** (power). No variables or functions allowed.",
            json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Mathematical expression to evaluate (e.g., '25 * 17 + 89')"
                    }
                },
                "required": ["expression"]
            }),
        )
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(ToolCategory::Utility, ToolVisibility::Hidden)
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let args: CalcArgs = serde_json::from_value(Value::Object(args))
            .map_err(|e| ToolError::invalid(format!("Invalid arguments for 'calculate': {e}")))?;
        Ok(calculation_payload(&args.expression))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(evaluate("25 * 17 + 89"), Ok(Number::Int(514)));
        assert_eq!(evaluate("2 + 3 * 4"), Ok(Number::Int(14)));
        assert_eq!(evaluate("(2 + 3) * 4"), Ok(Number::Int(20)));
        assert_eq!(evaluate("10 - 2 - 3"), Ok(Number::Int(5)));
    }

    #[test]
    fn division_is_float() {
        assert_eq!(evaluate("10 / 4"), Ok(Number::Float(2.5)));
        assert_eq!(evaluate("10 / 2"), Ok(Number::Float(5.0)));
        assert_eq!(evaluate("1.5 * 2"), Ok(Number::Float(3.0)));
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_unary() {
        assert_eq!(evaluate("2 ** 3 ** 2"), Ok(Number::Int(512)));
        assert_eq!(evaluate("-2 ** 2"), Ok(Number::Int(-4)));
        assert_eq!(evaluate("2 ** -1"), Ok(Number::Float(0.5)));
        assert_eq!(evaluate("(-8) ** 2"), Ok(Number::Int(64)));
    }

    #[test]
    fn overflow_promotes_to_float() {
        assert_eq!(
            evaluate("9223372036854775807 + 1"),
            Ok(Number::Float(9_223_372_036_854_775_808.0))
        );
        assert_eq!(evaluate("10 ** 400"), Err(CalcError::Overflow));
    }

    #[test]
    fn errors() {
        assert_eq!(evaluate("1 / 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("0 ** -1"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("   "), Err(CalcError::Empty));
        assert_eq!(evaluate("(-8) ** 0.5"), Err(CalcError::NotReal));
        assert!(matches!(evaluate("2 +"), Err(CalcError::Syntax(_))));
        assert!(matches!(evaluate("(1 + 2"), Err(CalcError::Syntax(_))));
        assert!(matches!(evaluate("abs(3)"), Err(CalcError::Syntax(_))));
        assert_eq!(
            evaluate("7 % 2"),
            Err(CalcError::UnsupportedOperator("%".into()))
        );
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let expr = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(matches!(evaluate(&expr), Err(CalcError::Syntax(_))));
    }

    #[test]
    fn number_display() {
        assert_eq!(Number::Int(514).to_string(), "514");
        assert_eq!(Number::Float(5.0).to_string(), "5.0");
        assert_eq!(Number::Float(2.5).to_string(), "2.5");
    }

    #[test]
    fn payloads() {
        assert_eq!(
            calculation_payload("25 * 17 + 89"),
            json!({"expression": "25 * 17 + 89", "result": 514, "formatted": "25 * 17 + 89 = 514"})
        );
        assert_eq!(
            calculation_payload("1/0"),
            json!({"error": "Division by zero", "expression": "1/0"})
        );
        assert_eq!(
            calculation_payload("2 +"),
            json!({"error": "Invalid mathematical expression: '2 +'", "expression": "2 +"})
        );
        assert_eq!(calculation_payload(""), json!({"error": "Expression cannot be empty"}));
        assert_eq!(calculation_payload("7 % 2")["hint"], HINT);
    }

    #[tokio::test]
    async fn tool_call_reads_expression() {
        let mut args = Map::new();
        args.insert("expression".into(), json!("10 / 4"));
        let out = Calculator.call(args).await.unwrap();
        assert_eq!(out["result"], 2.5);
        assert_eq!(out["formatted"], "10 / 4 = 2.5");
    }
}
