//! Reverse Polish notation expressions for COMPUTE data sources and CDEFs.
//!
//! An expression is a comma-separated list of tokens evaluated on a stack,
//! e.g. `in,out,+,8,*`. Expressions are compiled once with
//! [`RpnExpr::parse`] and evaluated per row with [`RpnExpr::eval`], which
//! resolves variable names through a caller-supplied lookup.
//!
//! Unknown values are NaN. Arithmetic and comparisons propagate them; `UN`
//! tests for them and `ADDNAN` treats them as zero.

use std::fmt;

use crate::error::{Result, RpnError};
use crate::timespec;

/// Maximum length of a variable name.
const MAX_VARIABLE_LEN: usize = 255;

/// A compiled RPN expression.
///
/// # Examples
///
/// ```rust
/// use rrdb::rpn::RpnExpr;
///
/// let expr = RpnExpr::parse("a,b,+,2,/").unwrap();
/// let value = expr
///     .eval(|name| match name {
///         "a" => Some(3.0),
///         "b" => Some(5.0),
///         _ => None,
///     }, 0)
///     .unwrap();
/// assert_eq!(value, 4.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RpnExpr {
    source: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Variable(String),
    Op(Op),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    AddNan,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Un,
    IsInf,
    If,
    Min,
    Max,
    Limit,
    Unkn,
    Inf,
    NegInf,
    Now,
    Time,
    Dup,
    Pop,
    Exc,
    Sqrt,
    Sin,
    Cos,
    Log,
    Exp,
    Abs,
    Floor,
    Ceil,
    Atan,
    Atan2,
    Avg,
}

impl Op {
    fn from_token(token: &str) -> Option<Self> {
        let op = match token {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Mod,
            "ADDNAN" => Self::AddNan,
            "LT" => Self::Lt,
            "LE" => Self::Le,
            "GT" => Self::Gt,
            "GE" => Self::Ge,
            "EQ" => Self::Eq,
            "NE" => Self::Ne,
            "UN" => Self::Un,
            "ISINF" => Self::IsInf,
            "IF" => Self::If,
            "MIN" => Self::Min,
            "MAX" => Self::Max,
            "LIMIT" => Self::Limit,
            "UNKN" => Self::Unkn,
            "INF" => Self::Inf,
            "NEGINF" => Self::NegInf,
            "NOW" => Self::Now,
            "TIME" => Self::Time,
            "DUP" => Self::Dup,
            "POP" => Self::Pop,
            "EXC" => Self::Exc,
            "SQRT" => Self::Sqrt,
            "SIN" => Self::Sin,
            "COS" => Self::Cos,
            "LOG" => Self::Log,
            "EXP" => Self::Exp,
            "ABS" => Self::Abs,
            "FLOOR" => Self::Floor,
            "CEIL" => Self::Ceil,
            "ATAN" => Self::Atan,
            "ATAN2" => Self::Atan2,
            "AVG" => Self::Avg,
            _ => return None,
        };
        Some(op)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::AddNan => "ADDNAN",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Un => "UN",
            Self::IsInf => "ISINF",
            Self::If => "IF",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Limit => "LIMIT",
            Self::Unkn => "UNKN",
            Self::Inf => "INF",
            Self::NegInf => "NEGINF",
            Self::Now => "NOW",
            Self::Time => "TIME",
            Self::Dup => "DUP",
            Self::Pop => "POP",
            Self::Exc => "EXC",
            Self::Sqrt => "SQRT",
            Self::Sin => "SIN",
            Self::Cos => "COS",
            Self::Log => "LOG",
            Self::Exp => "EXP",
            Self::Abs => "ABS",
            Self::Floor => "FLOOR",
            Self::Ceil => "CEIL",
            Self::Atan => "ATAN",
            Self::Atan2 => "ATAN2",
            Self::Avg => "AVG",
        }
    }
}

impl RpnExpr {
    /// Compiles an expression.
    ///
    /// # Errors
    ///
    /// Returns [`RpnError::Empty`] for an empty expression and
    /// [`RpnError::UnknownToken`] for a token that is not a number, an
    /// operator, or a valid variable name.
    pub fn parse(expr: &str) -> Result<Self> {
        if expr.trim().is_empty() {
            return Err(RpnError::Empty.into());
        }

        let tokens = expr
            .split(',')
            .map(|raw| parse_token(raw.trim()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: expr.to_string(),
            tokens,
        })
    }

    /// Returns the variable names referenced by the expression, in order of
    /// first appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        let mut seen: Vec<&str> = Vec::new();
        for token in &self.tokens {
            if let Token::Variable(name) = token
                && !seen.contains(&name.as_str())
            {
                seen.push(name);
            }
        }
        seen.into_iter()
    }

    /// Returns the expression text as given to [`RpnExpr::parse`].
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression.
    ///
    /// `lookup` resolves variable names; `time` is the value pushed by
    /// `TIME` (the timestamp of the row being computed).
    ///
    /// # Errors
    ///
    /// Returns [`RpnError`] on stack underflow, an unbound variable, an
    /// invalid `AVG` count, or if the final stack does not hold exactly one
    /// value.
    #[allow(clippy::cast_precision_loss)] // Timestamps and counts are far below 2^52
    pub fn eval<F>(&self, lookup: F, time: u64) -> Result<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut stack: Vec<f64> = Vec::with_capacity(self.tokens.len());

        for token in &self.tokens {
            match token {
                Token::Number(value) => stack.push(*value),
                Token::Variable(name) => {
                    let value = lookup(name).ok_or_else(|| RpnError::UnknownVariable {
                        name: name.clone(),
                    })?;
                    stack.push(value);
                }
                Token::Op(op) => apply(*op, &mut stack, time as f64)?,
            }
        }

        if stack.len() != 1 {
            return Err(RpnError::FinalStackSize { size: stack.len() }.into());
        }
        Ok(stack[0])
    }
}

impl fmt::Display for RpnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_token(raw: &str) -> Result<Token> {
    if let Some(op) = Op::from_token(raw) {
        return Ok(Token::Op(op));
    }

    let numeric_start = raw
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+');
    if numeric_start && let Ok(value) = raw.parse::<f64>() {
        return Ok(Token::Number(value));
    }

    if valid_variable_name(raw) {
        return Ok(Token::Variable(raw.to_string()));
    }

    Err(RpnError::UnknownToken {
        token: raw.to_string(),
    }
    .into())
}

/// Returns `true` if `name` may be used as an RPN variable (a DS name or an
/// export vname).
pub fn valid_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_VARIABLE_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && Op::from_token(name).is_none()
}

fn pop(stack: &mut Vec<f64>, op: Op) -> Result<f64> {
    stack.pop().ok_or_else(|| {
        RpnError::StackUnderflow {
            op: op.name().to_string(),
        }
        .into()
    })
}

/// Compares two values, propagating NaN from either side.
fn compare(a: f64, b: f64, cmp: fn(f64, f64) -> bool) -> f64 {
    if a.is_nan() {
        a
    } else if b.is_nan() {
        b
    } else if cmp(a, b) {
        1.0
    } else {
        0.0
    }
}

fn bool_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

#[allow(clippy::cast_precision_loss)] // Wall clock seconds are far below 2^52
fn apply(op: Op, stack: &mut Vec<f64>, time: f64) -> Result<()> {
    let value = match op {
        Op::Unkn => f64::NAN,
        Op::Inf => f64::INFINITY,
        Op::NegInf => f64::NEG_INFINITY,
        Op::Now => timespec::now() as f64,
        Op::Time => time,

        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::AddNan | Op::Atan2 => {
            let b = pop(stack, op)?;
            let a = pop(stack, op)?;
            match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div => a / b,
                Op::Mod => a % b,
                Op::AddNan => match (a.is_nan(), b.is_nan()) {
                    (true, true) => f64::NAN,
                    (true, false) => b,
                    (false, true) => a,
                    (false, false) => a + b,
                },
                _ => a.atan2(b),
            }
        }

        Op::Lt | Op::Le | Op::Gt | Op::Ge | Op::Eq | Op::Ne => {
            let b = pop(stack, op)?;
            let a = pop(stack, op)?;
            let cmp: fn(f64, f64) -> bool = match op {
                Op::Lt => |a, b| a < b,
                Op::Le => |a, b| a <= b,
                Op::Gt => |a, b| a > b,
                Op::Ge => |a, b| a >= b,
                Op::Eq => |a, b| a == b,
                _ => |a, b| a != b,
            };
            compare(a, b, cmp)
        }

        Op::Min | Op::Max => {
            let b = pop(stack, op)?;
            let a = pop(stack, op)?;
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else if op == Op::Min {
                a.min(b)
            } else {
                a.max(b)
            }
        }

        Op::Un => {
            let a = pop(stack, op)?;
            bool_value(a.is_nan())
        }
        Op::IsInf => {
            let a = pop(stack, op)?;
            bool_value(a.is_infinite())
        }

        Op::If => {
            let else_value = pop(stack, op)?;
            let then_value = pop(stack, op)?;
            let condition = pop(stack, op)?;
            if condition.is_nan() || condition == 0.0 {
                else_value
            } else {
                then_value
            }
        }

        Op::Limit => {
            let upper = pop(stack, op)?;
            let lower = pop(stack, op)?;
            let x = pop(stack, op)?;
            if x.is_nan() || lower.is_nan() || upper.is_nan() || x < lower || x > upper {
                f64::NAN
            } else {
                x
            }
        }

        Op::Dup => {
            let a = pop(stack, op)?;
            stack.push(a);
            a
        }
        Op::Pop => {
            pop(stack, op)?;
            return Ok(());
        }
        Op::Exc => {
            let b = pop(stack, op)?;
            let a = pop(stack, op)?;
            stack.push(b);
            a
        }

        Op::Sqrt | Op::Sin | Op::Cos | Op::Log | Op::Exp | Op::Abs | Op::Floor | Op::Ceil
        | Op::Atan => {
            let a = pop(stack, op)?;
            match op {
                Op::Sqrt => a.sqrt(),
                Op::Sin => a.sin(),
                Op::Cos => a.cos(),
                Op::Log => a.ln(),
                Op::Exp => a.exp(),
                Op::Abs => a.abs(),
                Op::Floor => a.floor(),
                Op::Ceil => a.ceil(),
                _ => a.atan(),
            }
        }

        Op::Avg => {
            let count = pop(stack, op)?;
            if count.is_nan() || count < 0.0 || count.fract() != 0.0 {
                return Err(RpnError::InvalidCount {
                    op: op.name().to_string(),
                    count,
                }
                .into());
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // checked above
            let count = count as usize;
            let mut sum = 0.0;
            let mut known = 0usize;
            for _ in 0..count {
                let v = pop(stack, op)?;
                if !v.is_nan() {
                    sum += v;
                    known += 1;
                }
            }
            if known == 0 { f64::NAN } else { sum / known as f64 }
        }
    };

    stack.push(value);
    Ok(())
}
