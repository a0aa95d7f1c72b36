//! `#if` / `#elif` expression evaluation.
//!
//! The expression has `defined` resolved, then goes through macro and symbol expansion
//! (unbound identifiers turn into `false`). The result is reduced by repeatedly resolving
//! the innermost parenthesized group, and each flat group is evaluated over `i64` from
//! unary operators up to `&&` / `||`. The reduced string `"0"` means false; anything
//! else is true.

use crate::context::PreprocessorContext;
use crate::expander::{self, ExpansionLimits};
use crate::DefinitionError;

lazy_static::lazy_static! {
    static ref GROUP_RE: regex::Regex = regex::Regex::new(r"\(([^()]*)\)").unwrap();
    static ref DEFINED_RE: regex::Regex = regex::Regex::new(
        r"\bdefined\s*(?:\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)|([A-Za-z_][A-Za-z0-9_]*))"
    ).unwrap();
}

/// Evaluates a conditional directive's expression against the current definitions.
pub fn evaluate(
    ctx: &PreprocessorContext,
    expression: &str,
    limits: ExpansionLimits,
) -> Result<bool, DefinitionError> {
    let resolved = resolve_defined(ctx, expression);
    let expanded = expander::expand_condition(ctx, &resolved, limits)?;
    Ok(reduce(&expanded)? != "0")
}

fn resolve_defined(ctx: &PreprocessorContext, expression: &str) -> String {
    DEFINED_RE
        .replace_all(expression, |caps: &regex::Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            if ctx.is_defined(name) {
                "1"
            } else {
                "0"
            }
        })
        .into_owned()
}

/// Reduces a fully expanded expression to its integer value, as a string.
pub fn reduce(expression: &str) -> Result<String, DefinitionError> {
    let mut current = expression.to_owned();

    loop {
        let (range, value) = match GROUP_RE.captures(&current) {
            Some(caps) => match caps.get(0) {
                Some(whole) => (whole.range(), reduce_flat(expression, &caps[1])?),
                None => break,
            },
            None => break,
        };
        current.replace_range(range, &format!(" {} ", value));
    }

    reduce_flat(expression, &current).map(|value| value.to_string())
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Token {
    Num(i64),
    Op(&'static str),
}

// Longest operators first so that `<<` wins over `<`.
const OPERATORS: &[&str] = &[
    "||", "&&", "==", "!=", "<=", ">=", "<<", ">>", "|", "^", "&", "<", ">", "+", "-", "*", "/",
    "%", "!", "~",
];

fn tokenize(expr_text: &str, text: &str) -> Result<Vec<Token>, DefinitionError> {
    let mut tokens = Vec::new();
    let mut rest = text.trim_start();

    while !rest.is_empty() {
        let c = rest.chars().next().unwrap_or(' ');

        if c.is_ascii_digit() {
            let len = rest
                .find(|ch: char| !ch.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            tokens.push(Token::Num(parse_number(expr_text, &rest[..len])?));
            rest = &rest[len..];
        } else if c.is_ascii_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            let value = match &rest[..len] {
                "true" => 1,
                "false" => 0,
                other => return Err(invalid(expr_text, format!("unexpected identifier {:?}", other))),
            };
            tokens.push(Token::Num(value));
            rest = &rest[len..];
        } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(Token::Op(*op));
            rest = &rest[op.len()..];
        } else {
            return Err(invalid(expr_text, format!("unexpected character {:?}", c)));
        }

        rest = rest.trim_start();
    }

    Ok(tokens)
}

fn parse_number(expr_text: &str, literal: &str) -> Result<i64, DefinitionError> {
    let digits = literal.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));

    let parsed = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<i64>()
    };

    parsed.map_err(|_| invalid(expr_text, format!("invalid integer literal {:?}", literal)))
}

fn invalid(expression: &str, reason: String) -> DefinitionError {
    DefinitionError::InvalidExpression {
        expression: expression.trim().to_owned(),
        reason,
    }
}

/// Evaluates a parenthesis-free expression.
fn reduce_flat(expr_text: &str, text: &str) -> Result<i64, DefinitionError> {
    let tokens = tokenize(expr_text, text)?;
    if tokens.is_empty() {
        return Err(invalid(expr_text, "empty expression".to_owned()));
    }

    let mut parser = FlatParser {
        expr_text,
        tokens: &tokens,
        pos: 0,
    };
    let value = parser.logical_or()?;

    match parser.tokens.get(parser.pos) {
        None => Ok(value),
        Some(token) => Err(invalid(expr_text, format!("unexpected {:?}", token))),
    }
}

// Binary levels from loosest to tightest binding.
const LEVELS: &[&[&str]] = &[
    &["||"],
    &["&&"],
    &["|"],
    &["^"],
    &["&"],
    &["==", "!="],
    &["<", ">", "<=", ">="],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/", "%"],
];

struct FlatParser<'a> {
    expr_text: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> FlatParser<'a> {
    fn logical_or(&mut self) -> Result<i64, DefinitionError> {
        self.binary(0)
    }

    fn binary(&mut self, level: usize) -> Result<i64, DefinitionError> {
        if level == LEVELS.len() {
            return self.unary();
        }

        let mut lhs = self.binary(level + 1)?;

        while let Some(Token::Op(op)) = self.tokens.get(self.pos).copied() {
            if !LEVELS[level].contains(&op) {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = self.apply(op, lhs, rhs)?;
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, DefinitionError> {
        match self.tokens.get(self.pos).copied() {
            Some(Token::Num(value)) => {
                self.pos += 1;
                Ok(value)
            }
            Some(Token::Op(op)) if matches!(op, "!" | "~" | "-" | "+") => {
                self.pos += 1;
                let value = self.unary()?;
                Ok(match op {
                    "!" => (value == 0) as i64,
                    "~" => !value,
                    "-" => value.wrapping_neg(),
                    _ => value,
                })
            }
            Some(token) => Err(invalid(self.expr_text, format!("unexpected {:?}", token))),
            None => Err(invalid(self.expr_text, "missing operand".to_owned())),
        }
    }

    fn apply(&self, op: &str, lhs: i64, rhs: i64) -> Result<i64, DefinitionError> {
        Ok(match op {
            "||" => (lhs != 0 || rhs != 0) as i64,
            "&&" => (lhs != 0 && rhs != 0) as i64,
            "|" => lhs | rhs,
            "^" => lhs ^ rhs,
            "&" => lhs & rhs,
            "==" => (lhs == rhs) as i64,
            "!=" => (lhs != rhs) as i64,
            "<" => (lhs < rhs) as i64,
            ">" => (lhs > rhs) as i64,
            "<=" => (lhs <= rhs) as i64,
            ">=" => (lhs >= rhs) as i64,
            "<<" => lhs.wrapping_shl(rhs as u32),
            ">>" => lhs.wrapping_shr(rhs as u32),
            "+" => lhs.wrapping_add(rhs),
            "-" => lhs.wrapping_sub(rhs),
            "*" => lhs.wrapping_mul(rhs),
            "/" | "%" if rhs == 0 => {
                return Err(invalid(self.expr_text, "division by zero".to_owned()))
            }
            "/" => lhs.wrapping_div(rhs),
            "%" => lhs.wrapping_rem(rhs),
            _ => return Err(invalid(self.expr_text, format!("unknown operator {:?}", op))),
        })
    }
}
