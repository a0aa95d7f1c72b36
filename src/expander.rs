//! Symbol and macro expansion.
//!
//! Expansion works in passes: every macro call site in the text is replaced with its
//! substituted body, then every bound symbol with its raw value. Passes repeat until the
//! text stops changing, which re-scans replacement text for further symbols and calls.
//!
//! There is no cycle detection. A definition that keeps growing its own expansion,
//! e.g. `#define X X + 1`, is cut off by `ExpansionLimits::max_passes`.
//!
//! Expansion is line-oriented. A macro call has to close its argument list on the line
//! (or comment-free code span) it starts on; `F(1,` followed by `2)` on the next line is an
//! `UnterminatedCall`.

use crate::context::{Macro, PreprocessorContext};
use crate::DefinitionError;

lazy_static::lazy_static! {
    static ref IDENT_TOKEN_RE: regex::Regex = regex::Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").unwrap();
    static ref PASTE_RE: regex::Regex = regex::Regex::new(r"\s*##\s*").unwrap();
}

/// Replacement for identifiers with no binding inside conditional expressions
pub const UNBOUND_CONDITION_TOKEN: &str = "false";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ExpansionLimits {
    /// Upper bound on re-scan passes over a single line or expression
    pub max_passes: usize,
}

impl Default for ExpansionLimits {
    fn default() -> Self {
        ExpansionLimits { max_passes: 512 }
    }
}

/// Expands macros and symbols in ordinary source text. Unbound identifiers are kept.
pub fn expand_text(
    ctx: &PreprocessorContext,
    text: &str,
    limits: ExpansionLimits,
) -> Result<String, DefinitionError> {
    expand(ctx, text, limits, None)
}

/// Expands a conditional expression. Identifiers without a binding become `false`.
pub fn expand_condition(
    ctx: &PreprocessorContext,
    text: &str,
    limits: ExpansionLimits,
) -> Result<String, DefinitionError> {
    expand(ctx, text, limits, Some(UNBOUND_CONDITION_TOKEN))
}

fn expand(
    ctx: &PreprocessorContext,
    text: &str,
    limits: ExpansionLimits,
    unbound: Option<&str>,
) -> Result<String, DefinitionError> {
    let mut current = text.to_owned();

    for _ in 0..limits.max_passes {
        let called = expand_macro_calls(ctx, &current)?;
        let next = substitute_symbols(ctx, &called, unbound);

        if next == current {
            return Ok(current);
        }
        current = next;
    }

    Err(DefinitionError::ExpansionLimit {
        passes: limits.max_passes,
    })
}

fn substitute_symbols(ctx: &PreprocessorContext, text: &str, unbound: Option<&str>) -> String {
    IDENT_TOKEN_RE
        .replace_all(text, |caps: &regex::Captures| {
            let token = &caps[0];
            match (ctx.symbol(token), unbound) {
                (Some(symbol), _) => symbol.value.clone(),
                (None, Some(replacement)) if token != "true" && token != "false" => {
                    replacement.to_owned()
                }
                (None, _) => token.to_owned(),
            }
        })
        .into_owned()
}

/// Replaces every call site of a known macro in one left-to-right sweep.
fn expand_macro_calls(ctx: &PreprocessorContext, text: &str) -> Result<String, DefinitionError> {
    if !ctx.has_macros() {
        return Ok(text.to_owned());
    }

    let alternatives: Vec<String> = ctx
        .macro_names()
        .into_iter()
        .map(regex::escape)
        .collect();
    let pattern = format!(r"\b(?:{})\s*\(", alternatives.join("|"));
    let call_re = regex::Regex::new(&pattern).map_err(|_| DefinitionError::InvalidName {
        name: pattern.clone(),
    })?;

    let mut out = String::with_capacity(text.len());
    let mut pos = 0;

    while let Some(m) = call_re.find_at(text, pos) {
        let name = m
            .as_str()
            .trim_end_matches('(')
            .trim_end();

        let mac = match ctx.macro_def(name) {
            Some(mac) => mac,
            None => break,
        };

        let (args, end) = read_arguments(text, m.end()).ok_or_else(|| {
            DefinitionError::UnterminatedCall {
                name: name.to_owned(),
            }
        })?;

        out.push_str(&text[pos..m.start()]);
        out.push_str(&invoke(mac, &args)?);
        pos = end;
    }

    out.push_str(&text[pos..]);
    Ok(out)
}

/// Reads a comma-separated argument list starting just after the opening parenthesis.
/// Returns the trimmed arguments and the byte offset just past the closing parenthesis.
fn read_arguments(text: &str, start: usize) -> Option<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut arg_start = start;

    for (offset, c) in text[start..].char_indices() {
        let idx = start + offset;
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => {
                args.push(text[arg_start..idx].trim().to_owned());
                return Some((args, idx + 1));
            }
            ')' => depth -= 1,
            ',' if depth == 0 => {
                args.push(text[arg_start..idx].trim().to_owned());
                arg_start = idx + 1;
            }
            _ => {}
        }
    }

    None
}

/// Substitutes `args` into the body of `mac` and applies token pasting.
pub fn invoke(mac: &Macro, args: &[String]) -> Result<String, DefinitionError> {
    let found = if mac.params.is_empty() && args.len() == 1 && args[0].is_empty() {
        0
    } else {
        args.len()
    };

    if found != mac.params.len() {
        return Err(DefinitionError::ArityMismatch {
            name: mac.name.clone(),
            expected: mac.params.len(),
            found,
        });
    }

    let substituted = IDENT_TOKEN_RE.replace_all(&mac.body, |caps: &regex::Captures| {
        match mac.params.iter().position(|p| *p == caps[0]) {
            Some(i) => args[i].clone(),
            None => caps[0].to_owned(),
        }
    });

    Ok(PASTE_RE.replace_all(&substituted, "").into_owned())
}
