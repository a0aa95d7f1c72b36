use crate::context::{is_identifier, Definition, PreprocessorContext};
use crate::expander::{self, ExpansionLimits};
use crate::expression;
use crate::scanner::{split_comments, Directive, DirectiveKind, ScannedLine, Scanner, Span};
use crate::{DefinitionError, DirectiveError, PrepperError};

/// Conditional-compilation preprocessor over a sequence of source lines.
///
/// `#define`, `#undef` and the conditional directives are consumed. `#include` is
/// recognized but not resolved; it is emitted as-is when in an active region, as are
/// directives meant for the native compiler (`#version`, `#extension`, `#pragma`, ...).
pub struct Preprocessor {
    context: PreprocessorContext,
    limits: ExpansionLimits,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(ExpansionLimits::default())
    }
}

impl Preprocessor {
    pub fn new(limits: ExpansionLimits) -> Self {
        Preprocessor {
            context: PreprocessorContext::new(),
            limits,
        }
    }

    /// Pre-seeds a definition, as if by `#define <definition>`.
    pub fn define(&mut self, definition: &str) -> Result<(), DefinitionError> {
        self.context.define(Definition::parse(definition)?);
        Ok(())
    }

    pub fn context(&self) -> &PreprocessorContext {
        &self.context
    }

    /// Runs every line through the directive scanner and returns the lines that survive
    /// conditional compilation, with macros and symbols expanded.
    pub fn process<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<Vec<String>, PrepperError> {
        let mut output = Vec::with_capacity(lines.len());
        let mut last_line = 0;

        for scanned in Scanner::new(lines) {
            let scanned = scanned?;
            last_line = scanned.line();

            match scanned {
                ScannedLine::Text {
                    line,
                    text,
                    in_block_comment,
                } => {
                    if self.context.is_active() {
                        let expanded = self
                            .expand_code(&text, in_block_comment)
                            .map_err(|source| PrepperError::Definition { line, source })?;
                        output.push(expanded);
                    }
                }
                ScannedLine::PassThrough { text, .. } => {
                    if self.context.is_active() {
                        output.push(text);
                    }
                }
                ScannedLine::Directive { line, directive } => {
                    if let Some(text) = self
                        .apply(&directive)
                        .map_err(|err| err.at_line(line))?
                    {
                        output.push(text);
                    }
                }
            }
        }

        self.context
            .finish()
            .map_err(|source| PrepperError::Structural {
                line: last_line,
                source,
            })?;

        Ok(output)
    }

    /// Expands the code spans of a text line; comments are kept as written.
    fn expand_code(&self, text: &str, in_block_comment: bool) -> Result<String, DefinitionError> {
        let mut expanded = String::with_capacity(text.len());

        for span in split_comments(text, in_block_comment) {
            match span {
                Span::Code(code) => {
                    expanded.push_str(&expander::expand_text(&self.context, code, self.limits)?)
                }
                Span::Comment(comment) => expanded.push_str(comment),
            }
        }

        Ok(expanded)
    }

    /// Applies one directive, returning text to emit in its place, if any.
    fn apply(&mut self, directive: &Directive) -> Result<Option<String>, DirectiveError> {
        let limits = self.limits;
        let args = directive.args.as_str();

        match directive.kind {
            DirectiveKind::If => {
                self.context
                    .push_if(|ctx| expression::evaluate(ctx, args, limits))?;
            }
            DirectiveKind::Ifdef | DirectiveKind::Ifndef => {
                // Only the name is checked in an inactive region.
                let name = directive_name(args)?;
                self.context
                    .push_ifdef(name, directive.kind == DirectiveKind::Ifdef);
            }
            DirectiveKind::Elif => {
                self.context
                    .elif(|ctx| expression::evaluate(ctx, args, limits))?;
            }
            DirectiveKind::Else => self.context.else_branch()?,
            DirectiveKind::Endif => self.context.endif()?,
            _ if !self.context.is_active() => {}
            DirectiveKind::Define => self.context.define(Definition::parse(args)?),
            DirectiveKind::Undef => self.context.undefine(directive_name(args)?),
            DirectiveKind::Include => return Ok(Some(directive.to_line())),
        }

        Ok(None)
    }
}

/// The single name argument of `#ifdef`, `#ifndef` and `#undef`.
fn directive_name(args: &str) -> Result<&str, DefinitionError> {
    let (name, rest) = match args.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (args, ""),
    };

    if name.is_empty() {
        return Err(DefinitionError::MissingName);
    }
    if !is_identifier(name) {
        return Err(DefinitionError::InvalidName {
            name: name.to_owned(),
        });
    }
    if !rest.is_empty() {
        return Err(DefinitionError::TrailingTokens {
            name: name.to_owned(),
            tokens: rest.to_owned(),
        });
    }

    Ok(name)
}
