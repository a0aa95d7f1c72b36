//! Turns unconfigured library source plus `CompilerOptions` into the final text handed
//! to the native compiler.
//!
//! The output is a pure function of the inputs: the cache keys artifacts on
//! `(identifier, stage, options)` and never looks at the assembled text.

use std::fmt::Write;

use crate::expander::ExpansionLimits;
use crate::preprocessor::Preprocessor;
use crate::scanner::is_comment_only_line;
use crate::{CompilerOptions, PrepperError, ShaderSource, ShaderStage};

lazy_static::lazy_static! {
    static ref VERSION_RE: regex::Regex = regex::Regex::new(r"^\s*#\s*version\b").unwrap();
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AssemblyConfig {
    /// Versions at or above this get a profile-qualified `#version` line
    pub profile_threshold: u32,
    pub profile: String,
    pub limits: ExpansionLimits,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        AssemblyConfig {
            profile_threshold: 150,
            profile: "core".to_owned(),
            limits: ExpansionLimits::default(),
        }
    }
}

/// Final, preprocessed shader text for one stage
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AssembledSource {
    pub identifier: String,
    pub stage: ShaderStage,
    pub lines: Vec<String>,
}

impl AssembledSource {
    /// The source as one string, every line newline-terminated
    pub fn text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Listing with 1-based line numbers, for diagnostics
    pub fn numbered(&self) -> String {
        let width = self.lines.len().to_string().len();
        let mut listing = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            let _ = writeln!(listing, "{:>width$}: {}", i + 1, line, width = width);
        }
        listing
    }

    /// 1-based line lookup
    pub fn line(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|idx| self.lines.get(idx))
            .map(String::as_str)
    }
}

pub fn version_line(version: u32, config: &AssemblyConfig) -> String {
    if version >= config.profile_threshold && !config.profile.is_empty() {
        format!("#version {} {}", version, config.profile)
    } else {
        format!("#version {}", version)
    }
}

/// `NAME=value` is accepted as a spelling of `NAME value`.
fn define_line(definition: &str) -> String {
    match definition.split_once('=') {
        Some((name, value)) if !name.trim().contains(char::is_whitespace) => {
            format!("#define {} {}", name.trim(), value.trim())
        }
        _ => format!("#define {}", definition.trim()),
    }
}

pub fn assemble(
    identifier: &str,
    stage: ShaderStage,
    source: &ShaderSource,
    options: &CompilerOptions,
    config: &AssemblyConfig,
) -> Result<AssembledSource, PrepperError> {
    let mut body: Vec<String> = Vec::new();

    body.extend(source.extensions.iter().map(ToString::to_string));
    body.extend(options.defines.iter().map(|d| define_line(d)));

    for raw in &source.lines {
        for line in raw.split('\n').map(|l| l.trim_end_matches('\r')) {
            // The version line is synthesized from the options.
            if VERSION_RE.is_match(line) {
                log::debug!("{:?} ({}): dropping {:?}", identifier, stage, line);
                continue;
            }
            body.push(line.to_owned());
        }
    }

    let mut preprocessor = Preprocessor::new(config.limits);
    let processed = preprocessor.process(&body)?;

    let mut lines = Vec::with_capacity(processed.len() + 1);
    lines.push(version_line(options.version, config));
    lines.extend(
        processed
            .into_iter()
            .filter(|line| !is_comment_only_line(line)),
    );

    log::debug!(
        "assembled {:?} ({}): {} lines",
        identifier,
        stage,
        lines.len()
    );

    Ok(AssembledSource {
        identifier: identifier.to_owned(),
        stage,
        lines,
    })
}
