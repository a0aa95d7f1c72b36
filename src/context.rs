use std::collections::HashMap;

use crate::{DefinitionError, DirectiveError, StructuralError};

lazy_static::lazy_static! {
    static ref IDENT_RE: regex::Regex = regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref DEFINE_RE: regex::Regex = regex::Regex::new(r"^([^\s(]+)(?:\(([^)]*)\))?\s*(.*)$").unwrap();
}

pub fn is_identifier(s: &str) -> bool {
    IDENT_RE.is_match(s)
}

/// Object-like definition, `#define NAME value`
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Symbol {
    pub name: String,

    /// Unexpanded replacement text
    pub value: String,
}

/// Function-like definition, `#define NAME(a, b) body`
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Macro {
    pub name: String,
    pub params: Vec<String>,

    /// Unexpanded body; may contain parameter tokens and ` ## ` paste markers
    pub body: String,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Definition {
    Symbol(Symbol),
    Macro(Macro),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::Symbol(s) => &s.name,
            Definition::Macro(m) => &m.name,
        }
    }

    /// Parses the argument text of a `#define` directive.
    pub fn parse(args: &str) -> Result<Self, DefinitionError> {
        let args = args.trim();
        let caps = DEFINE_RE
            .captures(args)
            .ok_or(DefinitionError::MissingName)?;

        let name = caps.get(1).map_or("", |m| m.as_str());
        if !is_identifier(name) {
            return Err(DefinitionError::InvalidName {
                name: name.to_owned(),
            });
        }

        let body = caps.get(3).map_or("", |m| m.as_str()).trim().to_owned();

        match caps.get(2) {
            Some(params) => {
                let params = parse_params(params.as_str())?;
                Ok(Definition::Macro(Macro {
                    name: name.to_owned(),
                    params,
                    body,
                }))
            }
            None => Ok(Definition::Symbol(Symbol {
                name: name.to_owned(),
                value: body,
            })),
        }
    }
}

fn parse_params(list: &str) -> Result<Vec<String>, DefinitionError> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut params: Vec<String> = Vec::new();
    for param in list.split(',').map(str::trim) {
        if !is_identifier(param) || params.iter().any(|p| p == param) {
            return Err(DefinitionError::InvalidName {
                name: param.to_owned(),
            });
        }
        params.push(param.to_owned());
    }

    Ok(params)
}

/// One level of `#if` / `#elif` / `#else` / `#endif` nesting
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ConditionalFrame {
    /// Lines in the current branch are emitted
    pub active_branch: bool,

    /// Some branch of this chain has already been taken
    pub had_active_branch: bool,

    pub had_else_branch: bool,
}

impl ConditionalFrame {
    fn new(active: bool) -> Self {
        ConditionalFrame {
            active_branch: active,
            had_active_branch: active,
            had_else_branch: false,
        }
    }

    /// A frame opened inside an inactive region; none of its branches may activate.
    fn dead() -> Self {
        ConditionalFrame {
            active_branch: false,
            had_active_branch: true,
            had_else_branch: false,
        }
    }
}

/// Symbol and macro tables plus the conditional frame stack of one preprocessing session.
#[derive(Default, Debug)]
pub struct PreprocessorContext {
    symbols: HashMap<String, Symbol>,
    macros: HashMap<String, Macro>,
    frames: Vec<ConditionalFrame>,
}

impl PreprocessorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a definition, replacing any previous one of the same name in either table.
    pub fn define(&mut self, definition: Definition) {
        let name = definition.name().to_owned();
        self.symbols.remove(&name);
        self.macros.remove(&name);

        match definition {
            Definition::Symbol(symbol) => {
                self.symbols.insert(name, symbol);
            }
            Definition::Macro(mac) => {
                self.macros.insert(name, mac);
            }
        }
    }

    /// Removes `name` from whichever table holds it; unknown names are ignored.
    pub fn undefine(&mut self, name: &str) {
        if self.symbols.remove(name).is_none() {
            self.macros.remove(name);
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.symbols.contains_key(name) || self.macros.contains_key(name)
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn macro_def(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    /// Names of all function-like macros, sorted
    pub fn macro_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.macros.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_macros(&self) -> bool {
        !self.macros.is_empty()
    }

    /// True when every enclosing conditional branch is active
    pub fn is_active(&self) -> bool {
        self.frames.iter().all(|f| f.active_branch)
    }

    /// Opens a new conditional chain. `condition` is only evaluated in an active region.
    pub fn push_if<F>(&mut self, condition: F) -> Result<(), DefinitionError>
    where
        F: FnOnce(&Self) -> Result<bool, DefinitionError>,
    {
        let frame = if self.is_active() {
            ConditionalFrame::new(condition(self)?)
        } else {
            ConditionalFrame::dead()
        };
        self.frames.push(frame);
        Ok(())
    }

    /// `#ifdef` (`expect_defined == true`) and `#ifndef`
    pub fn push_ifdef(&mut self, name: &str, expect_defined: bool) {
        let frame = if self.is_active() {
            ConditionalFrame::new(self.is_defined(name) == expect_defined)
        } else {
            ConditionalFrame::dead()
        };
        self.frames.push(frame);
    }

    /// Moves to the next `#elif` branch; the first true branch of a chain wins.
    pub fn elif<F>(&mut self, condition: F) -> Result<(), DirectiveError>
    where
        F: FnOnce(&Self) -> Result<bool, DefinitionError>,
    {
        let top = *self.frames.last().ok_or(StructuralError::UnmatchedElif)?;

        if top.had_else_branch {
            return Err(StructuralError::ElifAfterElse.into());
        }

        // A dead frame has `had_active_branch` set, so `condition` only runs in active regions.
        let active = !top.had_active_branch && condition(self)?;

        if let Some(frame) = self.frames.last_mut() {
            frame.active_branch = active;
            frame.had_active_branch |= active;
        }
        Ok(())
    }

    pub fn else_branch(&mut self) -> Result<(), StructuralError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(StructuralError::UnmatchedElse)?;

        if frame.had_else_branch {
            return Err(StructuralError::DuplicateElse);
        }

        frame.had_else_branch = true;
        frame.active_branch = !frame.had_active_branch;
        frame.had_active_branch = true;
        Ok(())
    }

    pub fn endif(&mut self) -> Result<(), StructuralError> {
        self.frames
            .pop()
            .map(|_| ())
            .ok_or(StructuralError::UnmatchedEndif)
    }

    /// Checks that every conditional chain was closed.
    pub fn finish(&self) -> Result<(), StructuralError> {
        if self.frames.is_empty() {
            Ok(())
        } else {
            Err(StructuralError::Unterminated {
                depth: self.frames.len(),
            })
        }
    }
}
