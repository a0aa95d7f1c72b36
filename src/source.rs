use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ExtensionBehavior {
    Require,
    Enable,
    Warn,
    Disable,
}

impl ExtensionBehavior {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtensionBehavior::Require => "require",
            ExtensionBehavior::Enable => "enable",
            ExtensionBehavior::Warn => "warn",
            ExtensionBehavior::Disable => "disable",
        }
    }
}

/// A GLSL extension the source needs, emitted as `#extension <name> : <behavior>`
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Extension {
    pub name: String,
    pub behavior: ExtensionBehavior,
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#extension {} : {}", self.name, self.behavior.as_str())
    }
}

/// Unconfigured shader source as produced by a library factory.
///
/// Lines may contain embedded newlines; the assembler splits them.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ShaderSource {
    pub lines: Vec<String>,
    pub extensions: Vec<Extension>,
}

impl ShaderSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ShaderSource {
            lines: lines.into_iter().map(Into::into).collect(),
            extensions: Vec::new(),
        }
    }

    /// Source given as a single string
    pub fn from_text(text: &str) -> Self {
        Self::new(std::iter::once(text))
    }

    pub fn with_extension(mut self, name: &str, behavior: ExtensionBehavior) -> Self {
        self.extensions.push(Extension {
            name: name.to_owned(),
            behavior,
        });
        self
    }
}
