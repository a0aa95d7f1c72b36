use crate::ShaderStage;

/// Malformed nesting of conditional directives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    #[error("#elif without a matching #if")]
    UnmatchedElif,

    #[error("#else without a matching #if")]
    UnmatchedElse,

    #[error("#endif without a matching #if")]
    UnmatchedEndif,

    #[error("#elif after #else")]
    ElifAfterElse,

    #[error("duplicate #else")]
    DuplicateElse,

    /// Input ended with open conditional frames
    #[error("{depth} conditional block(s) not closed by #endif")]
    Unterminated { depth: usize },
}

/// Bad symbol/macro definitions, invocations or expressions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("invalid identifier {name:?}")]
    InvalidName { name: String },

    #[error("directive requires a name")]
    MissingName,

    #[error("unexpected {tokens:?} after {name:?}")]
    TrailingTokens { name: String, tokens: String },

    #[error("macro {name:?} expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unterminated argument list in call to macro {name:?}")]
    UnterminatedCall { name: String },

    #[error("invalid conditional expression {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// Expansion kept producing new text; most likely a self-referential definition
    #[error("expansion did not settle after {passes} passes")]
    ExpansionLimit { passes: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum PrepperError {
    #[error("structural error at line {line}: {source}")]
    Structural {
        line: usize,
        #[source]
        source: StructuralError,
    },

    #[error("definition error at line {line}: {source}")]
    Definition {
        line: usize,
        #[source]
        source: DefinitionError,
    },

    #[error("unknown directive #{directive} at line {line}")]
    UnknownDirective { line: usize, directive: String },
}

/// Problems populating or querying a `ShaderLibrary`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LibraryError {
    #[error("identifier {identifier:?} is already registered for {}", stage_label(.stage))]
    DuplicateIdentifier {
        identifier: String,
        stage: Option<ShaderStage>,
    },

    #[error("no library entry for {identifier:?} ({})", stage_label(.stage))]
    UnknownIdentifier {
        identifier: String,
        stage: Option<ShaderStage>,
    },

    #[error("program {identifier:?} lists no shader objects")]
    EmptyProgram { identifier: String },

    #[error("the library manifest has already been loaded")]
    AlreadyLoaded,
}

fn stage_label(stage: &Option<ShaderStage>) -> &'static str {
    stage.map_or("any stage", |s| s.name())
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("failed to preprocess {identifier:?} ({stage}): {source}")]
    Preprocess {
        identifier: String,
        stage: &'static str,
        #[source]
        source: PrepperError,
    },

    /// The native compiler rejected the assembled source
    #[error("failed to compile {identifier:?} ({stage}):\n{log}\n\n{source_listing}")]
    NativeCompile {
        identifier: String,
        stage: &'static str,
        log: String,
        source_listing: String,
    },

    #[error("failed to link program {identifier:?}:\n{log}")]
    NativeLink { identifier: String, log: String },

    #[error("no cached artifact with identity {identity}")]
    UnknownArtifact { identity: String },
}

/// Failure while applying a single directive, before a line number is attached
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl DirectiveError {
    pub fn at_line(self, line: usize) -> PrepperError {
        match self {
            DirectiveError::Structural(source) => PrepperError::Structural { line, source },
            DirectiveError::Definition(source) => PrepperError::Definition { line, source },
        }
    }
}
