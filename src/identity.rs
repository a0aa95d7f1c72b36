use std::collections::BTreeSet;
use std::fmt;

/// Pipeline stage a shader object is compiled for
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    /// Stable name; part of the compilation identity.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::TessControl => "tess_control",
            ShaderStage::TessEvaluation => "tess_evaluation",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stage name used in the identity of linked programs
pub const PROGRAM_STAGE_NAME: &str = "program";

/// Everything besides the source itself that affects compiled output.
///
/// Definitions are `NAME` or `NAME value` strings and form a set; include identifiers
/// keep their order.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CompilerOptions {
    pub version: u32,
    pub defines: BTreeSet<String>,
    pub includes: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            version: 150,
            defines: BTreeSet::new(),
            includes: Vec::new(),
        }
    }
}

impl CompilerOptions {
    pub fn new(version: u32) -> Self {
        CompilerOptions {
            version,
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_define(mut self, definition: &str) -> Self {
        self.defines.insert(definition.to_owned());
        self
    }

    pub fn with_include(mut self, include: &str) -> Self {
        self.includes.push(include.to_owned());
        self
    }
}

/// Cache key of a compiled artifact: hex-encoded BLAKE3 digest over the library
/// identifier, stage name, version and every definition and include.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct CompilationIdentity(String);

impl CompilationIdentity {
    pub fn compute(identifier: &str, stage_name: &str, options: &CompilerOptions) -> Self {
        let mut hasher = blake3::Hasher::new();
        let version = options.version.to_string();
        let define_count = options.defines.len().to_string();
        let include_count = options.includes.len().to_string();

        // Each list is prefixed with its length, so a define can't pass for an include.
        let fields = [identifier, stage_name, version.as_str(), define_count.as_str()]
            .into_iter()
            .chain(options.defines.iter().map(String::as_str))
            .chain(std::iter::once(include_count.as_str()))
            .chain(options.includes.iter().map(String::as_str));

        // NUL-terminate each field so that ("ab", "c") and ("a", "bc") hash differently.
        for field in fields {
            hasher.update(field.as_bytes());
            hasher.update(&[0]);
        }

        CompilationIdentity(hasher.finalize().to_hex().to_string())
    }

    pub fn for_object(identifier: &str, stage: ShaderStage, options: &CompilerOptions) -> Self {
        Self::compute(identifier, stage.name(), options)
    }

    pub fn for_program(identifier: &str, options: &CompilerOptions) -> Self {
        Self::compute(identifier, PROGRAM_STAGE_NAME, options)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompilationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CompilerOptions {
        CompilerOptions::new(330)
            .with_define("FOO 1")
            .with_define("BAR")
            .with_include("common")
    }

    #[test]
    fn deterministic() {
        let a = CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &options());
        let b = CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &options());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn define_order_is_irrelevant() {
        let a = CompilerOptions::new(330).with_define("A").with_define("B");
        let b = CompilerOptions::new(330).with_define("B").with_define("A");
        assert_eq!(a, b);
        assert_eq!(
            CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &a),
            CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &b)
        );
    }

    #[test]
    fn every_input_matters() {
        let base = CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &options());

        let variants = [
            CompilationIdentity::for_object("Bar", ShaderStage::Vertex, &options()),
            CompilationIdentity::for_object("Foo", ShaderStage::Fragment, &options()),
            CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &options().with_version(450)),
            CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &options().with_define("BAZ")),
            CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &options().with_include("extra")),
            CompilationIdentity::for_program("Foo", &options()),
        ];

        for variant in &variants {
            assert_ne!(&base, variant);
        }
    }

    #[test]
    fn include_order_matters() {
        let a = CompilerOptions::default().with_include("a").with_include("b");
        let b = CompilerOptions::default().with_include("b").with_include("a");
        assert_ne!(
            CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &a),
            CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &b)
        );
    }

    #[test]
    fn defines_and_includes_are_separate() {
        let defined = CompilerOptions::new(330).with_define("RED");
        let included = CompilerOptions::new(330).with_include("RED");
        assert_ne!(
            CompilationIdentity::for_object("Foo", ShaderStage::Fragment, &defined),
            CompilationIdentity::for_object("Foo", ShaderStage::Fragment, &included)
        );

        let a = CompilerOptions::default().with_define("A").with_include("B");
        let b = CompilerOptions::default().with_define("A").with_define("B");
        assert_ne!(
            CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &a),
            CompilationIdentity::for_object("Foo", ShaderStage::Vertex, &b)
        );
    }

    #[test]
    fn every_stage_is_distinct() {
        let mut identities: Vec<_> = ShaderStage::ALL
            .iter()
            .map(|stage| CompilationIdentity::for_object("Foo", *stage, &options()))
            .chain(std::iter::once(CompilationIdentity::for_program("Foo", &options())))
            .collect();

        identities.sort();
        identities.dedup();
        assert_eq!(identities.len(), ShaderStage::ALL.len() + 1);
    }

    #[test]
    fn field_boundaries() {
        let opts = CompilerOptions::default();
        assert_ne!(
            CompilationIdentity::compute("ab", "c", &opts),
            CompilationIdentity::compute("a", "bc", &opts)
        );
    }
}
