//! The boundary to the native shader compiler.
//!
//! Creating shader and program objects is up to the user, via `ShaderCompiler`. The cache
//! only drives it, and on failure reports the compiler's info log along with the
//! assembled source.
//!
//! An implementation on top of the `gl` crate could look like:
//!
//! ```ignore
//! struct GlCompiler(gl::Gl);
//!
//! impl shader_prepcache::ShaderCompiler for GlCompiler {
//!     type Handle = u32;
//!
//!     fn compile(&self, stage: ShaderStage, source: &AssembledSource) -> ShaderCompilerOutput<Option<u32>> {
//!         unsafe {
//!             let handle = self.0.CreateShader(gl_stage(stage));
//!             let text = source.text();
//!             let ptr = text.as_ptr() as *const gl::types::GLchar;
//!             let len = text.len() as gl::types::GLint;
//!             self.0.ShaderSource(handle, 1, &ptr, &len);
//!             self.0.CompileShader(handle);
//!
//!             let mut ok: gl::types::GLint = 1;
//!             self.0.GetShaderiv(handle, gl::COMPILE_STATUS, &mut ok);
//!             let log = shader_info_log(&self.0, handle);
//!
//!             if ok != 1 {
//!                 self.0.DeleteShader(handle);
//!                 ShaderCompilerOutput { artifact: None, log }
//!             } else {
//!                 ShaderCompilerOutput { artifact: Some(handle), log }
//!             }
//!         }
//!     }
//!
//!     // link, delete_object and delete_program follow the same pattern
//! }
//! ```

use crate::{AssembledSource, ShaderStage};

/// User-defined output of the native compiler or linker, along with an info log.
pub struct ShaderCompilerOutput<Artifact> {
    pub artifact: Artifact,
    pub log: Option<String>,
}

/// Native shader compiler and linker
pub trait ShaderCompiler {
    /// Native object/program handle, e.g. a GL name
    type Handle: Clone;

    fn compile(
        &self,
        stage: ShaderStage,
        source: &AssembledSource,
    ) -> ShaderCompilerOutput<Option<Self::Handle>>;

    fn link(
        &self,
        identifier: &str,
        objects: &[Self::Handle],
    ) -> ShaderCompilerOutput<Option<Self::Handle>>;

    fn delete_object(&self, handle: Self::Handle);

    fn delete_program(&self, handle: Self::Handle);
}

lazy_static::lazy_static! {
    static ref INTEL_AMD_ERROR_RE: regex::Regex = regex::Regex::new(r"^(?:ERROR|WARNING):\s*(\d+):(\d+)").unwrap();
    static ref NV_ERROR_RE: regex::Regex = regex::Regex::new(r"^(\d+)\((\d+)\)\s*").unwrap();
}

/// Extracts the source line a diagnostic refers to, for the Intel/AMD
/// (`ERROR: 0:12: ...`) and NVIDIA (`0(12) : error ...`) log formats.
pub fn diagnostic_line(log_line: &str) -> Option<usize> {
    INTEL_AMD_ERROR_RE
        .captures(log_line)
        .or_else(|| NV_ERROR_RE.captures(log_line))
        .and_then(|captures| captures[2].parse::<usize>().ok())
}

/// Appends the offending source line under each diagnostic in `log`.
pub fn annotate_log(log: &str, source: &AssembledSource) -> String {
    let mut annotated = String::with_capacity(log.len());

    for log_line in log.lines() {
        annotated.push_str(log_line);
        annotated.push('\n');

        if let Some(text) = diagnostic_line(log_line).and_then(|n| source.line(n)) {
            annotated.push_str("    > ");
            annotated.push_str(text.trim());
            annotated.push('\n');
        }
    }

    annotated
}
