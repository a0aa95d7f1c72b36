//! **shader-prepcache** is a GLSL conditional preprocessor and a content-addressed cache
//! of compiled shader objects and programs.
//!
//! The preprocessor implements the subset of the C preprocessor shaders tend to need:
//! object-like and function-like `#define`s with token pasting, `#undef`, and
//! `#if` / `#ifdef` / `#ifndef` / `#elif` / `#else` / `#endif`. `#include` is recognized
//! but left in place, and directives aimed at the GLSL compiler (`#version`, `#extension`,
//! `#pragma`, ...) are passed through.
//!
//! The cache maps `(library identifier, stage, CompilerOptions)` to a BLAKE3-based
//! `CompilationIdentity` and keeps at most one compiled artifact per identity, shared
//! through reference counts. Native compilation is delegated to a user-supplied
//! `ShaderCompiler`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use shader_prepcache::*;
//!
//! struct NullCompiler;
//! impl ShaderCompiler for NullCompiler {
//!     type Handle = u32;
//!
//!     fn compile(&self, _: ShaderStage, _: &AssembledSource) -> ShaderCompilerOutput<Option<u32>> {
//!         ShaderCompilerOutput { artifact: Some(1), log: None }
//!     }
//!
//!     fn link(&self, _: &str, _: &[u32]) -> ShaderCompilerOutput<Option<u32>> {
//!         ShaderCompilerOutput { artifact: Some(2), log: None }
//!     }
//!
//!     fn delete_object(&self, _: u32) {}
//!     fn delete_program(&self, _: u32) {}
//! }
//!
//! let library = ShaderLibrary::from_manifest(vec![ManifestEntry::object(
//!     "Fill",
//!     Some(ShaderStage::Fragment),
//!     || ShaderSource::from_text("out vec4 c;\nvoid main() { c = vec4(1.0); }"),
//! )])?;
//!
//! let cache = ShaderCache::new(Arc::new(library), NullCompiler);
//! let options = CompilerOptions::new(330).with_define("HDR");
//!
//! let shader = cache.resolve("Fill", ShaderStage::Fragment, &options)?;
//! assert_eq!(cache.ref_count(shader.identity()), Some(1));
//! cache.release(shader)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod assembler;
mod cache;
mod compiler;
mod context;
mod error;
mod expander;
mod expression;
mod identity;
mod library;
mod preprocessor;
mod scanner;
mod source;

pub use assembler::*;
pub use cache::*;
pub use compiler::*;
pub use context::{Definition, Macro, PreprocessorContext, Symbol};
pub use error::*;
pub use expander::{expand_condition, expand_text, ExpansionLimits, UNBOUND_CONDITION_TOKEN};
pub use expression::{evaluate, reduce};
pub use identity::*;
pub use library::*;
pub use preprocessor::*;
pub use scanner::{
    is_comment_only_line, split_comments, strip_comments, Directive, DirectiveKind, ScannedLine,
    Scanner, Span,
};
pub use source::*;
