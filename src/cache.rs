//! Content-addressed cache of compiled shader objects and linked programs.
//!
//! Artifacts are keyed by their `CompilationIdentity`, so there is at most one artifact per
//! `(identifier, stage, options)`. Every successful `resolve` hands out one reference,
//! and every reference goes back through `release`. An artifact is destroyed by the
//! `release` that drops its count to zero, and can be created again by a later `resolve`.
//! Dropping the cache destroys nothing; call `shutdown` to free what is left.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::assembler::{assemble, AssemblyConfig};
use crate::compiler::{annotate_log, ShaderCompiler};
use crate::{CacheError, CompilationIdentity, CompilerOptions, ShaderLibrary, ShaderStage};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArtifactKind {
    Object(ShaderStage),
    Program,
}

/// One reference to a cached artifact. Give it back with `ShaderCache::release`.
#[derive(Debug)]
#[must_use = "cache references must be released"]
pub struct ArtifactHandle<H> {
    identity: CompilationIdentity,
    kind: ArtifactKind,
    handle: H,
}

impl<H> ArtifactHandle<H> {
    pub fn identity(&self) -> &CompilationIdentity {
        &self.identity
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// The native object or program handle
    pub fn native(&self) -> &H {
        &self.handle
    }
}

/// Outcome of `ShaderCache::release`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Released {
    /// Other references remain; the count after this release
    Retained(usize),
    Destroyed,
}

struct CompiledArtifact<H> {
    handle: H,
    kind: ArtifactKind,
    ref_count: usize,

    /// Objects a program holds one reference each to
    members: Vec<CompilationIdentity>,
}

type Arena<H> = HashMap<CompilationIdentity, CompiledArtifact<H>>;

pub struct ShaderCache<C: ShaderCompiler> {
    library: Arc<ShaderLibrary>,
    compiler: C,
    config: AssemblyConfig,
    artifacts: Mutex<Arena<C::Handle>>,
}

impl<C: ShaderCompiler> ShaderCache<C> {
    pub fn new(library: Arc<ShaderLibrary>, compiler: C) -> Self {
        Self::with_config(library, compiler, AssemblyConfig::default())
    }

    pub fn with_config(library: Arc<ShaderLibrary>, compiler: C, config: AssemblyConfig) -> Self {
        ShaderCache {
            library,
            compiler,
            config,
            artifacts: Mutex::new(HashMap::new()),
        }
    }

    pub fn library(&self) -> &ShaderLibrary {
        &self.library
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn identity_of(
        &self,
        identifier: &str,
        stage: ShaderStage,
        options: &CompilerOptions,
    ) -> CompilationIdentity {
        CompilationIdentity::for_object(identifier, stage, options)
    }

    /// Returns a reference to the shader object for `identifier` at `stage`,
    /// compiling it on first use.
    pub fn resolve(
        &self,
        identifier: &str,
        stage: ShaderStage,
        options: &CompilerOptions,
    ) -> Result<ArtifactHandle<C::Handle>, CacheError> {
        let mut artifacts = self.artifacts.lock();
        self.acquire_object(&mut artifacts, identifier, stage, options)
    }

    /// Returns a reference to the linked program `identifier`, compiling and linking
    /// its objects on first use. The program keeps its objects alive until it is destroyed.
    pub fn resolve_program(
        &self,
        identifier: &str,
        options: &CompilerOptions,
    ) -> Result<ArtifactHandle<C::Handle>, CacheError> {
        let mut artifacts = self.artifacts.lock();
        let identity = CompilationIdentity::for_program(identifier, options);

        if let Some(handle) = Self::acquire_cached(&mut artifacts, &identity) {
            log::debug!("program cache hit: {:?}", identifier);
            return Ok(handle);
        }

        log::debug!("program cache miss: {:?} ({})", identifier, identity);
        let entry = self.library.program(identifier)?;

        let mut members = Vec::with_capacity(entry.objects.len());
        for (stage, object) in &entry.objects {
            match self.acquire_object(&mut artifacts, object, *stage, options) {
                Ok(member) => members.push(member),
                Err(err) => {
                    self.release_all(&mut artifacts, members);
                    return Err(err);
                }
            }
        }

        let native: Vec<C::Handle> = members.iter().map(|m| m.handle.clone()).collect();
        let output = self.compiler.link(identifier, &native);

        let handle = match output.artifact {
            Some(handle) => handle,
            None => {
                self.release_all(&mut artifacts, members);
                return Err(CacheError::NativeLink {
                    identifier: identifier.to_owned(),
                    log: output.log.unwrap_or_else(|| "unknown error".to_owned()),
                });
            }
        };

        if let Some(log) = output.log.filter(|log| !log.trim().is_empty()) {
            log::warn!("linker output for {:?}: {}", identifier, log);
        }
        log::info!("linked program {:?} ({})", identifier, identity);

        artifacts.insert(
            identity.clone(),
            CompiledArtifact {
                handle: handle.clone(),
                kind: ArtifactKind::Program,
                ref_count: 1,
                members: members.into_iter().map(|m| m.identity).collect(),
            },
        );

        Ok(ArtifactHandle {
            identity,
            kind: ArtifactKind::Program,
            handle,
        })
    }

    /// Gives back one reference. The artifact is destroyed when this was the last one.
    pub fn release(&self, handle: ArtifactHandle<C::Handle>) -> Result<Released, CacheError> {
        let mut artifacts = self.artifacts.lock();
        self.release_identity(&mut artifacts, &handle.identity)
    }

    /// Current reference count of a cached artifact
    pub fn ref_count(&self, identity: &CompilationIdentity) -> Option<usize> {
        self.artifacts.lock().get(identity).map(|a| a.ref_count)
    }

    pub fn contains(&self, identity: &CompilationIdentity) -> bool {
        self.artifacts.lock().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }

    /// Destroys every remaining artifact regardless of outstanding references.
    /// Returns the number of artifacts destroyed.
    pub fn shutdown(&self) -> usize {
        let mut artifacts = self.artifacts.lock();
        let mut drained: Vec<(CompilationIdentity, CompiledArtifact<C::Handle>)> =
            artifacts.drain().collect();

        // Programs go before the objects attached to them.
        drained.sort_by_key(|(_, a)| a.kind != ArtifactKind::Program);

        // References held by programs being destroyed here aren't leaks.
        let mut held_by_programs: HashMap<CompilationIdentity, usize> = HashMap::new();
        for (_, artifact) in &drained {
            for member in &artifact.members {
                *held_by_programs.entry(member.clone()).or_default() += 1;
            }
        }

        let count = drained.len();
        for (identity, artifact) in drained {
            let held = held_by_programs.get(&identity).copied().unwrap_or(0);
            let leaked = artifact.ref_count.saturating_sub(held);
            if leaked > 0 {
                log::warn!(
                    "destroying {:?} artifact {} with {} outstanding reference(s)",
                    artifact.kind,
                    identity,
                    leaked
                );
            }
            self.destroy(artifact);
        }

        count
    }

    fn acquire_cached(
        artifacts: &mut Arena<C::Handle>,
        identity: &CompilationIdentity,
    ) -> Option<ArtifactHandle<C::Handle>> {
        artifacts.get_mut(identity).map(|artifact| {
            artifact.ref_count += 1;
            ArtifactHandle {
                identity: identity.clone(),
                kind: artifact.kind,
                handle: artifact.handle.clone(),
            }
        })
    }

    fn acquire_object(
        &self,
        artifacts: &mut Arena<C::Handle>,
        identifier: &str,
        stage: ShaderStage,
        options: &CompilerOptions,
    ) -> Result<ArtifactHandle<C::Handle>, CacheError> {
        let identity = CompilationIdentity::for_object(identifier, stage, options);

        if let Some(handle) = Self::acquire_cached(artifacts, &identity) {
            log::debug!("cache hit: {:?} ({})", identifier, stage);
            return Ok(handle);
        }

        log::debug!("cache miss: {:?} ({}) {}", identifier, stage, identity);

        let factory = self.library.lookup(identifier, stage)?;
        let assembled = assemble(identifier, stage, &factory.source(), options, &self.config)
            .map_err(|source| CacheError::Preprocess {
                identifier: identifier.to_owned(),
                stage: stage.name(),
                source,
            })?;

        let output = self.compiler.compile(stage, &assembled);

        let handle = match output.artifact {
            Some(handle) => handle,
            None => {
                let log = output.log.unwrap_or_else(|| "unknown error".to_owned());
                return Err(CacheError::NativeCompile {
                    identifier: identifier.to_owned(),
                    stage: stage.name(),
                    log: annotate_log(&log, &assembled),
                    source_listing: assembled.numbered(),
                });
            }
        };

        if let Some(log) = output.log.filter(|log| !log.trim().is_empty()) {
            log::warn!(
                "compiler output for {:?} ({}):\n{}",
                identifier,
                stage,
                annotate_log(&log, &assembled)
            );
        }
        log::info!("compiled {:?} ({}) {}", identifier, stage, identity);

        let kind = ArtifactKind::Object(stage);
        artifacts.insert(
            identity.clone(),
            CompiledArtifact {
                handle: handle.clone(),
                kind,
                ref_count: 1,
                members: Vec::new(),
            },
        );

        Ok(ArtifactHandle {
            identity,
            kind,
            handle,
        })
    }

    fn release_all(&self, artifacts: &mut Arena<C::Handle>, handles: Vec<ArtifactHandle<C::Handle>>) {
        for handle in handles {
            // Just acquired under the same lock, so the identity is present.
            let _ = self.release_identity(artifacts, &handle.identity);
        }
    }

    fn release_identity(
        &self,
        artifacts: &mut Arena<C::Handle>,
        identity: &CompilationIdentity,
    ) -> Result<Released, CacheError> {
        let artifact = artifacts
            .get_mut(identity)
            .ok_or_else(|| CacheError::UnknownArtifact {
                identity: identity.to_string(),
            })?;

        artifact.ref_count = artifact.ref_count.saturating_sub(1);
        if artifact.ref_count > 0 {
            log::debug!("released {} ({} left)", identity, artifact.ref_count);
            return Ok(Released::Retained(artifact.ref_count));
        }

        let mut artifact = match artifacts.remove(identity) {
            Some(artifact) => artifact,
            None => return Ok(Released::Destroyed),
        };

        log::debug!("destroying {:?} artifact {}", artifact.kind, identity);

        let members = std::mem::take(&mut artifact.members);
        self.destroy(artifact);

        for member in &members {
            self.release_identity(artifacts, member)?;
        }

        Ok(Released::Destroyed)
    }

    fn destroy(&self, artifact: CompiledArtifact<C::Handle>) {
        match artifact.kind {
            ArtifactKind::Object(_) => self.compiler.delete_object(artifact.handle),
            ArtifactKind::Program => self.compiler.delete_program(artifact.handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        AssembledSource, LibraryError, ManifestEntry, ShaderCompilerOutput, ShaderSource,
    };

    #[derive(Default)]
    struct MockCompiler {
        next_handle: AtomicU32,
        compiled: Mutex<Vec<(ShaderStage, String)>>,
        linked: Mutex<Vec<Vec<u32>>>,
        deleted_objects: Mutex<Vec<u32>>,
        deleted_programs: Mutex<Vec<u32>>,
    }

    impl ShaderCompiler for MockCompiler {
        type Handle = u32;

        fn compile(
            &self,
            stage: ShaderStage,
            source: &AssembledSource,
        ) -> ShaderCompilerOutput<Option<u32>> {
            if let Some(idx) = source.lines.iter().position(|l| l.contains("syntax error")) {
                return ShaderCompilerOutput {
                    artifact: None,
                    log: Some(format!("ERROR: 0:{}: syntax error", idx + 1)),
                };
            }

            self.compiled.lock().push((stage, source.text()));
            ShaderCompilerOutput {
                artifact: Some(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1),
                log: None,
            }
        }

        fn link(&self, identifier: &str, objects: &[u32]) -> ShaderCompilerOutput<Option<u32>> {
            if identifier == "Broken" {
                return ShaderCompilerOutput {
                    artifact: None,
                    log: Some("error: unresolved varying".to_owned()),
                };
            }

            self.linked.lock().push(objects.to_vec());
            ShaderCompilerOutput {
                artifact: Some(1000 + self.next_handle.fetch_add(1, Ordering::SeqCst)),
                log: None,
            }
        }

        fn delete_object(&self, handle: u32) {
            self.deleted_objects.lock().push(handle);
        }

        fn delete_program(&self, handle: u32) {
            self.deleted_programs.lock().push(handle);
        }
    }

    fn library() -> Arc<ShaderLibrary> {
        let text = |s: &'static str| move || ShaderSource::from_text(s);

        let manifest = vec![
            ManifestEntry::object(
                "Foo",
                Some(ShaderStage::Vertex),
                text("void main() { gl_Position = vec4(0.0); }"),
            ),
            ManifestEntry::object(
                "Foo",
                Some(ShaderStage::Fragment),
                text("#ifdef RED\ncolor = red;\n#else\ncolor = blue;\n#endif"),
            ),
            ManifestEntry::object("Bad", Some(ShaderStage::Fragment), text("syntax error here")),
            ManifestEntry::object("Unbalanced", None, text("#if 1\nint a;")),
            ManifestEntry::program(
                "FooProgram",
                &[(ShaderStage::Vertex, "Foo"), (ShaderStage::Fragment, "Foo")],
            ),
            ManifestEntry::program(
                "Broken",
                &[(ShaderStage::Vertex, "Foo"), (ShaderStage::Fragment, "Foo")],
            ),
            ManifestEntry::program(
                "Partial",
                &[(ShaderStage::Vertex, "Foo"), (ShaderStage::Fragment, "Bad")],
            ),
        ];

        match ShaderLibrary::from_manifest(manifest) {
            Ok(library) => Arc::new(library),
            Err(err) => panic!("{}", err),
        }
    }

    fn cache() -> ShaderCache<MockCompiler> {
        ShaderCache::new(library(), MockCompiler::default())
    }

    #[test]
    fn resolving_twice_shares_the_artifact() -> anyhow::Result<()> {
        let cache = cache();
        let options = CompilerOptions::new(330);

        let a = cache.resolve("Foo", ShaderStage::Vertex, &options)?;
        let b = cache.resolve("Foo", ShaderStage::Vertex, &options.clone())?;

        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.native(), b.native());
        assert_eq!(a.kind(), ArtifactKind::Object(ShaderStage::Vertex));
        assert_eq!(
            a.identity(),
            &cache.identity_of("Foo", ShaderStage::Vertex, &options)
        );
        assert_eq!(cache.ref_count(a.identity()), Some(2));
        assert_eq!(cache.compiler().compiled.lock().len(), 1);
        assert_eq!(cache.len(), 1);

        let native = *a.native();
        let identity = a.identity().clone();

        assert_eq!(cache.release(b)?, Released::Retained(1));
        assert!(cache.compiler().deleted_objects.lock().is_empty());
        assert_eq!(cache.release(a)?, Released::Destroyed);
        assert_eq!(*cache.compiler().deleted_objects.lock(), vec![native]);
        assert!(!cache.contains(&identity));
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn options_select_distinct_artifacts() -> anyhow::Result<()> {
        let cache = cache();

        let blue = cache.resolve("Foo", ShaderStage::Fragment, &CompilerOptions::new(330))?;
        let red = cache.resolve(
            "Foo",
            ShaderStage::Fragment,
            &CompilerOptions::new(330).with_define("RED"),
        )?;

        assert_ne!(blue.identity(), red.identity());
        assert_ne!(blue.native(), red.native());

        let compiled = cache.compiler().compiled.lock().clone();
        assert_eq!(compiled.len(), 2);
        assert!(compiled[0].1.contains("color = blue;"));
        assert!(compiled[1].1.contains("color = red;"));

        cache.release(blue)?;
        cache.release(red)?;
        Ok(())
    }

    #[test]
    fn includes_do_not_alias_defines() -> anyhow::Result<()> {
        let cache = cache();

        let red = cache.resolve(
            "Foo",
            ShaderStage::Fragment,
            &CompilerOptions::new(330).with_define("RED"),
        )?;
        let included = cache.resolve(
            "Foo",
            ShaderStage::Fragment,
            &CompilerOptions::new(330).with_include("RED"),
        )?;

        assert_ne!(red.identity(), included.identity());
        assert_ne!(red.native(), included.native());
        assert_eq!(cache.ref_count(red.identity()), Some(1));

        let compiled = cache.compiler().compiled.lock().clone();
        assert_eq!(compiled.len(), 2);
        assert!(compiled[1].1.contains("color = blue;"));

        cache.release(red)?;
        cache.release(included)?;
        Ok(())
    }

    #[test]
    fn recreated_after_teardown() -> anyhow::Result<()> {
        let cache = cache();
        let options = CompilerOptions::default();

        let first = cache.resolve("Foo", ShaderStage::Vertex, &options)?;
        let identity = first.identity().clone();
        assert_eq!(cache.release(first)?, Released::Destroyed);
        assert_eq!(cache.ref_count(&identity), None);

        let second = cache.resolve("Foo", ShaderStage::Vertex, &options)?;
        assert_eq!(second.identity(), &identity);
        assert_eq!(cache.ref_count(&identity), Some(1));
        assert_eq!(cache.compiler().compiled.lock().len(), 2);

        cache.release(second)?;
        Ok(())
    }

    #[test]
    fn native_compile_error() {
        let cache = cache();

        match cache.resolve("Bad", ShaderStage::Fragment, &CompilerOptions::new(330)) {
            Err(CacheError::NativeCompile {
                identifier,
                stage,
                log,
                source_listing,
            }) => {
                assert_eq!(identifier, "Bad");
                assert_eq!(stage, "fragment");
                assert_eq!(log, "ERROR: 0:2: syntax error\n    > syntax error here\n");
                assert_eq!(source_listing, "1: #version 330 core\n2: syntax error here\n");
            }
            val => panic!("{:?}", val),
        }

        assert!(cache.is_empty());
    }

    #[test]
    fn preprocessing_error() {
        let cache = cache();

        match cache.resolve("Unbalanced", ShaderStage::Compute, &CompilerOptions::default()) {
            Err(CacheError::Preprocess {
                identifier,
                stage: "compute",
                source: crate::PrepperError::Structural { .. },
            }) => assert_eq!(identifier, "Unbalanced"),
            val => panic!("{:?}", val),
        }

        assert!(cache.is_empty());
        assert!(cache.compiler().compiled.lock().is_empty());
    }

    #[test]
    fn unknown_identifier() {
        let cache = cache();

        match cache.resolve("Foo", ShaderStage::Geometry, &CompilerOptions::default()) {
            Err(CacheError::Library(LibraryError::UnknownIdentifier { identifier, stage })) => {
                assert_eq!(identifier, "Foo");
                assert_eq!(stage, Some(ShaderStage::Geometry));
            }
            val => panic!("{:?}", val),
        }
    }

    #[test]
    fn programs_hold_their_objects() -> anyhow::Result<()> {
        let cache = cache();
        let options = CompilerOptions::new(330);

        let program = cache.resolve_program("FooProgram", &options)?;
        assert_eq!(program.kind(), ArtifactKind::Program);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.compiler().linked.lock().len(), 1);

        let vertex_id = cache.identity_of("Foo", ShaderStage::Vertex, &options);
        let fragment_id = cache.identity_of("Foo", ShaderStage::Fragment, &options);
        assert_eq!(cache.ref_count(&vertex_id), Some(1));
        assert_eq!(cache.ref_count(&fragment_id), Some(1));

        let again = cache.resolve_program("FooProgram", &options)?;
        assert_eq!(again.native(), program.native());
        assert_eq!(cache.ref_count(program.identity()), Some(2));
        assert_eq!(cache.compiler().linked.lock().len(), 1);

        let vertex = cache.resolve("Foo", ShaderStage::Vertex, &options)?;
        assert_eq!(cache.ref_count(&vertex_id), Some(2));
        assert_eq!(cache.compiler().compiled.lock().len(), 2);

        assert_eq!(cache.release(again)?, Released::Retained(1));
        assert_eq!(cache.release(program)?, Released::Destroyed);
        assert_eq!(cache.compiler().deleted_programs.lock().len(), 1);
        assert_eq!(cache.ref_count(&vertex_id), Some(1));
        assert_eq!(cache.ref_count(&fragment_id), None);

        assert_eq!(cache.release(vertex)?, Released::Destroyed);
        assert!(cache.is_empty());
        assert_eq!(cache.compiler().deleted_objects.lock().len(), 2);
        Ok(())
    }

    #[test]
    fn link_failure_releases_objects() {
        let cache = cache();

        match cache.resolve_program("Broken", &CompilerOptions::default()) {
            Err(CacheError::NativeLink { identifier, log }) => {
                assert_eq!(identifier, "Broken");
                assert_eq!(log, "error: unresolved varying");
            }
            val => panic!("{:?}", val),
        }

        assert!(cache.is_empty());
        assert_eq!(cache.compiler().deleted_objects.lock().len(), 2);
    }

    #[test]
    fn partial_program_failure_releases_objects() {
        let cache = cache();

        assert!(matches!(
            cache.resolve_program("Partial", &CompilerOptions::default()),
            Err(CacheError::NativeCompile { .. })
        ));
        assert!(cache.is_empty());
        assert_eq!(cache.compiler().deleted_objects.lock().len(), 1);
    }

    #[test]
    fn concurrent_misses_compile_once() -> anyhow::Result<()> {
        let cache = cache();
        let options = CompilerOptions::new(450).with_define("RED");

        let handles = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| cache.resolve("Foo", ShaderStage::Fragment, &options)))
                .collect();

            workers
                .into_iter()
                .map(|worker| match worker.join() {
                    Ok(result) => result,
                    Err(_) => panic!("resolver thread panicked"),
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        assert_eq!(cache.compiler().compiled.lock().len(), 1);
        assert_eq!(cache.ref_count(handles[0].identity()), Some(8));

        for handle in handles {
            cache.release(handle)?;
        }
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn shutdown_destroys_everything() -> anyhow::Result<()> {
        let cache = cache();
        let options = CompilerOptions::default();

        let _program = cache.resolve_program("FooProgram", &options)?;
        let _vertex = cache.resolve("Foo", ShaderStage::Vertex, &options)?;

        assert_eq!(cache.shutdown(), 3);
        assert!(cache.is_empty());
        assert_eq!(cache.compiler().deleted_programs.lock().len(), 1);
        assert_eq!(cache.compiler().deleted_objects.lock().len(), 2);
        Ok(())
    }

    #[test]
    fn release_into_another_cache() -> anyhow::Result<()> {
        let first = cache();
        let second = cache();

        let handle = first.resolve("Foo", ShaderStage::Vertex, &CompilerOptions::default())?;
        assert!(matches!(
            second.release(handle),
            Err(CacheError::UnknownArtifact { .. })
        ));
        assert_eq!(first.len(), 1);
        Ok(())
    }
}
