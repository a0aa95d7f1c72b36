//! Registry of shader sources and programs, keyed by library identifier.
//!
//! Objects are registered either for one stage or as generic sources usable for any
//! stage. An identifier can't be both: a stage-specific entry with a generic fallback
//! under the same identifier is rejected as a duplicate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{LibraryError, ShaderSource, ShaderStage};

/// Produces the unconfigured source text of a library entry
pub trait SourceFactory: Send + Sync {
    fn source(&self) -> ShaderSource;
}

impl<F> SourceFactory for F
where
    F: Fn() -> ShaderSource + Send + Sync,
{
    fn source(&self) -> ShaderSource {
        self()
    }
}

/// A linkable program: the library objects it consists of, one per stage
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ProgramEntry {
    pub identifier: String,
    pub objects: Vec<(ShaderStage, String)>,
}

impl ProgramEntry {
    pub fn new(identifier: &str, objects: &[(ShaderStage, &str)]) -> Self {
        ProgramEntry {
            identifier: identifier.to_owned(),
            objects: objects
                .iter()
                .map(|(stage, id)| (*stage, (*id).to_owned()))
                .collect(),
        }
    }
}

/// One line of a startup manifest, see `ShaderLibrary::load`
pub enum ManifestEntry {
    Object {
        identifier: String,
        stage: Option<ShaderStage>,
        factory: Arc<dyn SourceFactory>,
    },
    Program(ProgramEntry),
}

impl ManifestEntry {
    pub fn object<F>(identifier: &str, stage: Option<ShaderStage>, factory: F) -> Self
    where
        F: SourceFactory + 'static,
    {
        ManifestEntry::Object {
            identifier: identifier.to_owned(),
            stage,
            factory: Arc::new(factory),
        }
    }

    pub fn program(identifier: &str, objects: &[(ShaderStage, &str)]) -> Self {
        ManifestEntry::Program(ProgramEntry::new(identifier, objects))
    }
}

#[derive(Clone, Default)]
struct Tables {
    staged: HashMap<(String, ShaderStage), Arc<dyn SourceFactory>>,
    generic: HashMap<String, Arc<dyn SourceFactory>>,
    programs: HashMap<String, ProgramEntry>,
    loaded: bool,
}

impl Tables {
    fn insert_object(
        &mut self,
        identifier: String,
        stage: Option<ShaderStage>,
        factory: Arc<dyn SourceFactory>,
    ) -> Result<(), LibraryError> {
        let duplicate = match stage {
            Some(stage) => {
                self.generic.contains_key(&identifier)
                    || self.staged.contains_key(&(identifier.clone(), stage))
            }
            None => {
                self.generic.contains_key(&identifier)
                    || self.staged.keys().any(|(id, _)| *id == identifier)
            }
        };

        if duplicate {
            return Err(LibraryError::DuplicateIdentifier { identifier, stage });
        }

        log::trace!(
            "registered {:?} for {}",
            identifier,
            stage.map_or("any stage", ShaderStage::name)
        );

        match stage {
            Some(stage) => self.staged.insert((identifier, stage), factory),
            None => self.generic.insert(identifier, factory),
        };
        Ok(())
    }

    fn insert_program(&mut self, entry: ProgramEntry) -> Result<(), LibraryError> {
        if entry.objects.is_empty() {
            return Err(LibraryError::EmptyProgram {
                identifier: entry.identifier,
            });
        }

        if self.programs.contains_key(&entry.identifier) {
            return Err(LibraryError::DuplicateIdentifier {
                identifier: entry.identifier,
                stage: None,
            });
        }

        self.programs.insert(entry.identifier.clone(), entry);
        Ok(())
    }

    fn insert(&mut self, entry: ManifestEntry) -> Result<(), LibraryError> {
        match entry {
            ManifestEntry::Object {
                identifier,
                stage,
                factory,
            } => self.insert_object(identifier, stage, factory),
            ManifestEntry::Program(program) => self.insert_program(program),
        }
    }
}

#[derive(Default)]
pub struct ShaderLibrary {
    tables: RwLock<Tables>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a library from a startup manifest.
    pub fn from_manifest<I>(manifest: I) -> Result<Self, LibraryError>
    where
        I: IntoIterator<Item = ManifestEntry>,
    {
        let library = Self::new();
        library.load(manifest)?;
        Ok(library)
    }

    /// Populates the library from a manifest. Happens at most once; either every
    /// entry is registered or, on error, none is.
    pub fn load<I>(&self, manifest: I) -> Result<(), LibraryError>
    where
        I: IntoIterator<Item = ManifestEntry>,
    {
        let mut tables = self.tables.write();
        if tables.loaded {
            return Err(LibraryError::AlreadyLoaded);
        }

        let mut staging = tables.clone();
        for entry in manifest {
            staging.insert(entry)?;
        }
        staging.loaded = true;

        log::debug!(
            "loaded shader library: {} staged, {} generic, {} programs",
            staging.staged.len(),
            staging.generic.len(),
            staging.programs.len()
        );

        *tables = staging;
        Ok(())
    }

    /// Registers a source for one stage, or for any stage when `stage` is `None`.
    pub fn register_factory<F>(
        &self,
        identifier: &str,
        stage: Option<ShaderStage>,
        factory: F,
    ) -> Result<(), LibraryError>
    where
        F: SourceFactory + 'static,
    {
        self.tables
            .write()
            .insert_object(identifier.to_owned(), stage, Arc::new(factory))
    }

    pub fn register_program(
        &self,
        identifier: &str,
        objects: &[(ShaderStage, &str)],
    ) -> Result<(), LibraryError> {
        self.tables
            .write()
            .insert_program(ProgramEntry::new(identifier, objects))
    }

    /// Finds the source for `identifier` at `stage`: a stage-specific entry, else a generic one.
    pub fn lookup(
        &self,
        identifier: &str,
        stage: ShaderStage,
    ) -> Result<Arc<dyn SourceFactory>, LibraryError> {
        let tables = self.tables.read();

        tables
            .staged
            .get(&(identifier.to_owned(), stage))
            .or_else(|| tables.generic.get(identifier))
            .cloned()
            .ok_or_else(|| LibraryError::UnknownIdentifier {
                identifier: identifier.to_owned(),
                stage: Some(stage),
            })
    }

    pub fn program(&self, identifier: &str) -> Result<ProgramEntry, LibraryError> {
        self.tables
            .read()
            .programs
            .get(identifier)
            .cloned()
            .ok_or_else(|| LibraryError::UnknownIdentifier {
                identifier: identifier.to_owned(),
                stage: None,
            })
    }

    pub fn contains(&self, identifier: &str, stage: ShaderStage) -> bool {
        self.lookup(identifier, stage).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &'static str) -> impl Fn() -> ShaderSource + Send + Sync {
        move || ShaderSource::from_text(text)
    }

    #[test]
    fn stage_specific_before_generic() -> anyhow::Result<()> {
        let library = ShaderLibrary::new();
        library.register_factory("Blit", Some(ShaderStage::Vertex), source("vs"))?;
        library.register_factory("Noise", None, source("noise"))?;

        assert_eq!(
            library.lookup("Blit", ShaderStage::Vertex)?.source(),
            ShaderSource::from_text("vs")
        );
        assert!(library.lookup("Blit", ShaderStage::Fragment).is_err());
        assert_eq!(
            library.lookup("Noise", ShaderStage::Compute)?.source(),
            ShaderSource::from_text("noise")
        );
        Ok(())
    }

    #[test]
    fn same_identifier_for_different_stages() -> anyhow::Result<()> {
        let library = ShaderLibrary::new();
        library.register_factory("Blit", Some(ShaderStage::Vertex), source("vs"))?;
        library.register_factory("Blit", Some(ShaderStage::Fragment), source("fs"))?;

        assert_eq!(
            library.lookup("Blit", ShaderStage::Fragment)?.source(),
            ShaderSource::from_text("fs")
        );
        Ok(())
    }

    #[test]
    fn duplicates() -> anyhow::Result<()> {
        let library = ShaderLibrary::new();
        library.register_factory("Blit", Some(ShaderStage::Vertex), source("a"))?;

        assert_eq!(
            library.register_factory("Blit", Some(ShaderStage::Vertex), source("b")),
            Err(LibraryError::DuplicateIdentifier {
                identifier: "Blit".to_owned(),
                stage: Some(ShaderStage::Vertex),
            })
        );

        // A generic fallback for a stage-specific identifier
        assert!(library.register_factory("Blit", None, source("c")).is_err());

        library.register_factory("Noise", None, source("n"))?;
        assert!(library
            .register_factory("Noise", Some(ShaderStage::Compute), source("n"))
            .is_err());
        Ok(())
    }

    #[test]
    fn manifest_loads_once_and_atomically() {
        let library = ShaderLibrary::new();

        let result = library.load(vec![
            ManifestEntry::object("A", None, source("a")),
            ManifestEntry::object("A", Some(ShaderStage::Vertex), source("a")),
        ]);
        assert!(matches!(
            result,
            Err(LibraryError::DuplicateIdentifier { .. })
        ));
        assert!(!library.contains("A", ShaderStage::Vertex));

        library
            .load(vec![ManifestEntry::object("A", None, source("a"))])
            .unwrap();
        assert!(library.contains("A", ShaderStage::Geometry));

        assert_eq!(
            library.load(Vec::new()),
            Err(LibraryError::AlreadyLoaded)
        );
    }

    #[test]
    fn programs() -> anyhow::Result<()> {
        let library = ShaderLibrary::from_manifest(vec![ManifestEntry::program(
            "Sprite",
            &[
                (ShaderStage::Vertex, "SpriteVs"),
                (ShaderStage::Fragment, "SpriteFs"),
            ],
        )])?;

        assert_eq!(library.program("Sprite")?.objects.len(), 2);
        assert!(library.program("Missing").is_err());
        assert!(library.register_program("Sprite", &[(ShaderStage::Vertex, "X")]).is_err());
        assert_eq!(
            library.register_program("Empty", &[]),
            Err(LibraryError::EmptyProgram {
                identifier: "Empty".to_owned()
            })
        );
        Ok(())
    }
}
