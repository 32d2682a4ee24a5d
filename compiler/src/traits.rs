use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use crate::error::SchemaError;

/// Where the compiler reads `.proto` sources from. Paths are import paths
/// (`/`-separated, relative to the schema root).
///
/// `Ok(None)` means the file does not exist, which lets the compiler fall
/// back to the embedded well-known types before reporting an unresolved
/// import.
pub trait SourceLoader {
    fn load(&self, path: &str) -> Result<Option<String>, SchemaError>;
}

/// Reads sources from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> DirectoryLoader {
        DirectoryLoader { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceLoader for DirectoryLoader {
    fn load(&self, path: &str) -> Result<Option<String>, SchemaError> {
        let full = self.root.join(path);
        match std::fs::read_to_string(&full) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SchemaError::Io { path: full, source }),
        }
    }
}

/// In-memory sources keyed by import path.
impl SourceLoader for HashMap<String, String> {
    fn load(&self, path: &str) -> Result<Option<String>, SchemaError> {
        Ok(self.get(path).cloned())
    }
}

impl<L: SourceLoader + ?Sized> SourceLoader for &L {
    fn load(&self, path: &str) -> Result<Option<String>, SchemaError> {
        (**self).load(path)
    }
}
