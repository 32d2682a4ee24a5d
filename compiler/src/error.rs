use std::path::PathBuf;

use thiserror::Error;

/// Everything that can stop a schema tree from compiling. All variants are
/// fatal: no registry is produced when any of them occurs.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk {path}: {source}")]
    Traversal {
        path:   PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Parse error in {file} at line {line}, column {column}: {msg}")]
    Parse {
        file:   String,
        msg:    String,
        line:   usize,
        column: usize,
    },

    #[error("{file}: import \"{import}\" was not found")]
    UnresolvedImport {
        file:   String,
        import: String,
    },

    #[error("{file}: type \"{type_name}\" of field \"{field}\" in \"{message}\" is not defined")]
    UnresolvedType {
        file:      String,
        message:   String,
        field:     String,
        type_name: String,
    },

    #[error("{file}: \"{name}\" is already defined")]
    DuplicateSymbol {
        file: String,
        name: String,
    },

    #[error("{file}: field number {number} is used twice in \"{message}\"")]
    DuplicateFieldNumber {
        file:    String,
        message: String,
        number:  i64,
    },

    #[error("{file}: field \"{field}\" in \"{message}\" has invalid number {number}: {reason}")]
    InvalidFieldNumber {
        file:    String,
        message: String,
        field:   String,
        number:  i64,
        reason:  &'static str,
    },

    #[error("{file}: {msg}")]
    Verifier {
        file: String,
        msg:  String,
    },

    #[error("{} schema errors:\n{}", .0.len(), format_all(.0))]
    Multiple(Vec<SchemaError>),
}

impl SchemaError {
    /// Collapses a list of errors: one error is returned as is, several are
    /// wrapped in [`SchemaError::Multiple`].
    pub fn from_many(mut errors: Vec<SchemaError>) -> SchemaError {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            SchemaError::Multiple(errors)
        }
    }

    /// The individual errors, flattening [`SchemaError::Multiple`].
    pub fn errors(&self) -> Vec<&SchemaError> {
        match self {
            SchemaError::Multiple(errors) => errors.iter().flat_map(|e| e.errors()).collect(),
            single => vec![single],
        }
    }
}

fn format_all(errors: &[SchemaError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}
