//! dynproto-compiler
//!
//! This crate implements:
//!  1) A scanner that finds the `.proto` files below a schema root,
//!  2) A tokenizer + parser for the protobuf IDL (proto2 and proto3),
//!  3) A verifier for per-file rules (field numbers, names, map keys, enums),
//!  4) A two-pass builder that resolves type references across imports and
//!     publishes an immutable [`Registry`](dynproto_schema::Registry),
//!  5) Embedded sources of the `google/protobuf` well-known types,
//!  6) Error types (`SchemaError`) and the `SourceLoader` trait.

pub mod error;
pub mod types;
pub mod utils;
pub mod tokenizer;
pub mod parser;
pub mod verifier;
pub mod scanner;
pub mod well_known;
pub mod compiler;
pub mod traits;

pub use compiler::{compile_files, compile_tree, compile_with, parse_file};
pub use error::SchemaError;
pub use scanner::{scan, SourceFile};
pub use traits::{DirectoryLoader, SourceLoader};
