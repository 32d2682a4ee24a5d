//! dynproto
//!
//! Runtime support for transcoding between JSON and Protocol Buffers using
//! schemas compiled at startup instead of generated code.
//!
//! - `Engine`: compiles a schema tree once and converts payloads by
//!   `(file, message)` name
//! - `json`: the canonical protobuf JSON mapping over dynamic messages
//! - `CodecError`: what a single conversion can fail with

pub mod engine;
pub mod error;
pub mod json;
mod well_known;

pub use dynproto_compiler::SchemaError;
pub use dynproto_schema::{DynamicMessage, Registry, Value};
pub use engine::Engine;
pub use error::CodecError;

/// Parse a single `.proto` source and pretty-print its syntax tree as JSON.
pub fn parse_to_json(text: &str) -> Result<String, SchemaError> {
    let file = dynproto_compiler::parse_file("input.proto", text)?;
    serde_json::to_string_pretty(&file).map_err(|err| SchemaError::Verifier {
        file: file.name.clone(),
        msg:  err.to_string(),
    })
}

pub mod schema {
    pub use dynproto_schema::{
        DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor, MessageIndex, Registry,
        Value,
    };
}
