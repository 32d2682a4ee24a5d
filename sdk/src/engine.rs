use std::{path::Path, sync::Arc};

use dynproto_compiler::{compile_tree, utils::normalize_path, SchemaError};
use dynproto_schema::{DynamicMessage, MessageIndex, Registry};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info};

use crate::{
    error::CodecError,
    json::{message_from_json, message_to_json},
};

/// Transcodes between JSON and the protobuf wire format for every message
/// of a compiled schema tree.
///
/// The registry is built once by [`Engine::initialize`] and never changes
/// afterwards, so an `Engine` can be cloned cheaply and shared between
/// threads. Conversion failures only affect the request that caused them.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<Registry>,
}

impl Engine {
    /// Compiles every `.proto` file below `root`. Fails, without producing
    /// an engine, if any file does not compile.
    pub fn initialize(root: impl AsRef<Path>) -> Result<Engine, SchemaError> {
        let root = root.as_ref();
        let registry = compile_tree(root).map_err(|err| {
            error!(root = %root.display(), error = %err, "failed to initialize schema registry");
            err
        })?;
        info!(root = %root.display(), files = registry.len(), "engine initialized");
        Ok(Engine::from_registry(registry))
    }

    pub fn from_registry(registry: Registry) -> Engine {
        Engine {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Finds `message` in `file`. The message name is relative to the
    /// file's package unless it starts with a `.`.
    pub fn resolve(&self, file: &str, message: &str) -> Result<MessageIndex, CodecError> {
        let path = normalize_path(file);
        let descriptor = self
            .registry
            .file(&path)
            .ok_or_else(|| CodecError::UnknownSchema(format!("file \"{}\" is not loaded", path)))?;
        self.registry.find_message(descriptor, message).ok_or_else(|| {
            CodecError::UnknownSchema(format!("message \"{}\" is not declared in \"{}\"", message, path))
        })
    }

    /// Parses `json` as a message of type `message` from `file`. Every
    /// `required` field must be present.
    pub fn decode_json(&self, file: &str, message: &str, json: &[u8]) -> Result<DynamicMessage, CodecError> {
        let index = self.resolve(file, message)?;
        let document: JsonValue = serde_json::from_slice(json)?;
        let decoded = message_from_json(&self.registry, index, &document)?;
        match decoded.missing_required(&self.registry) {
            Some(field) => Err(CodecError::mismatch(&field, "required field is missing")),
            None => Ok(decoded),
        }
    }

    /// Decodes protobuf `bytes` as a message of type `message` from `file`.
    /// Every `required` field must be present.
    pub fn decode_protobuf(&self, file: &str, message: &str, bytes: &[u8]) -> Result<DynamicMessage, CodecError> {
        let index = self.resolve(file, message)?;
        let decoded = DynamicMessage::decode(&self.registry, index, bytes)?;
        match decoded.missing_required(&self.registry) {
            Some(field) => Err(CodecError::MalformedInput(format!("required field \"{}\" is missing", field))),
            None => Ok(decoded),
        }
    }

    /// Converts a JSON document into the binary encoding of `message`.
    pub fn json_to_protobuf(&self, file: &str, message: &str, json: &[u8]) -> Result<Vec<u8>, CodecError> {
        let result = self
            .decode_json(file, message, json)
            .map(|decoded| decoded.encode(&self.registry));
        match &result {
            Ok(bytes) => debug!(file, message, size = bytes.len(), "json converted to protobuf"),
            Err(err) => error!(file, message, error = %err, "json to protobuf conversion failed"),
        }
        result
    }

    /// Converts the binary encoding of `message` into a JSON document.
    pub fn protobuf_to_json(&self, file: &str, message: &str, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let result = self.decode_protobuf(file, message, bytes).and_then(|decoded| {
            let json = message_to_json(&self.registry, &decoded)?;
            Ok(serde_json::to_vec(&json)?)
        });
        match &result {
            Ok(json) => debug!(file, message, size = json.len(), "protobuf converted to json"),
            Err(err) => error!(file, message, error = %err, "protobuf to json conversion failed"),
        }
        result
    }
}
