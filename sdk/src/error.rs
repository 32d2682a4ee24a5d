use dynproto_schema::DecodeError;
use thiserror::Error;

/// Failure of a single conversion request. None of these affect the
/// registry; the next request starts from a clean slate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The input bytes are not valid protobuf or not valid JSON.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The file or message named in the request is not in the registry.
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    /// A JSON value does not fit the type of the field it was given for.
    #[error("Type mismatch for field {field}: {msg}")]
    TypeMismatch { field: String, msg: String },
}

impl CodecError {
    pub(crate) fn mismatch(field: &str, msg: impl Into<String>) -> CodecError {
        CodecError::TypeMismatch {
            field: field.to_string(),
            msg:   msg.into(),
        }
    }
}

impl From<DecodeError> for CodecError {
    fn from(err: DecodeError) -> CodecError {
        CodecError::MalformedInput(err.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> CodecError {
        CodecError::MalformedInput(err.to_string())
    }
}
