use thiserror::Error;

use crate::bb::WireType;

/// Failure while reading a Protocol Buffers wire stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at byte {0}")]
    Truncated(usize),

    #[error("varint at byte {0} is longer than 10 bytes")]
    VarintOverflow(usize),

    #[error("invalid wire type {0}")]
    InvalidWireType(u8),

    #[error("tag value {0} is out of range")]
    InvalidTag(u64),

    #[error("field number 0 is not allowed")]
    ZeroFieldNumber,

    #[error("unexpected end-group tag for field {0}")]
    UnexpectedEndGroup(u32),

    #[error("message nesting exceeds the recursion limit")]
    RecursionLimit,

    #[error("field \"{field}\" was sent as {actual:?} but is declared as {expected:?}")]
    WireTypeMismatch {
        field:    String,
        expected: WireType,
        actual:   WireType,
    },

    #[error("field \"{0}\" contains invalid UTF-8")]
    InvalidUtf8(String),
}

/// Failure while assembling a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("file \"{0}\" is registered twice")]
    DuplicateFile(String),

    #[error("symbol \"{0}\" is defined twice")]
    DuplicateSymbol(String),
}
