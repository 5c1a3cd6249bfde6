use std::str::Utf8Error;

/// Faults raised by the marshalling layer.
///
/// None of these are meant to reach the guest as a stored exception: they
/// indicate that guest and host disagree about the calling convention and
/// abort the current call chain.
#[derive(thiserror::Error, Debug)]
pub enum GlueError {
    #[error("malformed UTF-8 string at {ptr:#x} (+{len}): {source}")]
    MalformedString {
        ptr: u32,
        len: u32,
        #[source]
        source: Utf8Error,
    },

    #[error("linear memory access out of bounds: {offset:#x} + {len} > {size}")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("closure invoked recursively or destroyed already")]
    ClosureUnavailable,

    #[error("guest does not export `{0}`")]
    MissingExport(String),

    #[error("guest call failed: {0}")]
    Guest(String),
}

pub type Result<T, E = GlueError> = std::result::Result<T, E>;
