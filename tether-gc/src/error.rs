use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("heap exhausted, limit of {limit} live objects reached")]
    HeapExhausted { limit: usize },
    #[error("context has been torn down")]
    TornDown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("object handle refers to a collected object")]
    Dead,
    #[error("field index {index} out of bounds for object with {len} fields")]
    OutOfBounds { index: usize, len: usize },
    #[error("object is a host object, not a plain object")]
    NotPlain,
    #[error("object is a plain object, not a host object")]
    NotHost,
}
