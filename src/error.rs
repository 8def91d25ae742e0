//! Error taxonomy for store operations.
//!
//! Every fallible operation returns [`Result`]. Allocation, codec, and
//! file-format failures are surfaced unchanged; no operation leaves the
//! store in a state another thread can observe as partially complete.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the store, its allocators, indexes, and codecs.
#[derive(Error, Debug)]
pub enum Error {
    /// A reserved sentinel key (0 or the type minimum) was supplied to a
    /// primitive index.
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    /// A zero-byte allocation was requested, or a codec reported a size
    /// it cannot encode.
    #[error("invalid size: {0}")]
    InvalidSize(&'static str),

    /// The system allocator rejected a request.
    #[error("allocation of {0} bytes failed")]
    AllocationFailed(usize),

    /// The allocator's configured limit would be exceeded.
    #[error("out of space: requested {requested} bytes, {available} available")]
    OutOfSpace {
        /// Bytes requested by the failing call.
        requested: u64,
        /// Bytes still available under the configured limit.
        available: u64,
    },

    /// Encoding or decoding a value failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The mapped file's header has a bad magic or an unsupported version.
    #[error("incompatible file: {0}")]
    IncompatibleFile(String),

    /// The persisted index does not match the requested index variant.
    #[error("incompatible index: {0}")]
    IncompatibleIndex(String),

    /// An underlying file operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has already been closed.
    #[error("store is closed")]
    AlreadyClosed,

    /// The supplied configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}
