//! Error types for the allocator.
//!
//! The taxonomy is closed: [`AllocatorError::AllocationFailed`] is the only
//! ordinary failure a caller is expected to recover from, and it never
//! mutates the arena. The remaining kinds indicate caller error or memory
//! corruption; they are surfaced as explicit values so a host program can
//! decide whether to abort, and so tests can assert on the exact kind.

use thiserror::Error;

use crate::Offset;

/// Everything that can go wrong inside the allocator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorError {
    /// The arena buffer could not be acquired during init.
    #[error("insufficient memory: could not acquire a {requested} byte arena")]
    InsufficientMemory {
        /// Number of bytes the caller asked the arena to hold.
        requested: u32,
    },

    /// No free block is large enough for the request. Recoverable; the
    /// arena is left untouched.
    #[error("allocation failed: no free block can hold {requested} bytes")]
    AllocationFailed {
        /// Payload size the caller requested.
        requested: u32,
    },

    /// A deallocation handle does not point at a payload inside the arena.
    #[error("invalid pointer: offset {offset} is not a payload address inside the arena")]
    InvalidPointer {
        /// The offending payload offset.
        offset: Offset,
    },

    /// A header that should be tagged as allocated is not, or a tag, size or
    /// link read from the arena is inconsistent. Either the block was freed
    /// twice or something scribbled over allocator metadata.
    #[error("double free or corruption at offset {offset}")]
    DoubleFreeOrCorruption {
        /// Offset of the block whose metadata failed validation.
        offset: Offset,
    },

    /// An operation ran before `init` or after `shutdown`.
    #[error("allocator is not initialized")]
    Uninitialized,
}

/// Result type alias using [`AllocatorError`].
pub type Result<T> = std::result::Result<T, AllocatorError>;
