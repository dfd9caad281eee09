//! Error kinds recognized by the tree core.
//!
//! Every fallible core operation returns a [`TreeError`] discriminant rather
//! than a dynamic error: "key not found" and "key already exists" are normal
//! outcomes of index operations, not exceptional conditions. The only variant
//! sourced from outside the core is [`TreeError::AllocFailure`].

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The page's free region cannot hold the requested slot and payload.
    ///
    /// Internal to the core: the tree driver resolves it by compacting and
    /// splitting, and never returns it from the public API.
    #[error("not enough free space on page")]
    NoSpace,

    /// The key is already present.
    #[error("key already exists")]
    Duplicate,

    /// The key is not present.
    #[error("key not found")]
    NotFound,

    /// The key falls outside the node's fence interval.
    ///
    /// This signals a broken descent and is fatal in debug builds; a
    /// `debug_assert!` fires before the variant is returned.
    #[error("key outside node fence range")]
    KeyOutOfRange,

    /// The external page allocator refused to hand out a page.
    #[error("page allocation failed")]
    AllocFailure,
}

pub type TreeResult<T> = Result<T, TreeError>;
