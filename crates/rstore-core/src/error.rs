//! Error types for the storage engine
//!
//! Runtime store failures are grouped in [`StoreError`]; they always abort the
//! surrounding transaction. [`Error`] is the crate-wide type and adds
//! verification-time and configuration failures.

use crate::address::Address;
use crate::borrow::{BorrowKind, BorrowState};
use crate::module::FunctionId;
use crate::type_tag::TypeTag;

/// Failures raised by Global Store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Publish attempted on an occupied key
    #[error("resource {tag} already exists at {address}")]
    AlreadyExists { address: Address, tag: TypeTag },

    /// Borrow or remove attempted on an absent key
    #[error("resource {tag} does not exist at {address}")]
    MissingResource { address: Address, tag: TypeTag },

    /// Aliasing rule violated within a call tree
    #[error("cannot borrow {tag} at {address} as {requested}: currently {held}")]
    BorrowConflict {
        address: Address,
        tag: TypeTag,
        held: BorrowState,
        requested: BorrowKind,
    },

    /// Signer does not control the publish target
    #[error("signer {signer} cannot publish under {target}")]
    Unauthorized { signer: Address, target: Address },

    /// Only struct types can be stored as resources
    #[error("{tag} is not a struct type and cannot be stored as a resource")]
    InvalidResourceType { tag: TypeTag },

    /// Stored fields do not decode as the requested Rust type
    #[error("resource {tag} does not match the requested type: {reason}")]
    TypeMismatch { tag: TypeTag, reason: String },
}

/// Engine error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Declared acquires do not cover the effective access set
    #[error("function {function} accesses {missing} without declaring it in acquires")]
    UndeclaredAccess { function: FunctionId, missing: TypeTag },

    /// Any other verification failure (unresolved callee, malformed names, ...)
    #[error("verification error: {0}")]
    Verification(String),

    /// Runtime call to a function the caller does not list in its `calls`
    #[error("function {caller} calls {callee}, which it does not declare")]
    UndeclaredCall { caller: FunctionId, callee: FunctionId },

    /// Function is not registered or did not pass verification
    #[error("function {0} is not registered or not verified")]
    UnknownFunction(FunctionId),

    /// Credential was refused by the authenticator
    #[error("credential does not authenticate any address")]
    Unauthenticated,

    #[error("call depth limit of {limit} exceeded calling {function}")]
    CallDepthExceeded { function: FunctionId, limit: usize },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Malformed address, type tag or identifier text
    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
