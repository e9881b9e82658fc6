//! Canonical normalizer - deterministic form and hash of module declarations
//!
//! Two declarations that differ only in ordering or repeated entries describe
//! the same module. Normalizing removes that freedom so the result can be
//! hashed and compared.
//!
//! # Guarantees
//!
//! - **Idempotent**: `normalize(normalize(x)) == normalize(x)`
//! - **Deterministic**: same input always produces same output
//! - **Order-independent**: permuting functions or list entries does not
//!   change the hash

use sha2::{Digest, Sha256};

use crate::module::ModuleDecl;
use crate::{Error, Result};

/// Normalize a module declaration to canonical form
///
/// 1. Sort functions by name
/// 2. Sort and deduplicate `acquires`, `accesses` and `calls`
pub fn normalize_module(mut module: ModuleDecl) -> ModuleDecl {
    module.functions.sort_by(|a, b| a.name.cmp(&b.name));

    for function in &mut module.functions {
        function.acquires.sort();
        function.acquires.dedup();
        function.accesses.sort();
        function.accesses.dedup();
        function.calls.sort();
        function.calls.dedup();
    }

    module
}

/// Canonical JSON text of a normalized module
pub fn serialize_canonical(module: &ModuleDecl) -> Result<String> {
    serde_json::to_string(module)
        .map_err(|e| Error::Verification(format!("cannot serialize module {}: {}", module.module_id(), e)))
}

/// SHA-256 over the canonical form, hex-encoded
pub fn module_hash(module: &ModuleDecl) -> Result<String> {
    let canonical = serialize_canonical(&normalize_module(module.clone()))?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
