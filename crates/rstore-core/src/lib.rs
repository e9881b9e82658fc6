//! rstore core - resource-oriented global storage engine
//!
//! Typed resources live in a global store keyed by `(address, type)`. Every
//! access goes through the borrow tracker, every publish is authorized by a
//! signer, and every function is checked to declare the resource types it
//! touches before it may run.
//!
//! # Architecture
//!
//! ```text
//! Module Decls → Normalizer → Acquires Checker → Module Registry
//!                                                      ↓
//! Credential → Authenticator → Signer ──────────→ Executor
//!                                                      ↓
//!                                Transaction (Global Store + Borrow Tracker)
//!                                                      ↓
//!                                                  ChangeSet
//! ```
//!
//! # Guarantees
//!
//! - **Single ownership**: a resource value has one owner and is never copied
//! - **Authorized publish**: only a signer for an address can publish there
//! - **Exclusive mutation**: one exclusive borrow, or any number of shared
//!   borrows, per resource at a time
//! - **Atomic**: a failed or panicking entry function leaves no effect
//! - **Declared access**: a function runs only if its `acquires` covers every
//!   resource type it reaches, directly or through calls

pub mod address;
pub mod borrow;
pub mod checker;
pub mod config;
pub mod error;
pub mod executor;
pub mod module;
pub mod normalizer;
pub mod store;
pub mod type_tag;
pub mod value;

pub use address::{Address, Authenticator, ExecutionContext, KeyringAuthenticator, Signer};
pub use borrow::{BorrowGuard, BorrowKind, BorrowState, BorrowTracker};
pub use checker::{check_modules, AcquiresChecker, CheckState, Diagnostic, DiagnosticKind, Severity, VerificationResult};
pub use config::{AccessPolicy, EngineConfig};
pub use error::{Error, Result, StoreError};
pub use executor::{CallContext, ExecutionOutput, Executor, ModuleRegistry};
pub use module::{AccessKind, FunctionDecl, FunctionId, ModuleDecl};
pub use store::{ChangeKind, ChangeSet, ExclusiveRef, GlobalStore, ResourceKey, SharedRef, StateChange, Transaction};
pub use type_tag::{StructTag, TypeTag};
pub use value::{from_value, to_value, Resource, ResourceValue, Value, ValueError};

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Coin {
        amount: u64,
    }

    impl Resource for Coin {
        fn type_tag() -> TypeTag {
            TypeTag::struct_of(Address::ONE, "coin", "Coin")
        }
    }

    fn coin_module() -> ModuleDecl {
        let tag = Coin::type_tag();
        ModuleDecl::new(Address::ONE, "coin")
            .with_function(
                FunctionDecl::new("mint")
                    .acquires(tag.clone())
                    .access(AccessKind::MoveTo, tag.clone()),
            )
            .with_function(
                FunctionDecl::new("withdraw")
                    .acquires(tag.clone())
                    .access(AccessKind::BorrowGlobalMut, tag),
            )
    }

    #[test]
    fn test_public_api_round_trip() {
        let owner = Address::from_u64(0xb0b);
        let ctx = ExecutionContext::new(KeyringAuthenticator::new().with_key("bob", owner));
        let bob = ctx.signer_for("bob").unwrap();

        let mut executor = Executor::new(EngineConfig::default()).unwrap();
        let verified = executor.register_modules(vec![coin_module()]).unwrap();
        assert!(verified.is_valid());

        let mint: FunctionId = "0x1::coin::mint".parse().unwrap();
        let withdraw: FunctionId = "0x1::coin::withdraw".parse().unwrap();

        executor
            .execute(&bob, &mint, vec![], |ctx| ctx.publish_resource(Coin { amount: 100 }))
            .unwrap();
        let out = executor
            .execute(&bob, &withdraw, vec![Value::Unsigned(30)], |ctx| {
                let amount = ctx.arg(0).and_then(Value::as_u64).unwrap_or(0);
                ctx.update::<Coin, _>(owner, |c| {
                    c.amount -= amount;
                    c.amount
                })
            })
            .unwrap();
        assert_eq!(out.value, 70);
        assert_eq!(out.changes.changes[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_determinism_100_iterations() {
        let owner = Address::from_u64(0xb0b);
        let ctx = ExecutionContext::new(KeyringAuthenticator::new().with_key("bob", owner));
        let mint: FunctionId = "0x1::coin::mint".parse().unwrap();

        let run = || {
            let bob = ctx.signer_for("bob").unwrap();
            let mut executor = Executor::new(EngineConfig::default()).unwrap();
            executor.register_modules(vec![coin_module()]).unwrap();
            executor
                .execute(&bob, &mint, vec![], |ctx| ctx.publish_resource(Coin { amount: 7 }))
                .unwrap()
                .changes
        };

        let first = run();
        for i in 0..100 {
            assert_eq!(run(), first, "Non-determinism at iteration {}", i);
        }
    }
}
