//! Execution engine - runs verified entry functions against the global store
//!
//! The executor owns the committed store and the registry of verified
//! modules. Modules are checked once, when registered; functions are never
//! re-checked per call.
//!
//! # Architecture
//!
//! Function bodies are resolved by the caller and handed in as closures. The
//! executor:
//!
//! 1. Refuses functions that are unknown or did not pass the acquires check
//! 2. Opens a transaction on the store
//! 3. Runs the body with a [`CallContext`] exposing the store operations,
//!    the signer and the arguments
//! 4. Commits on success and returns the [`ChangeSet`]; on error or panic the
//!    transaction is dropped and every effect is rolled back
//!
//! Nested calls go through [`CallContext::call`], which enforces the call
//! depth limit and scopes borrows to the callee's closure.

use std::collections::BTreeMap;

use crate::address::{Address, Signer};
use crate::checker::{AcquiresChecker, CheckState, FunctionVerdict, VerificationResult};
use crate::config::EngineConfig;
use crate::module::{FunctionId, ModuleDecl};
use crate::normalizer::{module_hash, normalize_module};
use crate::store::{ChangeSet, ExclusiveRef, GlobalStore, SharedRef, Transaction};
use crate::type_tag::TypeTag;
use crate::value::{Resource, ResourceValue, Value};
use crate::{Error, Result};

// ── Module Registry ───────────────────────────────────────

#[derive(Debug, Clone)]
struct RegisteredModule {
    decl: ModuleDecl,
    hash: String,
}

/// Verified modules and the cached verdict of each of their functions
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, RegisteredModule>,
    verdicts: BTreeMap<FunctionId, FunctionVerdict>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify `modules` against everything already registered and add them.
    ///
    /// Nothing is registered unless the whole batch verifies. Re-registering a
    /// module with identical contents is a no-op.
    pub fn register(&mut self, modules: Vec<ModuleDecl>, config: &EngineConfig) -> Result<VerificationResult> {
        let mut incoming = Vec::new();
        for module in modules {
            let module = normalize_module(module);
            let id = module.module_id();
            let hash = module_hash(&module)?;
            match self.modules.get(&id) {
                Some(existing) if existing.hash == hash => {
                    tracing::debug!(module = %id, "module already registered");
                }
                Some(_) => {
                    return Err(Error::Verification(format!(
                        "module {} is already registered with different contents",
                        id
                    )));
                }
                None => incoming.push(RegisteredModule { decl: module, hash }),
            }
        }
        if incoming.is_empty() {
            return Ok(VerificationResult::new());
        }

        let graph: Vec<ModuleDecl> = self
            .modules
            .values()
            .map(|m| m.decl.clone())
            .chain(incoming.iter().map(|m| m.decl.clone()))
            .collect();
        let result = AcquiresChecker::new(config).check(&graph).into_result()?;

        for module in incoming {
            tracing::info!(module = %module.decl.module_id(), hash = %module.hash, "module registered");
            self.modules.insert(module.decl.module_id(), module);
        }
        self.verdicts = result.verdicts.clone();
        Ok(result)
    }

    pub fn verdict(&self, function: &FunctionId) -> Option<&FunctionVerdict> {
        self.verdicts.get(function)
    }

    pub fn is_verified(&self, function: &FunctionId) -> bool {
        self.verdict(function).is_some_and(FunctionVerdict::is_verified)
    }

    /// `Unchecked` for functions no registration has covered
    pub fn state(&self, function: &FunctionId) -> CheckState {
        self.verdict(function).map_or(CheckState::Unchecked, |v| v.state)
    }

    /// Whether `caller`'s declaration lists `callee` among its calls
    pub fn declares_call(&self, caller: &FunctionId, callee: &FunctionId) -> bool {
        let module_id = format!("{}::{}", caller.address, caller.module);
        self.modules
            .get(&module_id)
            .and_then(|m| m.decl.function(&caller.name))
            .is_some_and(|f| f.calls.binary_search(callee).is_ok())
    }

    /// Hash of a registered module, by `<address>::<module>`
    pub fn module_hash(&self, module_id: &str) -> Option<&str> {
        self.modules.get(module_id).map(|m| m.hash.as_str())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

// ── Call Context ──────────────────────────────────────────

/// What a running function body can see: its transaction, signer and arguments
pub struct CallContext<'t, 's> {
    tx: &'t Transaction<'s>,
    signer: &'t Signer,
    registry: &'t ModuleRegistry,
    /// Entry function first, running function last
    path: Vec<FunctionId>,
    args: Vec<Value>,
    max_depth: usize,
}

impl<'t, 's> CallContext<'t, 's> {
    pub fn function(&self) -> &FunctionId {
        &self.path[self.path.len() - 1]
    }

    pub fn call_path(&self) -> &[FunctionId] {
        &self.path
    }

    pub fn signer(&self) -> &Signer {
        self.signer
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// 1 for the entry function
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Call another verified function that the running function declares
    /// in its `calls`. Borrows taken inside `body` and not returned from it
    /// are released when it returns.
    pub fn call<T>(
        &self,
        callee: &FunctionId,
        args: Vec<Value>,
        body: impl FnOnce(&CallContext<'t, 's>) -> Result<T>,
    ) -> Result<T> {
        if !self.registry.is_verified(callee) {
            return Err(Error::UnknownFunction(callee.clone()));
        }
        if !self.registry.declares_call(self.function(), callee) {
            tracing::warn!(caller = %self.function(), %callee, "call not declared");
            return Err(Error::UndeclaredCall {
                caller: self.function().clone(),
                callee: callee.clone(),
            });
        }
        if self.depth() >= self.max_depth {
            tracing::warn!(function = %callee, caller = %self.function(), "call depth limit reached");
            return Err(Error::CallDepthExceeded {
                function: callee.clone(),
                limit: self.max_depth,
            });
        }

        let span = tracing::debug_span!("call", function = %callee, depth = self.depth() + 1);
        let _enter = span.enter();
        let mut path = self.path.clone();
        path.push(callee.clone());
        let child = CallContext {
            tx: self.tx,
            signer: self.signer,
            registry: self.registry,
            path,
            args,
            max_depth: self.max_depth,
        };
        body(&child)
    }

    // ── Storage Operations ────────────────────────────────

    pub fn publish(&self, value: ResourceValue) -> Result<()> {
        Ok(self.tx.publish(self.signer, value)?)
    }

    pub fn publish_resource<R: Resource>(&self, resource: R) -> Result<()> {
        Ok(self.tx.publish_resource(self.signer, resource)?)
    }

    pub fn borrow_shared(&self, address: Address, tag: &TypeTag) -> Result<SharedRef<'t>> {
        Ok(self.tx.borrow_shared(address, tag)?)
    }

    pub fn borrow_exclusive(&self, address: Address, tag: &TypeTag) -> Result<ExclusiveRef<'t>> {
        Ok(self.tx.borrow_exclusive(address, tag)?)
    }

    pub fn remove(&self, address: Address, tag: &TypeTag) -> Result<ResourceValue> {
        Ok(self.tx.remove(address, tag)?)
    }

    pub fn exists(&self, address: Address, tag: &TypeTag) -> bool {
        self.tx.exists(address, tag)
    }

    pub fn read<R: Resource>(&self, address: Address) -> Result<R> {
        Ok(self.tx.read(address)?)
    }

    pub fn update<R: Resource, T>(&self, address: Address, f: impl FnOnce(&mut R) -> T) -> Result<T> {
        Ok(self.tx.update(address, f)?)
    }

    pub fn remove_resource<R: Resource>(&self, address: Address) -> Result<R> {
        Ok(self.tx.remove_resource(address)?)
    }
}

// ── Executor ──────────────────────────────────────────────

/// Result of a committed entry function
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput<T> {
    pub value: T,
    pub changes: ChangeSet,
}

pub struct Executor {
    store: GlobalStore,
    registry: ModuleRegistry,
    config: EngineConfig,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Executor {
            store: GlobalStore::with_config(&config),
            registry: ModuleRegistry::new(),
            config,
        })
    }

    /// Verify and register modules; see [`ModuleRegistry::register`]
    pub fn register_modules(&mut self, modules: Vec<ModuleDecl>) -> Result<VerificationResult> {
        self.registry.register(modules, &self.config)
    }

    /// Run a verified entry function as one transaction
    pub fn execute<T>(
        &mut self,
        signer: &Signer,
        function: &FunctionId,
        args: Vec<Value>,
        body: impl FnOnce(&CallContext<'_, '_>) -> Result<T>,
    ) -> Result<ExecutionOutput<T>> {
        if !self.registry.is_verified(function) {
            tracing::warn!(%function, "refusing unverified function");
            return Err(Error::UnknownFunction(function.clone()));
        }

        let span = tracing::info_span!("execute", %function, signer = %signer.address());
        let _enter = span.enter();

        let tx = self.store.begin();
        let ctx = CallContext {
            tx: &tx,
            signer,
            registry: &self.registry,
            path: vec![function.clone()],
            args,
            max_depth: self.config.max_call_depth,
        };
        let outcome = body(&ctx);
        drop(ctx);

        match outcome {
            Ok(value) => {
                let changes = tx.commit()?;
                Ok(ExecutionOutput { value, changes })
            }
            Err(e) => {
                tracing::warn!(error = %e, "entry function aborted");
                tx.abort();
                Err(e)
            }
        }
    }

    pub fn store(&self) -> &GlobalStore {
        &self.store
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

// ── Tests ─────────────────────────────────────────────────
