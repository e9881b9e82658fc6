//! Acquires checker - static verification of declared resource access
//!
//! The checker runs over module declarations only; it never touches the
//! store or any function body, so it can run ahead of time when modules are
//! registered. It accumulates every diagnostic rather than stopping at the
//! first problem.
//!
//! # Algorithm
//!
//! 1. **Collect** - build the call graph, record each function's direct
//!    accesses and declared `acquires`, and report malformed declarations.
//! 2. **Propagate** - a function's effective access set is its direct set
//!    joined with the effective sets of all its callees. A worklist pushes
//!    each growth of a set to the callers along reverse edges. Sets only grow
//!    and are bounded by the finite set of types mentioned, so a function is
//!    revisited at most once per type and the join reaches its fixed point on
//!    any call graph, recursive or not.
//! 3. **Judge** - every type in the effective set but not in `acquires` is an
//!    `UndeclaredAccess` error; declared types never reached are warnings.
//!
//! Per function the state moves `Unchecked → Computing → Verified | Rejected`.
//! Functions the checker has never seen are `Unchecked`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::config::{AccessPolicy, EngineConfig};
use crate::module::{FunctionId, ModuleDecl};
use crate::type_tag::{is_valid_identifier, TypeTag};
use crate::{Error, Result};

// ── Verification Result Types ─────────────────────────────

/// Outcome of checking a set of modules
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub verdicts: BTreeMap<FunctionId, FunctionVerdict>,
}

impl VerificationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no errors were found (warnings are OK)
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }

    pub fn verdict(&self, function: &FunctionId) -> Option<&FunctionVerdict> {
        self.verdicts.get(function)
    }

    /// Convert into an error carrying the first rejection, if any
    pub fn into_result(self) -> Result<VerificationResult> {
        let first = self.errors().first().map(|d| match (&d.function, &d.missing) {
            (Some(function), Some(missing)) if d.kind == DiagnosticKind::UndeclaredAccess => {
                Error::UndeclaredAccess {
                    function: function.clone(),
                    missing: missing.clone(),
                }
            }
            _ => Error::Verification(d.to_string()),
        });
        match first {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    fn add(&mut self, severity: Severity, kind: DiagnosticKind, function: Option<FunctionId>, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            kind,
            function,
            missing: None,
            message,
        });
    }

    fn add_error(&mut self, kind: DiagnosticKind, function: Option<FunctionId>, message: String) {
        self.add(Severity::Error, kind, function, message);
    }

    fn add_warning(&mut self, kind: DiagnosticKind, function: Option<FunctionId>, message: String) {
        self.add(Severity::Warning, kind, function, message);
    }
}

/// A single verification diagnostic
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub function: Option<FunctionId>,
    /// The undeclared type, for `UndeclaredAccess`
    pub missing: Option<TypeTag>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.function {
            Some(function) => write!(f, "{} [{}] {}: {}", prefix, self.kind, function, self.message),
            None => write!(f, "{} [{}]: {}", prefix, self.kind, self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    UndeclaredAccess,
    UnusedAcquire,
    UnresolvedCall,
    DuplicateFunction,
    InvalidName,
    InvalidType,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::UndeclaredAccess => "undeclared-access",
            DiagnosticKind::UnusedAcquire => "unused-acquire",
            DiagnosticKind::UnresolvedCall => "unresolved-call",
            DiagnosticKind::DuplicateFunction => "duplicate-function",
            DiagnosticKind::InvalidName => "invalid-name",
            DiagnosticKind::InvalidType => "invalid-type",
        };
        write!(f, "{}", name)
    }
}

/// Verification state of one function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    #[default]
    Unchecked,
    Computing,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FunctionVerdict {
    pub function: FunctionId,
    pub state: CheckState,
    pub declared: BTreeSet<TypeTag>,
    /// Direct accesses joined with everything reachable through calls
    pub effective: BTreeSet<TypeTag>,
    pub missing: BTreeSet<TypeTag>,
}

impl FunctionVerdict {
    pub fn is_verified(&self) -> bool {
        self.state == CheckState::Verified
    }
}

// ── Checker ───────────────────────────────────────────────

struct Node {
    declared: BTreeSet<TypeTag>,
    direct: BTreeSet<TypeTag>,
    callees: Vec<FunctionId>,
    malformed: bool,
    state: CheckState,
}

pub struct AcquiresChecker {
    policy: AccessPolicy,
}

impl AcquiresChecker {
    pub fn new(config: &EngineConfig) -> Self {
        AcquiresChecker {
            policy: config.access_policy,
        }
    }

    /// Check every function in `modules` as one call graph
    pub fn check(&self, modules: &[ModuleDecl]) -> VerificationResult {
        let mut result = VerificationResult::new();

        let mut nodes = self.collect(modules, &mut result);
        let effective = self.propagate(&mut nodes, &mut result);
        self.judge(&nodes, effective, &mut result);

        tracing::info!(
            functions = result.verdicts.len(),
            errors = result.errors().len(),
            warnings = result.warnings().len(),
            "acquires check finished"
        );
        result
    }

    // ── Phase 1: Collect ──────────────────────────────────

    fn collect(&self, modules: &[ModuleDecl], result: &mut VerificationResult) -> BTreeMap<FunctionId, Node> {
        let mut nodes = BTreeMap::new();

        for module in modules {
            if !is_valid_identifier(&module.name) {
                result.add_error(
                    DiagnosticKind::InvalidName,
                    None,
                    format!("module name '{}' is not a valid identifier", module.name),
                );
            }

            for function in &module.functions {
                let id = module.function_id(function);
                if nodes.contains_key(&id) {
                    result.add_error(
                        DiagnosticKind::DuplicateFunction,
                        Some(id.clone()),
                        format!("function '{}' is declared more than once", function.name),
                    );
                    continue;
                }

                let mut malformed = false;
                if !is_valid_identifier(&function.name) {
                    result.add_error(
                        DiagnosticKind::InvalidName,
                        Some(id.clone()),
                        format!("function name '{}' is not a valid identifier", function.name),
                    );
                    malformed = true;
                }

                for tag in &function.acquires {
                    malformed |= !check_resource_type(tag, "acquires", &id, result);
                }

                let mut direct = BTreeSet::new();
                for access in &function.accesses {
                    let context = access.kind.to_string();
                    if !check_resource_type(&access.ty, &context, &id, result) {
                        malformed = true;
                        continue;
                    }
                    if access.kind.requires_declaration(self.policy) {
                        direct.insert(access.ty.clone());
                    }
                }

                nodes.insert(
                    id,
                    Node {
                        declared: function.acquires.iter().cloned().collect(),
                        direct,
                        callees: function.calls.clone(),
                        malformed,
                        state: CheckState::Unchecked,
                    },
                );
            }
        }

        nodes
    }

    // ── Phase 2: Propagate ────────────────────────────────

    fn propagate(
        &self,
        nodes: &mut BTreeMap<FunctionId, Node>,
        result: &mut VerificationResult,
    ) -> BTreeMap<FunctionId, BTreeSet<TypeTag>> {
        // Unresolved callees make the caller malformed; drop them from the graph
        let known: BTreeSet<FunctionId> = nodes.keys().cloned().collect();
        for (id, node) in nodes.iter_mut() {
            for callee in &node.callees {
                if !known.contains(callee) {
                    result.add_error(
                        DiagnosticKind::UnresolvedCall,
                        Some(id.clone()),
                        format!("calls unknown function {}", callee),
                    );
                    node.malformed = true;
                }
            }
            node.callees.retain(|c| known.contains(c));
        }

        // Reverse edges: who must hear about a growth of this function's set
        let mut callers: BTreeMap<FunctionId, Vec<FunctionId>> = BTreeMap::new();
        for (id, node) in nodes.iter() {
            for callee in &node.callees {
                callers.entry(callee.clone()).or_default().push(id.clone());
            }
        }

        let mut effective: BTreeMap<FunctionId, BTreeSet<TypeTag>> = nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.direct.clone()))
            .collect();

        let mut worklist: VecDeque<FunctionId> = VecDeque::new();
        let mut queued: BTreeSet<FunctionId> = BTreeSet::new();
        for (id, node) in nodes.iter_mut() {
            node.state = CheckState::Computing;
            if !node.direct.is_empty() {
                worklist.push_back(id.clone());
                queued.insert(id.clone());
            }
        }

        let mut visits = 0usize;
        while let Some(id) = worklist.pop_front() {
            queued.remove(&id);
            visits += 1;
            let Some(upstream) = callers.get(&id) else {
                continue;
            };
            let grown = effective.get(&id).cloned().unwrap_or_default();
            for caller in upstream {
                let Some(set) = effective.get_mut(caller) else {
                    continue;
                };
                let before = set.len();
                set.extend(grown.iter().cloned());
                if set.len() != before && queued.insert(caller.clone()) {
                    worklist.push_back(caller.clone());
                }
            }
        }
        tracing::debug!(visits, functions = nodes.len(), "access sets converged");

        effective
    }

    // ── Phase 3: Judge ────────────────────────────────────

    fn judge(
        &self,
        nodes: &BTreeMap<FunctionId, Node>,
        mut effective: BTreeMap<FunctionId, BTreeSet<TypeTag>>,
        result: &mut VerificationResult,
    ) {
        for (id, node) in nodes {
            let effective = effective.remove(id).unwrap_or_default();
            let missing: BTreeSet<TypeTag> = effective.difference(&node.declared).cloned().collect();

            for tag in &missing {
                tracing::warn!(function = %id, missing = %tag, "undeclared access");
                result.diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    kind: DiagnosticKind::UndeclaredAccess,
                    function: Some(id.clone()),
                    missing: Some(tag.clone()),
                    message: format!("accesses {} without declaring it in acquires", tag),
                });
            }
            for tag in node.declared.difference(&effective) {
                result.add_warning(
                    DiagnosticKind::UnusedAcquire,
                    Some(id.clone()),
                    format!("declares acquires {} but never accesses it", tag),
                );
            }

            let state = if missing.is_empty() && !node.malformed {
                CheckState::Verified
            } else {
                CheckState::Rejected
            };
            tracing::trace!(function = %id, from = ?node.state, to = ?state, "verdict");
            result.verdicts.insert(
                id.clone(),
                FunctionVerdict {
                    function: id.clone(),
                    state,
                    declared: node.declared.clone(),
                    effective,
                    missing,
                },
            );
        }
    }
}

/// Report non-struct or malformed resource types; returns false if reported
fn check_resource_type(tag: &TypeTag, context: &str, function: &FunctionId, result: &mut VerificationResult) -> bool {
    if !tag.is_struct() {
        result.add_error(
            DiagnosticKind::InvalidType,
            Some(function.clone()),
            format!("{} names {}, which is not a struct type", context, tag),
        );
        return false;
    }
    if !tag.is_well_formed() {
        result.add_error(
            DiagnosticKind::InvalidType,
            Some(function.clone()),
            format!("{} names malformed type {}", context, tag),
        );
        return false;
    }
    true
}

/// Check `modules` with the given configuration
pub fn check_modules(modules: &[ModuleDecl], config: &EngineConfig) -> VerificationResult {
    AcquiresChecker::new(config).check(modules)
}

// ── Tests ─────────────────────────────────────────────────
