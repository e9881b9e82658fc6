//! Module declarations - the static shape the acquires checker works on
//!
//! A module lists its functions. For each function the declaration records
//! which resource types it claims to access (`acquires`), which storage
//! operations its body performs directly (`accesses`) and which functions it
//! calls (`calls`). Bodies themselves are never inspected here.

use std::fmt;
use std::str::FromStr;

use crate::address::Address;
use crate::config::AccessPolicy;
use crate::type_tag::{is_valid_identifier, TypeTag};
use crate::{Error, Result};

/// Fully qualified function name, `<address>::<module>::<function>`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionId {
    pub address: Address,
    pub module: String,
    pub name: String,
}

impl FunctionId {
    pub fn new(address: Address, module: impl Into<String>, name: impl Into<String>) -> Self {
        FunctionId {
            address,
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.address, self.module, self.name)
    }
}

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionId({})", self)
    }
}

impl FromStr for FunctionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split("::").map(str::trim).collect();
        match parts.as_slice() {
            [address, module, name] if is_valid_identifier(module) && is_valid_identifier(name) => {
                Ok(FunctionId::new(Address::from_hex(address)?, *module, *name))
            }
            _ => Err(Error::Parse(format!(
                "function id '{}' must have the form <address>::<module>::<name>",
                s
            ))),
        }
    }
}

impl TryFrom<String> for FunctionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FunctionId> for String {
    fn from(id: FunctionId) -> Self {
        id.to_string()
    }
}

/// Storage operation kinds, named after their Move builtins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    MoveTo,
    MoveFrom,
    BorrowGlobal,
    BorrowGlobalMut,
    Exists,
}

impl AccessKind {
    /// Whether this operation must be covered by `acquires` under `policy`
    pub fn requires_declaration(self, policy: AccessPolicy) -> bool {
        match policy {
            AccessPolicy::Strict => true,
            AccessPolicy::MoveCompatible => matches!(
                self,
                AccessKind::MoveFrom | AccessKind::BorrowGlobal | AccessKind::BorrowGlobalMut
            ),
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessKind::MoveTo => "move_to",
            AccessKind::MoveFrom => "move_from",
            AccessKind::BorrowGlobal => "borrow_global",
            AccessKind::BorrowGlobalMut => "borrow_global_mut",
            AccessKind::Exists => "exists",
        };
        write!(f, "{}", name)
    }
}

/// One direct storage operation in a function body
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Access {
    pub kind: AccessKind,
    #[serde(rename = "type")]
    pub ty: TypeTag,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub acquires: Vec<TypeTag>,
    #[serde(default)]
    pub accesses: Vec<Access>,
    #[serde(default)]
    pub calls: Vec<FunctionId>,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>) -> Self {
        FunctionDecl {
            name: name.into(),
            acquires: Vec::new(),
            accesses: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn acquires(mut self, tag: TypeTag) -> Self {
        self.acquires.push(tag);
        self
    }

    pub fn access(mut self, kind: AccessKind, ty: TypeTag) -> Self {
        self.accesses.push(Access { kind, ty });
        self
    }

    pub fn calls(mut self, callee: FunctionId) -> Self {
        self.calls.push(callee);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDecl {
    pub address: Address,
    pub name: String,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
}

impl ModuleDecl {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        ModuleDecl {
            address,
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_function(mut self, function: FunctionDecl) -> Self {
        self.functions.push(function);
        self
    }

    /// `<address>::<module>`
    pub fn module_id(&self) -> String {
        format!("{}::{}", self.address, self.name)
    }

    pub fn function_id(&self, function: &FunctionDecl) -> FunctionId {
        FunctionId::new(self.address, self.name.clone(), function.name.clone())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }
}
