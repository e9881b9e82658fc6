//! Borrow tracker - shared/exclusive aliasing discipline per resource key
//!
//! Every borrow is represented by a [`BorrowGuard`]. Acquiring checks the
//! key's current [`BorrowState`]; dropping the guard releases exactly that
//! borrow. Because release happens in `Drop`, it runs on every exit path:
//! normal return, `?` propagation and panic unwinding.
//!
//! ```text
//!            shared                shared
//!   Free ─────────────▶ Shared(1) ─────────▶ Shared(n+1)
//!    │  ◀───────────── (last release)
//!    │ exclusive
//!    ▼
//!  Exclusive ── release ──▶ Free
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::StoreError;
use crate::store::ResourceKey;

/// Borrow state of one resource slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorrowState {
    #[default]
    Free,
    Shared(u32),
    Exclusive,
}

/// Requested access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowKind {
    Shared,
    Exclusive,
}

impl BorrowState {
    /// State after granting `kind`, or `None` if it conflicts
    pub fn acquire(self, kind: BorrowKind) -> Option<BorrowState> {
        match (self, kind) {
            (BorrowState::Free, BorrowKind::Shared) => Some(BorrowState::Shared(1)),
            (BorrowState::Shared(n), BorrowKind::Shared) => n.checked_add(1).map(BorrowState::Shared),
            (BorrowState::Free, BorrowKind::Exclusive) => Some(BorrowState::Exclusive),
            _ => None,
        }
    }

    /// State after releasing one borrow of `kind`
    fn release(self, kind: BorrowKind) -> BorrowState {
        match (self, kind) {
            (BorrowState::Shared(1), BorrowKind::Shared) => BorrowState::Free,
            (BorrowState::Shared(n), BorrowKind::Shared) => BorrowState::Shared(n - 1),
            (BorrowState::Exclusive, BorrowKind::Exclusive) => BorrowState::Free,
            (state, kind) => {
                tracing::error!(%state, %kind, "release does not match held borrow");
                state
            }
        }
    }

    pub fn is_free(self) -> bool {
        self == BorrowState::Free
    }

    /// Number of borrows this state represents
    pub fn count(self) -> usize {
        match self {
            BorrowState::Free => 0,
            BorrowState::Shared(n) => n as usize,
            BorrowState::Exclusive => 1,
        }
    }
}

impl fmt::Display for BorrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BorrowState::Free => write!(f, "free"),
            BorrowState::Shared(n) => write!(f, "shared({})", n),
            BorrowState::Exclusive => write!(f, "exclusive"),
        }
    }
}

impl fmt::Display for BorrowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BorrowKind::Shared => write!(f, "shared"),
            BorrowKind::Exclusive => write!(f, "exclusive"),
        }
    }
}

type StateTable = Rc<RefCell<BTreeMap<ResourceKey, BorrowState>>>;

/// Per-transaction borrow bookkeeping. Keys without an entry are `Free`.
#[derive(Debug, Default)]
pub struct BorrowTracker {
    states: StateTable,
}

impl BorrowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &ResourceKey) -> BorrowState {
        self.states.borrow().get(key).copied().unwrap_or_default()
    }

    /// Total borrows currently held across all keys
    pub fn outstanding(&self) -> usize {
        self.states.borrow().values().map(|s| s.count()).sum()
    }

    /// Acquire a borrow of `kind` on `key`, or fail with `BorrowConflict`
    pub fn acquire(&self, key: &ResourceKey, kind: BorrowKind) -> Result<BorrowGuard, StoreError> {
        let mut states = self.states.borrow_mut();
        let held = states.get(key).copied().unwrap_or_default();
        let next = held.acquire(kind).ok_or_else(|| StoreError::BorrowConflict {
            address: key.address,
            tag: key.tag.clone(),
            held,
            requested: kind,
        })?;
        states.insert(key.clone(), next);
        tracing::trace!(%key, %held, %next, "borrow acquired");

        Ok(BorrowGuard {
            states: Rc::clone(&self.states),
            key: key.clone(),
            kind,
        })
    }
}

/// Scoped borrow; releases on drop
#[derive(Debug)]
pub struct BorrowGuard {
    states: StateTable,
    key: ResourceKey,
    kind: BorrowKind,
}

impl BorrowGuard {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn kind(&self) -> BorrowKind {
        self.kind
    }
}

impl Drop for BorrowGuard {
    fn drop(&mut self) {
        let mut states = self.states.borrow_mut();
        let held = states.get(&self.key).copied().unwrap_or_default();
        let next = held.release(self.kind);
        if next.is_free() {
            states.remove(&self.key);
        } else {
            states.insert(self.key.clone(), next);
        }
        tracing::trace!(key = %self.key, %next, "borrow released");
    }
}
