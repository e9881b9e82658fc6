//! Global store - address → (type → resource) storage and its transactions
//!
//! The committed state lives in [`GlobalStore`]. All mutation goes through a
//! [`Transaction`], obtained with [`GlobalStore::begin`]. Because `begin`
//! takes `&mut self`, at most one transaction exists at a time and nothing
//! else can observe the store while it runs.
//!
//! Inside a transaction every operation takes `&self`, so a function body can
//! hold several borrows at once. Borrows are guards tied to the transaction's
//! lifetime: the compiler rejects any attempt to commit or abort while one is
//! still alive.
//!
//! # Atomicity
//!
//! Effects are applied in place and undo entries are journaled. `commit`
//! returns the [`ChangeSet`]; dropping the transaction without committing
//! replays the journal backwards, restoring the pre-transaction state.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::address::{Address, Signer};
use crate::borrow::{BorrowGuard, BorrowKind, BorrowTracker};
use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::type_tag::TypeTag;
use crate::value::{decode_fields, Resource, ResourceValue, Value};
use crate::{Error, Result};

/// Storage index: one resource per (address, type)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ResourceKey {
    pub address: Address,
    pub tag: TypeTag,
}

impl ResourceKey {
    pub fn new(address: Address, tag: TypeTag) -> Self {
        ResourceKey { address, tag }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.tag, self.address)
    }
}

type Slot = Rc<RefCell<ResourceValue>>;

fn new_slot(value: ResourceValue) -> Slot {
    Rc::new(RefCell::new(value))
}

// ── Committed State ───────────────────────────────────────

/// In-memory committed resource state
#[derive(Debug)]
pub struct GlobalStore {
    slots: BTreeMap<ResourceKey, Slot>,
    max_resource_bytes: usize,
}

impl GlobalStore {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        GlobalStore {
            slots: BTreeMap::new(),
            max_resource_bytes: config.max_resource_bytes,
        }
    }

    /// Start a transaction. Only one can be active.
    pub fn begin(&mut self) -> Transaction<'_> {
        let slots = std::mem::take(&mut self.slots);
        tracing::debug!(resources = slots.len(), "transaction started");
        Transaction {
            store: self,
            slots: RefCell::new(slots),
            journal: RefCell::new(Vec::new()),
            journaled: RefCell::new(BTreeSet::new()),
            reads: RefCell::new(BTreeSet::new()),
            tracker: BorrowTracker::new(),
            finished: false,
        }
    }

    pub fn exists(&self, address: Address, tag: &TypeTag) -> bool {
        self.slots.contains_key(&ResourceKey::new(address, tag.clone()))
    }

    /// Copy of the committed fields of one resource
    pub fn snapshot(&self, address: Address, tag: &TypeTag) -> Option<Value> {
        self.slots
            .get(&ResourceKey::new(address, tag.clone()))
            .map(|slot| slot.borrow().fields().clone())
    }

    /// Types published under `address`, in tag order
    pub fn resources_at(&self, address: Address) -> Vec<TypeTag> {
        self.slots
            .keys()
            .filter(|k| k.address == address)
            .map(|k| k.tag.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for GlobalStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Change Tracking ───────────────────────────────────────

#[derive(Debug)]
enum JournalEntry {
    Published(ResourceKey),
    Removed(ResourceKey, Value),
    Modified(ResourceKey, Value),
}

impl JournalEntry {
    fn key(&self) -> &ResourceKey {
        match self {
            JournalEntry::Published(k) | JournalEntry::Removed(k, _) | JournalEntry::Modified(k, _) => k,
        }
    }

    /// Value the key held before this entry's effect
    fn before(&self) -> Option<Value> {
        match self {
            JournalEntry::Published(_) => None,
            JournalEntry::Removed(_, v) | JournalEntry::Modified(_, v) => Some(v.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Published,
    Modified,
    Removed,
}

/// Net effect of a committed transaction on one key
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StateChange {
    pub key: ResourceKey,
    pub kind: ChangeKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Committed effects of one transaction, for the caller to persist
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<StateChange>,
    /// Every key the transaction accessed, including reads and existence checks
    pub touched: BTreeSet<ResourceKey>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn write_set(&self) -> BTreeSet<&ResourceKey> {
        self.changes.iter().map(|c| &c.key).collect()
    }

    /// Whether two transactions could not have run in parallel: one wrote a
    /// key the other touched.
    pub fn conflicts_with(&self, other: &ChangeSet) -> bool {
        self.write_set().iter().any(|k| other.touched.contains(*k))
            || other.write_set().iter().any(|k| self.touched.contains(*k))
    }

    pub fn change(&self, key: &ResourceKey) -> Option<&StateChange> {
        self.changes.iter().find(|c| &c.key == key)
    }
}

// ── Transaction ───────────────────────────────────────────

/// A call tree's view of the store. Rolls back on drop unless committed.
pub struct Transaction<'s> {
    store: &'s mut GlobalStore,
    slots: RefCell<BTreeMap<ResourceKey, Slot>>,
    journal: RefCell<Vec<JournalEntry>>,
    /// Keys whose pre-image was already captured by an exclusive borrow
    journaled: RefCell<BTreeSet<ResourceKey>>,
    reads: RefCell<BTreeSet<ResourceKey>>,
    tracker: BorrowTracker,
    finished: bool,
}

impl Transaction<'_> {
    fn touch(&self, key: &ResourceKey) {
        self.reads.borrow_mut().insert(key.clone());
    }

    fn slot(&self, key: &ResourceKey) -> std::result::Result<Slot, StoreError> {
        self.slots
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::MissingResource {
                address: key.address,
                tag: key.tag.clone(),
            })
    }

    /// Publish under the signer's own address
    pub fn publish(&self, signer: &Signer, value: ResourceValue) -> std::result::Result<(), StoreError> {
        self.publish_to(signer, signer.address(), value)
    }

    /// Publish under `address`, which must be the signer's address
    pub fn publish_to(
        &self,
        signer: &Signer,
        address: Address,
        value: ResourceValue,
    ) -> std::result::Result<(), StoreError> {
        if signer.address() != address {
            tracing::warn!(signer = %signer.address(), target = %address, "unauthorized publish");
            return Err(StoreError::Unauthorized {
                signer: signer.address(),
                target: address,
            });
        }
        if !value.tag().is_struct() {
            return Err(StoreError::InvalidResourceType {
                tag: value.tag().clone(),
            });
        }

        let key = ResourceKey::new(address, value.tag().clone());
        self.touch(&key);
        let mut slots = self.slots.borrow_mut();
        if slots.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                address,
                tag: key.tag,
            });
        }
        tracing::debug!(%key, "publish");
        slots.insert(key.clone(), new_slot(value));
        self.journal.borrow_mut().push(JournalEntry::Published(key));
        Ok(())
    }

    /// Read-only borrow; many may coexist
    pub fn borrow_shared(
        &self,
        address: Address,
        tag: &TypeTag,
    ) -> std::result::Result<SharedRef<'_>, StoreError> {
        let key = ResourceKey::new(address, tag.clone());
        self.touch(&key);
        let slot = self.slot(&key)?;
        let guard = self.tracker.acquire(&key, BorrowKind::Shared)?;
        tracing::debug!(%key, "borrow_shared");
        Ok(SharedRef {
            slot,
            guard,
            _tx: PhantomData,
        })
    }

    /// Mutable borrow; requires the key to be free
    pub fn borrow_exclusive(
        &self,
        address: Address,
        tag: &TypeTag,
    ) -> std::result::Result<ExclusiveRef<'_>, StoreError> {
        let key = ResourceKey::new(address, tag.clone());
        self.touch(&key);
        let slot = self.slot(&key)?;
        let guard = self.tracker.acquire(&key, BorrowKind::Exclusive)?;

        if self.journaled.borrow_mut().insert(key.clone()) {
            let before = slot.borrow().fields().clone();
            self.journal
                .borrow_mut()
                .push(JournalEntry::Modified(key.clone(), before));
        }
        tracing::debug!(%key, "borrow_exclusive");
        Ok(ExclusiveRef {
            slot,
            guard,
            _tx: PhantomData,
        })
    }

    /// Delete a resource and hand its value back; requires the key to be free
    pub fn remove(&self, address: Address, tag: &TypeTag) -> std::result::Result<ResourceValue, StoreError> {
        let key = ResourceKey::new(address, tag.clone());
        self.touch(&key);
        let held = self.tracker.state(&key);
        let mut slots = self.slots.borrow_mut();
        if !slots.contains_key(&key) {
            return Err(StoreError::MissingResource {
                address,
                tag: key.tag,
            });
        }
        let conflict = StoreError::BorrowConflict {
            address,
            tag: key.tag.clone(),
            held,
            requested: BorrowKind::Exclusive,
        };
        if !held.is_free() {
            return Err(conflict);
        }
        let Some(slot) = slots.remove(&key) else {
            return Err(conflict);
        };
        match Rc::try_unwrap(slot) {
            Ok(cell) => {
                let value = cell.into_inner();
                tracing::debug!(%key, "remove");
                self.journal
                    .borrow_mut()
                    .push(JournalEntry::Removed(key, value.fields().clone()));
                Ok(value)
            }
            Err(shared) => {
                // A guard still holds the slot; leave it in place
                slots.insert(key, shared);
                Err(conflict)
            }
        }
    }

    /// Pure existence query; never fails, never borrows
    pub fn exists(&self, address: Address, tag: &TypeTag) -> bool {
        let key = ResourceKey::new(address, tag.clone());
        self.touch(&key);
        self.slots.borrow().contains_key(&key)
    }

    // ── Typed Conveniences ────────────────────────────────

    pub fn publish_resource<R: Resource>(
        &self,
        signer: &Signer,
        resource: R,
    ) -> std::result::Result<(), StoreError> {
        self.publish(signer, resource.into_resource()?)
    }

    /// Decode a copy of the resource under a shared borrow
    pub fn read<R: Resource>(&self, address: Address) -> std::result::Result<R, StoreError> {
        self.borrow_shared(address, &R::type_tag())?.read()
    }

    /// Apply `f` to the resource under an exclusive borrow
    pub fn update<R: Resource, T>(
        &self,
        address: Address,
        f: impl FnOnce(&mut R) -> T,
    ) -> std::result::Result<T, StoreError> {
        self.borrow_exclusive(address, &R::type_tag())?.update(f)
    }

    pub fn remove_resource<R: Resource>(&self, address: Address) -> std::result::Result<R, StoreError> {
        self.remove(address, &R::type_tag())?.unpack()
    }

    pub fn exists_resource<R: Resource>(&self, address: Address) -> bool {
        self.exists(address, &R::type_tag())
    }

    pub fn tracker(&self) -> &BorrowTracker {
        &self.tracker
    }

    // ── Completion ────────────────────────────────────────

    /// Make all effects permanent and return them
    pub fn commit(mut self) -> Result<ChangeSet> {
        let changes = self.compute_changes();

        let limit = self.store.max_resource_bytes;
        for change in &changes {
            if let Some(after) = &change.after {
                let size = after.size_bytes();
                if size > limit {
                    tracing::warn!(key = %change.key, size, limit, "resource too large, aborting");
                    return Err(Error::LimitExceeded(format!(
                        "resource {} is {} bytes, limit is {} bytes",
                        change.key, size, limit
                    )));
                }
            }
        }

        self.finished = true;
        let touched = std::mem::take(self.reads.get_mut());
        tracing::info!(changes = changes.len(), touched = touched.len(), "transaction committed");
        Ok(ChangeSet { changes, touched })
    }

    /// Discard all effects
    pub fn abort(self) {
        drop(self);
    }

    fn compute_changes(&self) -> Vec<StateChange> {
        let mut originals: BTreeMap<ResourceKey, Option<Value>> = BTreeMap::new();
        for entry in self.journal.borrow().iter() {
            originals
                .entry(entry.key().clone())
                .or_insert_with(|| entry.before());
        }

        let slots = self.slots.borrow();
        originals
            .into_iter()
            .filter_map(|(key, before)| {
                let after = slots.get(&key).map(|s| s.borrow().fields().clone());
                let kind = match (&before, &after) {
                    (None, Some(_)) => ChangeKind::Published,
                    (Some(_), None) => ChangeKind::Removed,
                    (Some(b), Some(a)) if a != b => ChangeKind::Modified,
                    _ => return None,
                };
                Some(StateChange {
                    key,
                    kind,
                    before,
                    after,
                })
            })
            .collect()
    }

    fn rollback(&mut self) {
        let journal = std::mem::take(self.journal.get_mut());
        let slots = self.slots.get_mut();
        tracing::warn!(entries = journal.len(), "transaction aborted, rolling back");
        for entry in journal.into_iter().rev() {
            match entry {
                JournalEntry::Published(key) => {
                    slots.remove(&key);
                }
                JournalEntry::Removed(key, fields) => {
                    let value = ResourceValue::new(key.tag.clone(), fields);
                    slots.insert(key, new_slot(value));
                }
                JournalEntry::Modified(key, fields) => {
                    if let Some(slot) = slots.get(&key) {
                        *slot.borrow_mut().fields_mut() = fields;
                    }
                }
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback();
        }
        self.store.slots = std::mem::take(self.slots.get_mut());
    }
}

// ── Borrow Handles ────────────────────────────────────────

/// Read-only reference to a stored resource
pub struct SharedRef<'t> {
    slot: Slot,
    guard: BorrowGuard,
    _tx: PhantomData<&'t ()>,
}

impl SharedRef<'_> {
    pub fn key(&self) -> &ResourceKey {
        self.guard.key()
    }

    pub fn value(&self) -> Ref<'_, ResourceValue> {
        self.slot.borrow()
    }

    pub fn fields(&self) -> Ref<'_, Value> {
        Ref::map(self.slot.borrow(), ResourceValue::fields)
    }

    pub fn read<R: Resource>(&self) -> std::result::Result<R, StoreError> {
        let value = self.slot.borrow();
        decode_fields(value.tag(), value.fields())
    }
}

impl fmt::Debug for SharedRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedRef({})", self.key())
    }
}

/// Mutable reference to a stored resource
pub struct ExclusiveRef<'t> {
    slot: Slot,
    guard: BorrowGuard,
    _tx: PhantomData<&'t ()>,
}

impl ExclusiveRef<'_> {
    pub fn key(&self) -> &ResourceKey {
        self.guard.key()
    }

    pub fn value(&self) -> Ref<'_, ResourceValue> {
        self.slot.borrow()
    }

    pub fn fields(&self) -> Ref<'_, Value> {
        Ref::map(self.slot.borrow(), ResourceValue::fields)
    }

    /// Mutate the fields in place
    pub fn fields_mut(&mut self) -> RefMut<'_, Value> {
        RefMut::map(self.slot.borrow_mut(), ResourceValue::fields_mut)
    }

    pub fn read<R: Resource>(&self) -> std::result::Result<R, StoreError> {
        let value = self.slot.borrow();
        decode_fields(value.tag(), value.fields())
    }

    /// Decode, apply `f`, and write the result back
    pub fn update<R: Resource, T>(&mut self, f: impl FnOnce(&mut R) -> T) -> std::result::Result<T, StoreError> {
        let mut resource: R = self.read()?;
        let out = f(&mut resource);
        let packed = ResourceValue::pack(&resource)?;
        *self.fields_mut() = packed.into_fields();
        Ok(out)
    }
}

impl fmt::Debug for ExclusiveRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExclusiveRef({})", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{ExecutionContext, KeyringAuthenticator};
    use crate::borrow::BorrowState;
    use crate::value::to_value;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Counter {
        value: u64,
    }

    impl Resource for Counter {
        fn type_tag() -> TypeTag {
            TypeTag::struct_of(Address::ONE, "counter", "Counter")
        }
    }

    const ALICE: Address = Address::from_u64(0xa11ce);
    const BOB: Address = Address::from_u64(0xb0b);

    fn signer(address: Address) -> Signer {
        ExecutionContext::new(KeyringAuthenticator::new().with_key("key", address))
            .signer_for("key")
            .unwrap()
    }

    fn counter(value: u64) -> ResourceValue {
        Counter { value }.into_resource().unwrap()
    }

    fn tag() -> TypeTag {
        Counter::type_tag()
    }

    // ── Publish ───────────────────────────────────────────

    #[test]
    fn test_publish_then_exists_and_read() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish(&alice, counter(5)).unwrap();
        assert!(tx.exists(ALICE, &tag()));
        let r = tx.borrow_shared(ALICE, &tag()).unwrap();
        assert_eq!(r.read::<Counter>().unwrap(), Counter { value: 5 });
        drop(r);
        tx.commit().unwrap();
        assert!(store.exists(ALICE, &tag()));
    }

    #[test]
    fn test_publish_twice_is_already_exists_without_overwrite() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish(&alice, counter(1)).unwrap();
        let err = tx.publish(&alice, counter(2)).unwrap_err();
        assert_eq!(
            err,
            StoreError::AlreadyExists {
                address: ALICE,
                tag: tag()
            }
        );
        assert_eq!(tx.read::<Counter>(ALICE).unwrap(), Counter { value: 1 });
    }

    #[test]
    fn test_publish_to_other_address_is_unauthorized() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        let err = tx.publish_to(&alice, BOB, counter(1)).unwrap_err();
        assert_eq!(
            err,
            StoreError::Unauthorized {
                signer: ALICE,
                target: BOB
            }
        );
        assert!(!tx.exists(BOB, &tag()));
    }

    #[test]
    fn test_publish_non_struct_is_rejected() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        let err = tx
            .publish(&alice, ResourceValue::new(TypeTag::U64, Value::Unsigned(1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidResourceType { .. }));
    }

    // ── Borrows ───────────────────────────────────────────

    #[test]
    fn test_missing_resource_errors() {
        let mut store = GlobalStore::new();
        let tx = store.begin();
        let missing = StoreError::MissingResource {
            address: ALICE,
            tag: tag(),
        };
        assert_eq!(tx.borrow_shared(ALICE, &tag()).unwrap_err(), missing);
        assert_eq!(tx.borrow_exclusive(ALICE, &tag()).unwrap_err(), missing);
        assert_eq!(tx.remove(ALICE, &tag()).unwrap_err(), missing);
        assert!(!tx.exists(ALICE, &tag()));
    }

    #[test]
    fn test_exclusive_mutation_is_visible_to_later_shared_borrow() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish(&alice, counter(0)).unwrap();
        {
            let mut m = tx.borrow_exclusive(ALICE, &tag()).unwrap();
            *m.fields_mut().field_mut("value").unwrap() = Value::Unsigned(1);
        }
        let r = tx.borrow_shared(ALICE, &tag()).unwrap();
        assert_eq!(r.fields().field("value"), Some(&Value::Unsigned(1)));
    }

    #[test]
    fn test_two_shared_borrows_block_exclusive() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish(&alice, counter(3)).unwrap();

        let a = tx.borrow_shared(ALICE, &tag()).unwrap();
        let b = tx.borrow_shared(ALICE, &tag()).unwrap();
        assert_eq!(tx.tracker().state(a.key()), BorrowState::Shared(2));
        assert_eq!(a.read::<Counter>().unwrap(), b.read::<Counter>().unwrap());

        let err = tx.borrow_exclusive(ALICE, &tag()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::BorrowConflict {
                held: BorrowState::Shared(2),
                requested: BorrowKind::Exclusive,
                ..
            }
        ));
        drop(a);
        assert!(tx.borrow_exclusive(ALICE, &tag()).is_err());
        drop(b);
        assert!(tx.borrow_exclusive(ALICE, &tag()).is_ok());
    }

    #[test]
    fn test_shared_blocked_by_exclusive() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish(&alice, counter(3)).unwrap();
        let _m = tx.borrow_exclusive(ALICE, &tag()).unwrap();
        assert!(matches!(
            tx.borrow_shared(ALICE, &tag()),
            Err(StoreError::BorrowConflict { held: BorrowState::Exclusive, .. })
        ));
        // exists never touches borrow state
        assert!(tx.exists(ALICE, &tag()));
    }

    #[test]
    fn test_exists_leaves_borrow_state_untouched() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish(&alice, counter(3)).unwrap();
        let key = ResourceKey::new(ALICE, tag());

        let r = tx.borrow_shared(ALICE, &tag()).unwrap();
        assert!(tx.exists(ALICE, &tag()));
        assert!(tx.exists_resource::<Counter>(ALICE));
        assert_eq!(tx.tracker().state(&key), BorrowState::Shared(1));
        drop(r);

        let m = tx.borrow_exclusive(ALICE, &tag()).unwrap();
        assert!(tx.exists(ALICE, &tag()));
        assert_eq!(tx.tracker().state(&key), BorrowState::Exclusive);
        drop(m);

        assert!(tx.exists(ALICE, &tag()));
        assert!(!tx.exists(BOB, &tag()));
        assert_eq!(tx.tracker().state(&key), BorrowState::Free);
        assert_eq!(tx.tracker().state(&ResourceKey::new(BOB, tag())), BorrowState::Free);
        assert!(tx.borrow_exclusive(ALICE, &tag()).is_ok());
    }

    #[test]
    fn test_remove_while_borrowed_is_conflict() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish(&alice, counter(3)).unwrap();
        let r = tx.borrow_shared(ALICE, &tag()).unwrap();
        assert!(matches!(
            tx.remove(ALICE, &tag()),
            Err(StoreError::BorrowConflict { .. })
        ));
        assert!(tx.exists(ALICE, &tag()));
        drop(r);
        assert!(tx.remove(ALICE, &tag()).is_ok());
    }

    // ── Remove ────────────────────────────────────────────

    #[test]
    fn test_remove_returns_value_then_missing() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish(&alice, counter(9)).unwrap();
        let value = tx.remove(ALICE, &tag()).unwrap();
        assert_eq!(value.unpack::<Counter>().unwrap(), Counter { value: 9 });
        assert!(!tx.exists(ALICE, &tag()));
        assert!(matches!(
            tx.remove(ALICE, &tag()),
            Err(StoreError::MissingResource { .. })
        ));
    }

    #[test]
    fn test_removed_value_can_be_republished() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish(&alice, counter(9)).unwrap();
        let value = tx.remove(ALICE, &tag()).unwrap();
        tx.publish(&alice, value).unwrap();
        assert_eq!(tx.read::<Counter>(ALICE).unwrap(), Counter { value: 9 });
    }

    // ── Transactions ──────────────────────────────────────

    #[test]
    fn test_end_to_end_counter() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);

        let tx = store.begin();
        tx.publish_resource(&alice, Counter { value: 0 }).unwrap();
        tx.commit().unwrap();

        let tx = store.begin();
        tx.update::<Counter, _>(ALICE, |c| c.value += 1).unwrap();
        assert_eq!(tx.read::<Counter>(ALICE).unwrap(), Counter { value: 1 });
        let changes = tx.commit().unwrap();

        let key = ResourceKey::new(ALICE, tag());
        let change = changes.change(&key).unwrap();
        assert_eq!(change.kind, ChangeKind::Modified);
        assert_eq!(
            store.snapshot(ALICE, &tag()),
            Some(to_value(&serde_json::json!({"value": 1})).unwrap())
        );
    }

    #[test]
    fn test_drop_without_commit_rolls_back_everything() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let bob = signer(BOB);

        let tx = store.begin();
        tx.publish_resource(&alice, Counter { value: 10 }).unwrap();
        tx.commit().unwrap();

        {
            let tx = store.begin();
            tx.update::<Counter, _>(ALICE, |c| c.value = 99).unwrap();
            tx.publish_resource(&bob, Counter { value: 1 }).unwrap();
            let removed = tx.remove_resource::<Counter>(ALICE).unwrap();
            assert_eq!(removed.value, 99);
            tx.abort();
        }

        assert_eq!(store.len(), 1);
        assert!(!store.exists(BOB, &tag()));
        assert_eq!(
            store.snapshot(ALICE, &tag()),
            Some(to_value(&serde_json::json!({"value": 10})).unwrap())
        );
    }

    #[test]
    fn test_rollback_after_remove_and_republish() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish_resource(&alice, Counter { value: 1 }).unwrap();
        tx.commit().unwrap();

        {
            let tx = store.begin();
            tx.update::<Counter, _>(ALICE, |c| c.value = 2).unwrap();
            let old = tx.remove(ALICE, &tag()).unwrap();
            tx.publish(&alice, old).unwrap();
            tx.update::<Counter, _>(ALICE, |c| c.value = 3).unwrap();
        }

        assert_eq!(
            store.snapshot(ALICE, &tag()),
            Some(to_value(&serde_json::json!({"value": 1})).unwrap())
        );
    }

    #[test]
    fn test_commit_reports_net_changes() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let bob = signer(BOB);
        let tx = store.begin();
        tx.publish_resource(&alice, Counter { value: 1 }).unwrap();
        tx.commit().unwrap();

        let tx = store.begin();
        tx.publish_resource(&bob, Counter { value: 2 }).unwrap();
        tx.remove(ALICE, &tag()).unwrap();
        // Borrowed but unchanged: not reported
        tx.publish_resource(&alice, Counter { value: 1 }).unwrap();
        drop(tx.borrow_exclusive(ALICE, &tag()).unwrap());
        let changes = tx.commit().unwrap();

        assert_eq!(changes.changes.len(), 1);
        assert_eq!(changes.changes[0].kind, ChangeKind::Published);
        assert_eq!(changes.changes[0].key, ResourceKey::new(BOB, tag()));
        assert!(changes.touched.contains(&ResourceKey::new(ALICE, tag())));
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Ledger {
        owner: Address,
        total: u128,
    }

    impl Resource for Ledger {
        fn type_tag() -> TypeTag {
            TypeTag::struct_of(Address::ONE, "ledger", "Ledger")
        }
    }

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct Rate {
        factor: f64,
    }

    impl Resource for Rate {
        fn type_tag() -> TypeTag {
            TypeTag::struct_of(Address::ONE, "rate", "Rate")
        }
    }

    #[test]
    fn test_rewriting_identical_fields_is_not_a_change() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let ledger = Ledger {
            owner: BOB,
            total: u128::MAX,
        };
        let tx = store.begin();
        tx.publish_resource(&alice, ledger.clone()).unwrap();
        tx.commit().unwrap();

        let tx = store.begin();
        tx.update::<Ledger, _>(ALICE, |l| l.total = u128::MAX).unwrap();
        assert_eq!(tx.read::<Ledger>(ALICE).unwrap(), ledger);
        let changes = tx.commit().unwrap();
        assert!(changes.is_empty());
        assert!(changes.touched.contains(&ResourceKey::new(ALICE, Ledger::type_tag())));
    }

    #[test]
    fn test_float_fields_cannot_be_published() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        let err = tx.publish_resource(&alice, Rate { factor: f64::NAN }).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        assert!(!tx.exists_resource::<Rate>(ALICE));
    }

    #[test]
    fn test_commit_rejects_oversized_resource() {
        let config = EngineConfig {
            max_resource_bytes: 64,
            ..EngineConfig::default()
        };
        let mut store = GlobalStore::with_config(&config);
        let alice = signer(ALICE);
        let tx = store.begin();
        let big = ResourceValue::new(
            tag(),
            to_value(&serde_json::json!({"value": 1, "pad": "x".repeat(128)})).unwrap(),
        );
        tx.publish(&alice, big).unwrap();
        assert!(matches!(tx.commit(), Err(Error::LimitExceeded(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_panic_inside_transaction_rolls_back() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let tx = store.begin();
            tx.publish_resource(&alice, Counter { value: 1 }).unwrap();
            let _m = tx.borrow_exclusive(ALICE, &tag()).unwrap();
            panic!("body aborted");
        }));
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_change_sets_conflict_on_shared_keys() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let bob = signer(BOB);

        let tx = store.begin();
        tx.publish_resource(&alice, Counter { value: 1 }).unwrap();
        let first = tx.commit().unwrap();

        let tx = store.begin();
        tx.publish_resource(&bob, Counter { value: 1 }).unwrap();
        let disjoint = tx.commit().unwrap();

        let tx = store.begin();
        assert!(tx.exists(ALICE, &tag()));
        let reader = tx.commit().unwrap();

        assert!(!first.conflicts_with(&disjoint));
        assert!(first.conflicts_with(&reader));
        assert!(reader.conflicts_with(&first));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_resources_at_lists_types() {
        let mut store = GlobalStore::new();
        let alice = signer(ALICE);
        let tx = store.begin();
        tx.publish_resource(&alice, Counter { value: 1 }).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.resources_at(ALICE), vec![tag()]);
        assert!(store.resources_at(BOB).is_empty());
    }
}
