//! The process-wide cache of dispatch tables.
//!
//! Each key owns exactly one leaked table, so comparing table addresses is
//! the same as comparing (signature, stored type, policy) keys.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::OnceLock,
};

use parking_lot::RwLock;

use crate::{debug, policy_of, storage, table::DispatchTable, Callable, Policy, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Empty,
    Stored { value: TypeId, policy: Policy },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    signature: TypeId,
    slot: Slot,
}

impl Key {
    fn empty<S: Signature>() -> Self {
        Self {
            signature: TypeId::of::<S>(),
            slot: Slot::Empty,
        }
    }

    fn stored<S: Signature, T: 'static>() -> Self {
        Self {
            signature: TypeId::of::<S>(),
            slot: Slot::Stored {
                value: TypeId::of::<T>(),
                policy: policy_of::<T>(),
            },
        }
    }
}

type ErasedTable = &'static (dyn Any + Send + Sync);

static TABLES: OnceLock<RwLock<HashMap<Key, ErasedTable>>> = OnceLock::new();

fn tables() -> &'static RwLock<HashMap<Key, ErasedTable>> {
    TABLES.get_or_init(Default::default)
}

fn downcast<S: Signature>(table: ErasedTable) -> &'static DispatchTable<S> {
    match table.downcast_ref::<DispatchTable<S>>() {
        Some(table) => table,
        // keys carry the signature's `TypeId`
        None => unreachable!("dispatch table registered under a foreign signature"),
    }
}

fn get(key: &Key) -> Option<ErasedTable> {
    tables().read().get(key).copied()
}

/// Returns the table registered under `key`, building it with `build` if
/// there is none yet.
///
/// `build` runs under the write lock and must not call back into the registry.
fn get_or_register<S: Signature>(
    key: Key,
    build: impl FnOnce() -> DispatchTable<S>,
) -> &'static DispatchTable<S> {
    if let Some(table) = get(&key) {
        return downcast(table);
    }

    let mut tables = tables().write();
    // the entry API rechecks under the write lock, so a racing first use
    // registers the table only once.
    let table = *tables.entry(key).or_insert_with(|| {
        debug!(
            signature = std::any::type_name::<S>(),
            slot = ?key.slot,
            "registering dispatch table"
        );
        let table: ErasedTable = Box::leak(Box::new(build()));
        table
    });
    downcast(table)
}

/// The empty table of signature `S`.
pub(crate) fn empty<S: Signature>() -> &'static DispatchTable<S> {
    get_or_register(Key::empty::<S>(), DispatchTable::empty)
}

/// The table for values of type `T` stored under `policy_of::<T>()`.
pub(crate) fn stored<S, T>() -> &'static DispatchTable<S>
where
    S: Signature,
    T: Callable<S> + Clone + 'static,
{
    let key = Key::stored::<S, T>();
    if let Some(table) = get(&key) {
        return downcast(table);
    }

    // resolved before taking the write lock
    let empty = empty::<S>();
    get_or_register(key, || storage::table_for::<S, T>(empty))
}

/// The table for `T`, if one was ever built.
///
/// Never builds a table, so `T` needs no bounds: a type that was never
/// stored cannot be the one currently held.
pub(crate) fn lookup<S: Signature, T: 'static>() -> Option<&'static DispatchTable<S>> {
    get(&Key::stored::<S, T>()).map(downcast)
}
