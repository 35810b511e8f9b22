//! Caller-owned destinations for deferred call results.
//!
//! A [`Slot`] is the memory location a captured call eventually writes into.
//! The caller keeps the slot; every [`Call`](crate::Call) only holds a
//! type-erased [`Destination`] pointing at the same cell, so the slot stays
//! valid for as long as either side needs it.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::type_name;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::DecodeError;

/// Shared cell a deferred call resolves into.
pub struct Slot<V> {
    cell: Arc<Cell<V>>,
}

struct Cell<V> {
    value: RwLock<Option<V>>,
}

impl<V> Slot<V> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Cell {
                value: RwLock::new(None),
            }),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.cell
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Runs `f` against the resolved value, if any.
    pub fn with<R>(&self, f: impl FnOnce(&V) -> R) -> Option<R> {
        let guard = self.cell.value.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f)
    }

    pub fn take(&self) -> Option<V> {
        self.cell
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn put(&self, value: V) {
        *self.cell.value.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }
}

impl<V: Clone> Slot<V> {
    pub fn get(&self) -> Option<V> {
        self.with(V::clone)
    }
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for Slot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.cell.value.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_tuple("Slot").field(&*guard).finish()
    }
}

trait Sink: Send + Sync {
    fn store(&self, method: &str, value: Value) -> Result<(), DecodeError>;
    fn type_name(&self) -> &'static str;
}

impl<V> Sink for Slot<V>
where
    V: DeserializeOwned + Send + Sync,
{
    fn store(&self, method: &str, value: Value) -> Result<(), DecodeError> {
        let decoded = serde_json::from_value::<V>(value).map_err(|e| DecodeError::Type {
            method: method.to_string(),
            expected: type_name::<V>(),
            reason: e.to_string(),
        })?;
        self.put(decoded);
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        type_name::<V>()
    }
}

/// Type-erased handle to a caller's [`Slot`].
///
/// Resolving the same destination again replaces the previous value, so a
/// batch can be executed more than once.
#[derive(Clone)]
pub struct Destination {
    sink: Arc<dyn Sink>,
    addr: usize,
}

impl Destination {
    pub fn of<V>(slot: &Slot<V>) -> Self
    where
        V: DeserializeOwned + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(slot.clone()),
            addr: Arc::as_ptr(&slot.cell) as *const () as usize,
        }
    }

    /// Whether this destination writes into `slot`.
    pub fn is<V>(&self, slot: &Slot<V>) -> bool {
        self.addr == Arc::as_ptr(&slot.cell) as *const () as usize
    }

    pub fn same_as(&self, other: &Destination) -> bool {
        self.addr == other.addr
    }

    pub fn type_name(&self) -> &'static str {
        self.sink.type_name()
    }

    /// Converts a decoded value into the slot's type and stores it.
    pub fn store(&self, method: &str, value: Value) -> Result<(), DecodeError> {
        self.sink.store(method, value)
    }
}

impl<V> From<&Slot<V>> for Destination
where
    V: DeserializeOwned + Send + Sync + 'static,
{
    fn from(slot: &Slot<V>) -> Self {
        Destination::of(slot)
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("type", &self.type_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_slot_starts_empty() {
        let slot: Slot<u64> = Slot::new();
        assert!(!slot.is_resolved());
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn test_destination_writes_into_slot() {
        let slot: Slot<u64> = Slot::new();
        let dst = Destination::of(&slot);
        dst.store("getCount", json!(12)).unwrap();
        assert_eq!(slot.get(), Some(12));
    }

    #[test]
    fn test_destination_identity() {
        let x: Slot<bool> = Slot::new();
        let y: Slot<bool> = Slot::new();
        let dst = Destination::from(&x);
        assert!(dst.is(&x));
        assert!(dst.is(&x.clone()));
        assert!(!dst.is(&y));
        assert!(dst.same_as(&Destination::of(&x)));
    }

    #[test]
    fn test_type_mismatch_leaves_slot_untouched() {
        let slot: Slot<bool> = Slot::new();
        let dst = Destination::of(&slot);
        let err = dst.store("getDepositEnabled", json!("yes")).unwrap_err();
        assert!(matches!(err, DecodeError::Type { .. }));
        assert_eq!(err.method(), "getDepositEnabled");
        assert!(!slot.is_resolved());
    }

    #[test]
    fn test_resolving_twice_replaces_value() {
        let slot: Slot<String> = Slot::new();
        let dst = Destination::of(&slot);
        dst.store("name", json!("first")).unwrap();
        dst.store("name", json!("second")).unwrap();
        assert_eq!(slot.take().as_deref(), Some("second"));
        assert!(!slot.is_resolved());
    }
}
