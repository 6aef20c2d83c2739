//! The object table: guest-held handles to host values.
//!
//! Slots `0..4` are permanently bound to `undefined`, `null`, `true` and
//! `false`. Other slots are handed out from a free list first and appended
//! otherwise; capacity grows in fixed batches.

use std::collections::HashSet;

use ferry_abi::{Handle, RESERVED_HANDLES};

use crate::error::{BridgeError, BridgeResult};
use crate::value::HostValue;

/// Default number of slots added whenever the table is full.
pub const DEFAULT_TABLE_BATCH: usize = 128;

#[derive(Debug)]
enum Slot {
    Occupied(HostValue),
    Free,
}

/// Maps [`Handle`]s to host values.
#[derive(Debug)]
pub struct ObjectTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    batch: usize,
    live: usize,
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::with_batch(DEFAULT_TABLE_BATCH)
    }

    /// A table growing by `batch` slots at a time (at least one).
    pub fn with_batch(batch: usize) -> Self {
        let batch = batch.max(1);
        let mut slots = Vec::with_capacity(batch.max(RESERVED_HANDLES as usize));
        slots.push(Slot::Occupied(HostValue::Undefined));
        slots.push(Slot::Occupied(HostValue::Null));
        slots.push(Slot::Occupied(HostValue::Bool(true)));
        slots.push(Slot::Occupied(HostValue::Bool(false)));
        Self {
            slots,
            free: Vec::new(),
            batch,
            live: 0,
        }
    }

    /// Store `value` and return its handle.
    ///
    /// `undefined`, `null` and booleans map to their reserved handles.
    pub fn alloc(&mut self, value: HostValue) -> Handle {
        match value {
            HostValue::Undefined => return Handle::UNDEFINED,
            HostValue::Null => return Handle::NULL,
            HostValue::Bool(b) => return Handle::from_bool(b),
            _ => {}
        }

        self.live += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Slot::Occupied(value);
            return Handle(index);
        }
        if self.slots.len() == self.slots.capacity() {
            self.slots.reserve_exact(self.batch);
        }
        self.slots.push(Slot::Occupied(value));
        Handle(self.slots.len() as u32 - 1)
    }

    /// The value behind `handle`.
    pub fn get(&self, handle: Handle) -> BridgeResult<&HostValue> {
        match self.slots.get(handle.index()) {
            Some(Slot::Occupied(value)) => Ok(value),
            Some(Slot::Free) => Err(BridgeError::HandleViolation {
                handle,
                reason: "handle was released",
            }),
            None => Err(BridgeError::HandleViolation {
                handle,
                reason: "handle was never allocated",
            }),
        }
    }

    /// Return the slot to the free list. Releasing a reserved handle does
    /// nothing.
    pub fn release(&mut self, handle: Handle) -> BridgeResult<()> {
        if handle.is_reserved() {
            return Ok(());
        }
        self.get(handle)?;
        self.slots[handle.index()] = Slot::Free;
        self.free.push(handle.0);
        self.live -= 1;
        Ok(())
    }

    /// Get and release in one step.
    pub fn take(&mut self, handle: Handle) -> BridgeResult<HostValue> {
        let value = self.get(handle)?.clone();
        self.release(handle)?;
        Ok(value)
    }

    /// A second, independently releasable handle to the same value.
    pub fn clone_ref(&mut self, handle: Handle) -> BridgeResult<Handle> {
        let value = self.get(handle)?.clone();
        Ok(self.alloc(value))
    }

    /// Take every handle in order, returning the values.
    ///
    /// All handles are checked before any is released, so a bad handle
    /// leaves the table untouched.
    pub fn drop_slice(&mut self, handles: &[Handle]) -> BridgeResult<Vec<HostValue>> {
        let mut seen = HashSet::with_capacity(handles.len());
        for handle in handles {
            if !handle.is_reserved() && !seen.insert(*handle) {
                return Err(BridgeError::HandleViolation {
                    handle: *handle,
                    reason: "handle appears twice",
                });
            }
        }
        let values = handles
            .iter()
            .map(|h| self.get(*h).cloned())
            .collect::<BridgeResult<Vec<_>>>()?;
        for handle in handles {
            self.release(*handle)?;
        }
        Ok(values)
    }

    /// Number of occupied, non-reserved slots.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Slots the table can hold before it grows again.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn batch(&self) -> usize {
        self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> HostValue {
        HostValue::from(s)
    }

    #[test]
    fn sentinels_are_prebound() {
        let table = ObjectTable::new();
        assert_eq!(table.get(Handle::UNDEFINED).unwrap(), &HostValue::Undefined);
        assert_eq!(table.get(Handle::NULL).unwrap(), &HostValue::Null);
        assert_eq!(table.get(Handle::TRUE).unwrap(), &HostValue::Bool(true));
        assert_eq!(table.get(Handle::FALSE).unwrap(), &HostValue::Bool(false));
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn sentinel_values_map_to_reserved_handles() {
        let mut table = ObjectTable::new();
        assert_eq!(table.alloc(HostValue::Null), Handle::NULL);
        assert_eq!(table.alloc(HostValue::Bool(false)), Handle::FALSE);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn releasing_sentinels_is_a_no_op() {
        let mut table = ObjectTable::new();
        for h in [Handle::UNDEFINED, Handle::NULL, Handle::TRUE, Handle::FALSE] {
            table.release(h).unwrap();
            table.release(h).unwrap();
        }
        assert_eq!(table.get(Handle::TRUE).unwrap(), &HostValue::Bool(true));
    }

    #[test]
    fn handles_stay_unique_across_alloc_release() {
        let mut table = ObjectTable::new();
        let mut live: Vec<Handle> = Vec::new();
        for round in 0..200u32 {
            let h = table.alloc(HostValue::from(round as f64));
            assert!(!h.is_reserved());
            live.push(h);
            if round % 3 == 0 {
                let victim = live.remove((round as usize * 7) % live.len());
                table.release(victim).unwrap();
            }
            let unique: HashSet<_> = live.iter().copied().collect();
            assert_eq!(unique.len(), live.len());
        }
        assert_eq!(table.live(), live.len());
    }

    #[test]
    fn free_slots_are_reused() {
        let mut table = ObjectTable::new();
        let a = table.alloc(text("a"));
        let _b = table.alloc(text("b"));
        table.release(a).unwrap();
        let c = table.alloc(text("c"));
        assert_eq!(c, a);
        assert_eq!(table.get(c).unwrap(), &text("c"));
    }

    #[test]
    fn released_handle_is_a_violation() {
        let mut table = ObjectTable::new();
        let h = table.alloc(text("gone"));
        table.release(h).unwrap();
        assert!(matches!(
            table.get(h),
            Err(BridgeError::HandleViolation { .. })
        ));
        assert!(table.release(h).is_err());
        assert!(matches!(
            table.get(Handle(10_000)),
            Err(BridgeError::HandleViolation { .. })
        ));
    }

    #[test]
    fn take_returns_value_and_frees_slot() {
        let mut table = ObjectTable::new();
        let h = table.alloc(text("x"));
        assert_eq!(table.take(h).unwrap(), text("x"));
        assert!(table.get(h).is_err());
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn clone_ref_is_independent() {
        let mut table = ObjectTable::new();
        let a = table.alloc(text("shared"));
        let b = table.clone_ref(a).unwrap();
        assert_ne!(a, b);
        table.release(a).unwrap();
        assert_eq!(table.get(b).unwrap(), &text("shared"));
    }

    #[test]
    fn drop_slice_is_all_or_nothing() {
        let mut table = ObjectTable::new();
        let a = table.alloc(text("a"));
        let b = table.alloc(text("b"));
        assert!(table.drop_slice(&[a, Handle(999)]).is_err());
        assert_eq!(table.live(), 2);

        let values = table.drop_slice(&[b, a]).unwrap();
        assert_eq!(values, vec![text("b"), text("a")]);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn drop_slice_rejects_repeated_handle() {
        let mut table = ObjectTable::new();
        let a = table.alloc(text("a"));
        let err = table.drop_slice(&[a, a]).unwrap_err();
        assert!(matches!(err, BridgeError::HandleViolation { .. }));
        assert_eq!(table.live(), 1);
        assert_eq!(table.get(a).unwrap(), &text("a"));
    }

    #[test]
    fn grows_in_batches() {
        let mut table = ObjectTable::with_batch(8);
        assert_eq!(table.capacity(), 8);
        for i in 0..4 {
            table.alloc(HostValue::from(i as f64));
        }
        assert_eq!(table.capacity(), 8);
        table.alloc(HostValue::from(4.0));
        assert!(table.capacity() >= 16);
    }
}
