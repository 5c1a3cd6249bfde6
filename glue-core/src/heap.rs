use crate::value::HostValue;

/// Slots `0..RESERVED_SLOTS` are a fixed reservation that is never handed out.
pub const RESERVED_SLOTS: u32 = 128;

pub const UNDEFINED: u32 = 128;
pub const NULL: u32 = 129;
pub const TRUE: u32 = 130;
pub const FALSE: u32 = 131;

/// First index `insert` can return. Everything below is permanent.
pub const FIRST_ALLOCATABLE: u32 = 132;

enum Slot<T> {
    Live(T),
    /// Link to the next free slot.
    Free(u32),
}

/// Dense slot array with a free list threaded through the unused slots.
///
/// The guest only ever sees `u32` indices into this table. Indices below
/// [`FIRST_ALLOCATABLE`] are constants: reading them always works, dropping
/// them is ignored.
pub struct Heap<T> {
    slots: Vec<Slot<T>>,
    next: u32,
    live: usize,
}

impl<T: Clone> Heap<T> {
    pub fn with_sentinels(filler: T, sentinels: [T; 4]) -> Self {
        let mut slots: Vec<Slot<T>> = (0..RESERVED_SLOTS)
            .map(|_| Slot::Live(filler.clone()))
            .collect();
        slots.extend(sentinels.into_iter().map(Slot::Live));
        let next = slots.len() as u32;
        Self {
            slots,
            next,
            live: 0,
        }
    }

    /// Store a value and return its fresh index.
    pub fn insert(&mut self, value: T) -> u32 {
        if self.next as usize == self.slots.len() {
            self.slots.push(Slot::Free(self.next + 1));
        }
        let idx = self.next;
        match std::mem::replace(&mut self.slots[idx as usize], Slot::Live(value)) {
            Slot::Free(next) => self.next = next,
            Slot::Live(_) => unreachable!("free list head {idx} points at a live slot"),
        }
        self.live += 1;
        idx
    }

    /// Non-consuming read. `None` for out-of-range or free slots.
    pub fn get(&self, idx: u32) -> Option<&T> {
        match self.slots.get(idx as usize) {
            Some(Slot::Live(value)) => Some(value),
            _ => None,
        }
    }

    pub fn is_live(&self, idx: u32) -> bool {
        self.get(idx).is_some()
    }

    /// Read the value and release the slot.
    ///
    /// Reserved indices are copied out and stay in place.
    pub fn take(&mut self, idx: u32) -> Option<T> {
        if idx < FIRST_ALLOCATABLE {
            return self.get(idx).cloned();
        }
        let slot = self.slots.get_mut(idx as usize)?;
        if let Slot::Free(_) = slot {
            log::warn!("handle {idx} released twice");
            return None;
        }
        match std::mem::replace(slot, Slot::Free(self.next)) {
            Slot::Live(value) => {
                self.next = idx;
                self.live -= 1;
                Some(value)
            }
            Slot::Free(_) => None,
        }
    }

    /// Release a slot without reading it.
    pub fn drop_ref(&mut self, idx: u32) {
        let _ = self.take(idx);
    }

    /// A second index referring to the same value.
    pub fn clone_ref(&mut self, idx: u32) -> Option<u32> {
        let value = self.get(idx)?.clone();
        Some(self.insert(value))
    }

    /// Number of live, non-reserved handles.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Total slots, reserved region included.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// The guest-visible object table.
pub type HandleTable = Heap<HostValue>;

impl Default for Heap<HostValue> {
    fn default() -> Self {
        Heap::with_sentinels(
            HostValue::Undefined,
            [
                HostValue::Undefined,
                HostValue::Null,
                HostValue::Bool(true),
                HostValue::Bool(false),
            ],
        )
    }
}

impl Heap<HostValue> {
    /// Defensive read: anything that is not a live slot reads as `undefined`.
    pub fn value(&self, idx: u32) -> HostValue {
        self.get(idx).cloned().unwrap_or_default()
    }

    pub fn take_value(&mut self, idx: u32) -> HostValue {
        self.take(idx).unwrap_or_default()
    }

    /// Handle for an optional value; `0` stands for "like none".
    pub fn insert_optional(&mut self, value: HostValue) -> u32 {
        if value.is_like_none() {
            0
        } else {
            self.insert(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sentinels_in_place() {
        let heap = HandleTable::default();
        assert!(heap.value(UNDEFINED).is_undefined());
        assert!(matches!(heap.value(NULL), HostValue::Null));
        assert_eq!(heap.value(TRUE).as_bool(), Some(true));
        assert_eq!(heap.value(FALSE).as_bool(), Some(false));
        assert_eq!(heap.capacity(), FIRST_ALLOCATABLE as usize);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_first_insert_after_sentinels() {
        let mut heap = HandleTable::default();
        assert_eq!(heap.insert(HostValue::from(1.0)), FIRST_ALLOCATABLE);
        assert_eq!(heap.insert(HostValue::from(2.0)), FIRST_ALLOCATABLE + 1);
    }

    #[test]
    fn test_handles_unique_while_live() {
        let mut heap = HandleTable::default();
        let mut live = HashSet::new();
        for i in 0..200u32 {
            let idx = heap.insert(HostValue::from(i as f64));
            assert!(live.insert(idx), "handle {idx} handed out twice");
            if i % 3 == 0 {
                let victim = *live.iter().next().unwrap();
                live.remove(&victim);
                assert!(heap.take(victim).is_some());
            }
        }
        assert_eq!(heap.live(), live.len());
    }

    #[test]
    fn test_take_then_slot_reused() {
        let mut heap = HandleTable::default();
        let a = heap.insert(HostValue::from("a"));
        let _b = heap.insert(HostValue::from("b"));
        assert_eq!(heap.take_value(a).as_str(), Some("a"));
        assert!(heap.value(a).is_undefined());
        let c = heap.insert(HostValue::from("c"));
        assert_eq!(c, a);
        assert_eq!(heap.value(c).as_str(), Some("c"));
    }

    #[test]
    fn test_dropping_reserved_region_is_noop() {
        let mut heap = HandleTable::default();
        let before = heap.insert(HostValue::from(7.0));
        heap.drop_ref(before);
        for idx in 0..FIRST_ALLOCATABLE {
            heap.drop_ref(idx);
        }
        assert_eq!(heap.value(TRUE).as_bool(), Some(true));
        assert!(matches!(heap.value(NULL), HostValue::Null));
        // Free list still hands back the slot released before the reserved drops.
        assert_eq!(heap.insert(HostValue::from(8.0)), before);
        assert_eq!(heap.insert(HostValue::from(9.0)), before + 1);
    }

    #[test]
    fn test_double_drop_does_not_corrupt_free_list() {
        let mut heap = HandleTable::default();
        let a = heap.insert(HostValue::from(1.0));
        heap.drop_ref(a);
        heap.drop_ref(a);
        let x = heap.insert(HostValue::from(2.0));
        let y = heap.insert(HostValue::from(3.0));
        assert_ne!(x, y);
        assert_eq!(heap.live(), 2);
    }

    #[test]
    fn test_clone_ref_shares_value() {
        let mut heap = HandleTable::default();
        let arr = HostValue::array(vec![]);
        let a = heap.insert(arr);
        let b = heap.clone_ref(a).unwrap();
        assert_ne!(a, b);
        assert!(heap.value(a).same_value(&heap.value(b)));
        heap.drop_ref(a);
        assert!(heap.is_live(b));
    }

    #[test]
    fn test_out_of_range_reads_undefined() {
        let heap = HandleTable::default();
        assert!(heap.value(10_000).is_undefined());
        assert!(heap.get(10_000).is_none());
    }

    #[test]
    fn test_insert_optional() {
        let mut heap = HandleTable::default();
        assert_eq!(heap.insert_optional(HostValue::Null), 0);
        assert_eq!(heap.insert_optional(HostValue::Undefined), 0);
        assert_ne!(heap.insert_optional(HostValue::from(0.0)), 0);
    }
}
