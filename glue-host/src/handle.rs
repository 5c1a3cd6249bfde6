use std::collections::BTreeMap;

/// Id-keyed store for host-side registrations (timeouts, animation frames,
/// event listeners).
///
/// Ids start at 1 and are never reused within one store, so a stale id handed
/// back by the guest simply misses.
pub struct HandleStore<T> {
    items: BTreeMap<u32, T>,
    next: u32,
}

impl<T> HandleStore<T> {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
            next: 1,
        }
    }

    /// Insert an item and return its id.
    pub fn insert(&mut self, item: T) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        self.items.insert(id, item);
        id
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        self.items.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.items.contains_key(&id)
    }

    /// Iterate in id order, which is registration order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.items.iter().map(|(id, item)| (*id, item))
    }

    pub fn ids(&self) -> Vec<u32> {
        self.items.keys().copied().collect()
    }

    /// Remove every item matching `pred`, returning how many went.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let before = self.items.len();
        self.items.retain(|_, item| !pred(item));
        before - self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T> Default for HandleStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
