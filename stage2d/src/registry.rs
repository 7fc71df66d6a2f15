//! Slot storage for listeners that are called with `&mut Scene`.
//!
//! A listener is taken out of its slot for the duration of a call and put
//! back afterwards, so a listener may register or unregister others (itself
//! included) while it runs. Removal only marks the slot; marked slots are
//! skipped immediately and dropped by [`Registry::purge`] at the end of the tick.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u32);

impl ListenerId {
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Slot<K, L: ?Sized> {
    id: ListenerId,
    key: K,
    listener: Option<Box<L>>,
    removed: bool,
}

pub(crate) struct Registry<K, L: ?Sized> {
    slots: Vec<Slot<K, L>>,
    next_id: u32,
}

impl<K, L: ?Sized> Default for Registry<K, L> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 0,
        }
    }
}

impl<K: Copy, L: ?Sized> Registry<K, L> {
    pub fn insert(&mut self, key: K, listener: Box<L>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.slots.push(Slot {
            id,
            key,
            listener: Some(listener),
            removed: false,
        });
        id
    }

    fn slot(&self, id: ListenerId) -> Option<&Slot<K, L>> {
        // Ids are handed out in increasing order and slots never reorder.
        self.slots
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|i| &self.slots[i])
    }

    fn slot_mut(&mut self, id: ListenerId) -> Option<&mut Slot<K, L>> {
        self.slots
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|i| &mut self.slots[i])
    }

    /// Marks a listener as removed. Returns false if it was unknown or already removed.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        match self.slot_mut(id) {
            Some(slot) if !slot.removed => {
                slot.removed = true;
                true
            }
            _ => false,
        }
    }

    pub fn remove_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let mut count = 0;
        for slot in self.slots.iter_mut().filter(|s| !s.removed) {
            if pred(&slot.key) {
                slot.removed = true;
                count += 1;
            }
        }
        count
    }

    pub fn is_active(&self, id: ListenerId) -> bool {
        self.slot(id).is_some_and(|s| !s.removed)
    }

    pub fn key(&self, id: ListenerId) -> Option<K> {
        self.slot(id).filter(|s| !s.removed).map(|s| s.key)
    }

    /// Snapshot of the active ids whose key matches, in registration order.
    pub fn matching(&self, mut pred: impl FnMut(&K) -> bool) -> Vec<ListenerId> {
        self.slots
            .iter()
            .filter(|s| !s.removed && pred(&s.key))
            .map(|s| s.id)
            .collect()
    }

    /// Takes the listener out for a call. `None` if removed or already taken.
    pub fn take(&mut self, id: ListenerId) -> Option<Box<L>> {
        let slot = self.slot_mut(id)?;
        if slot.removed {
            return None;
        }
        slot.listener.take()
    }

    /// Puts a listener back after a call. It is dropped if it was removed meanwhile.
    pub fn restore(&mut self, id: ListenerId, listener: Box<L>) {
        if let Some(slot) = self.slot_mut(id) {
            if !slot.removed {
                slot.listener = Some(listener);
            }
        }
    }

    /// Drops every removed slot.
    pub fn purge(&mut self) {
        self.slots.retain(|s| !s.removed);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| !s.removed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Counter = dyn FnMut() -> u32;

    #[test]
    fn take_restore_and_deferred_removal() {
        let mut reg: Registry<u8, Counter> = Registry::default();
        let a = reg.insert(1, Box::new(|| 1));
        let b = reg.insert(2, Box::new(|| 2));
        assert_eq!(reg.matching(|_| true), vec![a, b]);

        let mut taken = reg.take(a).unwrap();
        assert_eq!(taken(), 1);
        assert!(reg.take(a).is_none());
        assert!(reg.remove(a));
        reg.restore(a, taken);
        assert!(!reg.is_active(a));
        assert!(reg.take(a).is_none());

        assert!(!reg.remove(a));
        assert_eq!(reg.matching(|_| true), vec![b]);
        reg.purge();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.key(b), Some(2));
    }

    #[test]
    fn remove_where_matches_keys() {
        let mut reg: Registry<u8, Counter> = Registry::default();
        reg.insert(1, Box::new(|| 0));
        reg.insert(2, Box::new(|| 0));
        reg.insert(1, Box::new(|| 0));
        assert_eq!(reg.remove_where(|k| *k == 1), 2);
        assert_eq!(reg.len(), 1);
    }
}
