/// Generational index into an [`Arena`].
/// Allows safe reuse of slots with use-after-free detection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SlotId {
    pub index: u32,
    pub generation: u32,
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage where freed slots are reused under a new generation,
/// so stale ids held elsewhere resolve to nothing instead of to a new value.
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Store a value, reusing a freed slot when there is one.
    pub fn insert(&mut self, value: T) -> SlotId {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            SlotId {
                index,
                generation: entry.generation,
            }
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(Entry {
                generation: 0,
                value: Some(value),
            });
            SlotId {
                index,
                generation: 0,
            }
        }
    }

    /// Free a slot, making it available for reuse.
    pub fn remove(&mut self, slot: SlotId) -> Option<T> {
        if !self.is_valid(slot) {
            return None;
        }
        let entry = &mut self.entries[slot.index as usize];
        // Bump generation immediately to invalidate the slot
        entry.generation = entry.generation.wrapping_add(1);
        self.free_list.push(slot.index);
        self.len -= 1;
        entry.value.take()
    }

    /// Check if a SlotId is valid (live value, correct generation).
    pub fn is_valid(&self, slot: SlotId) -> bool {
        self.entries
            .get(slot.index as usize)
            .is_some_and(|entry| entry.generation == slot.generation && entry.value.is_some())
    }

    pub fn get(&self, slot: SlotId) -> Option<&T> {
        self.entries
            .get(slot.index as usize)
            .filter(|entry| entry.generation == slot.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut T> {
        self.entries
            .get_mut(slot.index as usize)
            .filter(|entry| entry.generation == slot.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            let slot = SlotId {
                index: index as u32,
                generation: entry.generation,
            };
            entry.value.as_ref().map(|value| (slot, value))
        })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_insert_and_remove() {
        let mut arena = Arena::new();

        let slot1 = arena.insert("first");
        let slot2 = arena.insert("second");

        assert!(arena.is_valid(slot1));
        assert!(arena.is_valid(slot2));
        assert_ne!(slot1, slot2);
        assert_eq!(arena.len(), 2);

        assert_eq!(arena.remove(slot1), Some("first"));
        assert!(!arena.is_valid(slot1));
        assert_eq!(arena.remove(slot1), None);

        // Reuse freed slot
        let slot3 = arena.insert("third");
        assert_eq!(slot3.index, slot1.index);
        assert_ne!(slot3.generation, slot1.generation);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn arena_get_mut() {
        let mut arena = Arena::new();
        let slot = arena.insert(1);

        *arena.get_mut(slot).unwrap() += 1;

        assert_eq!(arena.get(slot), Some(&2));
    }

    #[test]
    fn arena_generation_check() {
        let mut arena = Arena::new();

        let slot1 = arena.insert('a');
        arena.remove(slot1);
        let slot2 = arena.insert('b'); // Reuses slot1's index

        // Old slot ID should be invalid
        assert!(!arena.is_valid(slot1));
        assert_eq!(arena.get(slot1), None);
        assert!(arena.is_valid(slot2));
        assert_eq!(arena.iter().map(|(_, value)| *value).collect::<Vec<_>>(), vec!['b']);
    }
}
