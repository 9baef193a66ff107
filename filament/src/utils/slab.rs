use std::ops::{Index, IndexMut};

/// A single slot of a [`Slab`].
enum Slot<T> {
    /// The slot holds a live value.
    Occupied(T),

    /// The slot is free; the payload is the next free index, if any.
    Vacant(Option<usize>),
}

/// A slab allocator with stable, reusable indices.
///
/// The readiness reactor stores one registration per OS handle here and
/// hands the index to the poller as its event token, so lookups on the
/// hot path are a bounds-checked vector access.
///
/// Freed indices are threaded through an intrusive free list and are
/// reused by later insertions.
pub(crate) struct Slab<T> {
    /// Storage for all slots.
    slots: Vec<Slot<T>>,

    /// Head of the free list.
    next_free: Option<usize>,

    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a slab with room for `capacity` entries before growing.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            next_free: None,
            len: 0,
        }
    }

    /// Inserts a value and returns its index.
    pub(crate) fn insert(&mut self, value: T) -> usize {
        self.len += 1;

        match self.next_free {
            Some(index) => {
                if let Slot::Vacant(next) = self.slots[index] {
                    self.next_free = next;
                }
                self.slots[index] = Slot::Occupied(value);
                index
            }
            None => {
                self.slots.push(Slot::Occupied(value));
                self.slots.len() - 1
            }
        }
    }

    /// Removes the value at `index`, if that slot is occupied.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let slot = self.slots.get_mut(index)?;

        if let Slot::Vacant(_) = slot {
            return None;
        }

        let previous = std::mem::replace(slot, Slot::Vacant(self.next_free));
        self.next_free = Some(index);
        self.len -= 1;

        match previous {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant(_) => None,
        }
    }

    /// Returns a mutable reference to the value at `index`.
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.slots.get_mut(index) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns the number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl<T> Index<usize> for Slab<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.slots.get(index) {
            Some(Slot::Occupied(value)) => value,
            _ => panic!("invalid slab index {index}"),
        }
    }
}

impl<T> IndexMut<usize> for Slab<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        self.get_mut(index)
            .unwrap_or_else(|| panic!("invalid slab index {index}"))
    }
}
