//! Hashed timing wheel with O(1) schedule/cancel.
//!
//! Single-level, power-of-two slots. Entries live in a fixed-capacity
//! generational slab and are chained per slot; a deadline more than one
//! rotation away simply stays in its slot until the cursor reaches it.

use core::mem;
use core::num::NonZeroUsize;

use super::tick::{TickInstant, TickSpan};

/// Handle to a scheduled entry; the generation detects stale use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WheelHandle {
    idx: u32,
    generation: u32,
}

/// Scheduled entry.
struct Node<T> {
    payload: T,
    generation: u32,
    next: Option<u32>,
    prev: Option<u32>,
    deadline: TickInstant,
}

/// Slab slot: either a scheduled node or a link in the free list.
enum Entry<T> {
    Occupied(Node<T>),
    Free { next: Option<u32>, generation: u32 },
}

/// Hashed timing wheel.
pub struct Wheel<T> {
    slots: Vec<Option<u32>>, // head of list per slot
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    mask: usize,
    cursor: TickInstant,
    len: usize,
}

impl<T> Wheel<T> {
    /// Creates an empty wheel whose cursor starts at `start`.
    ///
    /// # Panics
    ///
    /// Panics if `slots` is not a power of two or `capacity` exceeds `u32::MAX`.
    pub fn new(slots: usize, capacity: NonZeroUsize, start: TickInstant) -> Self {
        assert!(slots.is_power_of_two(), "wheel slots must be a power of two");
        let capacity = capacity.get();
        assert!(
            u32::try_from(capacity).is_ok(),
            "wheel capacity must fit in u32"
        );
        #[allow(clippy::cast_possible_truncation)]
        let entries = (0..capacity)
            .map(|i| Entry::Free {
                next: (i + 1 < capacity).then(|| (i + 1) as u32),
                generation: 0,
            })
            .collect();
        Self {
            slots: vec![None; slots],
            entries,
            free_head: Some(0),
            mask: slots - 1,
            cursor: start,
            len: 0,
        }
    }

    /// Last tick processed.
    #[cfg(test)]
    pub fn cursor(&self) -> TickInstant {
        self.cursor
    }

    /// Number of scheduled entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Schedules `payload` for `deadline`.
    ///
    /// Deadlines at or behind the cursor fire on the next tick. Returns `None`
    /// when the slab is full.
    pub fn schedule(&mut self, deadline: TickInstant, payload: T) -> Option<WheelHandle> {
        let deadline = deadline.max(self.cursor + TickSpan::new(1));
        let idx = self.free_head?;
        let generation = match &self.entries[idx as usize] {
            Entry::Free { next, generation } => {
                self.free_head = *next;
                *generation
            }
            Entry::Occupied(_) => unreachable!("free list must point at a free entry"),
        };
        let slot = self.slot_of(deadline);
        let head = self.slots[slot];
        self.entries[idx as usize] = Entry::Occupied(Node {
            payload,
            generation,
            next: head,
            prev: None,
            deadline,
        });
        if let Some(head) = head {
            if let Entry::Occupied(node) = &mut self.entries[head as usize] {
                node.prev = Some(idx);
            }
        }
        self.slots[slot] = Some(idx);
        self.len += 1;
        Some(WheelHandle { idx, generation })
    }

    /// Removes a scheduled entry, returning its payload if the handle was live.
    pub fn cancel(&mut self, handle: WheelHandle) -> Option<T> {
        match &self.entries[handle.idx as usize] {
            Entry::Occupied(node) if node.generation == handle.generation => {}
            _ => return None,
        }
        self.unlink(handle.idx);
        self.release(handle.idx)
    }

    /// Advances the cursor to `now`, handing every due payload to `on_fire`.
    ///
    /// A jump longer than one rotation visits each slot once.
    pub fn tick(&mut self, now: TickInstant, mut on_fire: impl FnMut(WheelHandle, T)) {
        if now <= self.cursor {
            return;
        }
        let steps = (now.get() - self.cursor.get()).min(self.slots.len() as u64);
        for step in 1..=steps {
            let slot = self.slot_of(self.cursor + TickSpan::new(step));
            let mut cursor = self.slots[slot];
            while let Some(idx) = cursor {
                let (next, due, generation) = match &self.entries[idx as usize] {
                    Entry::Occupied(node) => (node.next, node.deadline <= now, node.generation),
                    Entry::Free { .. } => (None, false, 0),
                };
                if due {
                    self.unlink(idx);
                    if let Some(payload) = self.release(idx) {
                        on_fire(WheelHandle { idx, generation }, payload);
                    }
                }
                cursor = next;
            }
        }
        self.cursor = now;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn slot_of(&self, tick: TickInstant) -> usize {
        (tick.get() as usize) & self.mask
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next, deadline) = match &self.entries[idx as usize] {
            Entry::Occupied(node) => (node.prev, node.next, node.deadline),
            Entry::Free { .. } => return,
        };
        match prev {
            Some(p) => {
                if let Entry::Occupied(node) = &mut self.entries[p as usize] {
                    node.next = next;
                }
            }
            None => {
                let slot = self.slot_of(deadline);
                self.slots[slot] = next;
            }
        }
        if let Some(n) = next {
            if let Entry::Occupied(node) = &mut self.entries[n as usize] {
                node.prev = prev;
            }
        }
    }

    fn release(&mut self, idx: u32) -> Option<T> {
        let free = Entry::Free {
            next: self.free_head,
            generation: 0,
        };
        match mem::replace(&mut self.entries[idx as usize], free) {
            Entry::Occupied(node) => {
                self.entries[idx as usize] = Entry::Free {
                    next: self.free_head,
                    generation: node.generation.wrapping_add(1),
                };
                self.free_head = Some(idx);
                self.len -= 1;
                Some(node.payload)
            }
            old @ Entry::Free { .. } => {
                self.entries[idx as usize] = old;
                None
            }
        }
    }
}
