use crate::entry::PhysicalPageId;
use crate::layout::{AtlasLayout, PageAddress};

const NIL: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
struct Slot {
    prev: u32,
    next: u32,
    allocated: bool,
    pinned: bool,
}

impl Slot {
    const FREE: Slot = Slot {
        prev: NIL,
        next: NIL,
        allocated: false,
        pinned: false,
    };
}

/// Fixed-capacity allocator over physical page ids with LRU ordering and pinning.
///
/// Allocated pages sit on an intrusive recency list (head = most recently used), so
/// allocate, free, touch and pin are O(1). Eviction candidates are found by walking
/// from the tail past pinned pages.
pub struct PhysicalPagePool {
    layout: AtlasLayout,
    slots: Vec<Slot>,
    free: Vec<u32>,
    mru: u32,
    lru: u32,
    allocated: usize,
    pinned: usize,
}

impl PhysicalPagePool {
    /// `layout` must already be validated; an invalid layout yields an empty pool.
    pub fn new(layout: AtlasLayout) -> Self {
        let capacity = if layout.validate().is_ok() {
            layout.capacity()
        } else {
            log::warn!(target: "residency", "invalid atlas layout {:?}; pool is empty", layout);
            0
        };
        Self {
            layout,
            slots: vec![Slot::FREE; capacity as usize],
            free: (0..capacity).rev().collect(),
            mru: NIL,
            lru: NIL,
            allocated: 0,
            pinned: 0,
        }
    }

    #[inline]
    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn allocated_count(&self) -> usize {
        self.allocated
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn pinned_count(&self) -> usize {
        self.pinned
    }

    #[inline]
    pub fn address(&self, page: PhysicalPageId) -> Option<PageAddress> {
        self.layout.address(page)
    }

    #[inline]
    fn slot_index(&self, page: PhysicalPageId) -> Option<u32> {
        let idx = page.index();
        (idx < self.slots.len()).then_some(idx as u32)
    }

    pub fn is_allocated(&self, page: PhysicalPageId) -> bool {
        self.slot_index(page)
            .is_some_and(|i| self.slots[i as usize].allocated)
    }

    pub fn is_pinned(&self, page: PhysicalPageId) -> bool {
        self.slot_index(page)
            .is_some_and(|i| self.slots[i as usize].pinned)
    }

    /// Takes a free slot and marks it most recently used.
    pub fn try_allocate(&mut self) -> Option<PhysicalPageId> {
        let idx = self.free.pop()?;
        self.slots[idx as usize].allocated = true;
        self.link_front(idx);
        self.allocated += 1;
        Some(PhysicalPageId::from_slot(idx))
    }

    /// Returns the slot to the free set. Back-references must already be gone.
    pub fn free(&mut self, page: PhysicalPageId) -> bool {
        let Some(idx) = self.slot_index(page) else {
            return false;
        };
        if !self.slots[idx as usize].allocated {
            return false;
        }
        self.unlink(idx);
        if self.slots[idx as usize].pinned {
            self.pinned -= 1;
        }
        self.slots[idx as usize] = Slot::FREE;
        self.free.push(idx);
        self.allocated -= 1;
        true
    }

    pub fn touch(&mut self, page: PhysicalPageId) -> bool {
        match self.slot_index(page) {
            Some(idx) if self.slots[idx as usize].allocated => {
                if self.mru != idx {
                    self.unlink(idx);
                    self.link_front(idx);
                }
                true
            }
            _ => false,
        }
    }

    pub fn pin(&mut self, page: PhysicalPageId) -> bool {
        match self.slot_index(page) {
            Some(idx) if self.slots[idx as usize].allocated => {
                let slot = &mut self.slots[idx as usize];
                if !slot.pinned {
                    slot.pinned = true;
                    self.pinned += 1;
                }
                true
            }
            _ => false,
        }
    }

    /// Returns whether the page was pinned.
    pub fn unpin(&mut self, page: PhysicalPageId) -> bool {
        match self.slot_index(page) {
            Some(idx) if self.slots[idx as usize].pinned => {
                self.slots[idx as usize].pinned = false;
                self.pinned -= 1;
                true
            }
            _ => false,
        }
    }

    /// Pins only when the pool can actually hold every requested page. Otherwise the
    /// page stays evictable, since the coverage guarantee cannot be honored anyway.
    pub fn pin_if_guaranteed(&mut self, page: PhysicalPageId, requested_pages: usize) -> bool {
        if self.capacity() >= requested_pages {
            self.pin(page)
        } else {
            false
        }
    }

    /// Least recently used unpinned page.
    pub fn try_get_eviction_candidate(&self) -> Option<PhysicalPageId> {
        let mut cur = self.lru;
        while cur != NIL {
            let slot = &self.slots[cur as usize];
            if !slot.pinned {
                return Some(PhysicalPageId::from_slot(cur));
            }
            cur = slot.prev;
        }
        None
    }

    /// Fills `out` with allocated pages, most recently used first.
    pub fn copy_most_recently_used(&self, out: &mut [PhysicalPageId]) -> usize {
        let mut n = 0;
        for (dst, page) in out.iter_mut().zip(self.iter_mru()) {
            *dst = page;
            n += 1;
        }
        n
    }

    pub fn iter_mru(&self) -> impl Iterator<Item = PhysicalPageId> + '_ {
        let mut cur = self.mru;
        std::iter::from_fn(move || {
            if cur == NIL {
                return None;
            }
            let idx = cur;
            cur = self.slots[idx as usize].next;
            Some(PhysicalPageId::from_slot(idx))
        })
    }

    pub fn reset(&mut self) {
        let capacity = self.slots.len() as u32;
        self.slots.fill(Slot::FREE);
        self.free.clear();
        self.free.extend((0..capacity).rev());
        self.mru = NIL;
        self.lru = NIL;
        self.allocated = 0;
        self.pinned = 0;
    }

    fn link_front(&mut self, idx: u32) {
        let old = self.mru;
        {
            let slot = &mut self.slots[idx as usize];
            slot.prev = NIL;
            slot.next = old;
        }
        if old != NIL {
            self.slots[old as usize].prev = idx;
        } else {
            self.lru = idx;
        }
        self.mru = idx;
    }

    fn unlink(&mut self, idx: u32) {
        let Slot { prev, next, .. } = self.slots[idx as usize];
        if prev != NIL {
            self.slots[prev as usize].next = next;
        } else {
            self.mru = next;
        }
        if next != NIL {
            self.slots[next as usize].prev = prev;
        } else {
            self.lru = prev;
        }
        let slot = &mut self.slots[idx as usize];
        slot.prev = NIL;
        slot.next = NIL;
    }
}
