use std::collections::VecDeque;

use hashbrown::HashSet;
use strata_page::{
    AtlasLayout, PackedPageEntry, PageFlags, PatchId, PhysicalPageId, PhysicalPagePool,
};

use crate::config::{FeedbackLimits, VirtualSpaceConfig};

/// Receives every page-table entry change so the GPU copy can be kept in sync.
pub trait PageTableWriter {
    fn write_entry(&mut self, chunk_slot: u32, virtual_page_index: u32, packed: u32);
}

impl<F: FnMut(u32, u32, u32)> PageTableWriter for F {
    fn write_entry(&mut self, chunk_slot: u32, virtual_page_index: u32, packed: u32) {
        self(chunk_slot, virtual_page_index, packed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VirtualPageAddr {
    pub chunk_slot: u32,
    pub page_index: u32,
}

impl VirtualPageAddr {
    #[inline]
    pub const fn new(chunk_slot: u32, page_index: u32) -> Self {
        Self {
            chunk_slot,
            page_index,
        }
    }
}

/// One GPU report that a virtual page was sampled while unmapped or stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedbackRequest {
    pub chunk_slot: u32,
    pub virtual_page: u32,
    pub patch: PatchId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureWork {
    pub addr: VirtualPageAddr,
    pub page: PhysicalPageId,
    pub patch: PatchId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelightWork {
    pub addr: VirtualPageAddr,
    pub page: PhysicalPageId,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedbackStats {
    pub processed: u64,
    pub rejected: u64,
    pub touched: u64,
    pub allocated: u64,
    pub deferred: u64,
    pub evicted: u64,
    pub failed: u64,
    pub recaptured: u64,
    pub work_overflow: u64,
}

impl FeedbackStats {
    fn accumulate(&mut self, other: &FeedbackStats) {
        self.processed += other.processed;
        self.rejected += other.rejected;
        self.touched += other.touched;
        self.allocated += other.allocated;
        self.deferred += other.deferred;
        self.evicted += other.evicted;
        self.failed += other.failed;
        self.recaptured += other.recaptured;
        self.work_overflow += other.work_overflow;
    }
}

/// Output buffers of one feedback pass; reuse across frames to avoid reallocating.
#[derive(Debug, Default)]
pub struct FrameWork {
    pub capture: Vec<CaptureWork>,
    pub relight: Vec<RelightWork>,
    pub stats: FeedbackStats,
}

impl FrameWork {
    pub fn clear(&mut self) {
        self.capture.clear();
        self.relight.clear();
        self.stats = FeedbackStats::default();
    }

    /// Drops queued work that targets `page`; the page is about to change owner.
    fn forget_page(&mut self, page: PhysicalPageId) {
        self.capture.retain(|w| w.page != page);
        self.relight.retain(|w| w.page != page);
    }
}

/// Physical to virtual back-mapping exposed for GPU dispatch.
#[derive(Clone, Copy)]
pub struct PageMappings<'a> {
    owners: &'a [Option<VirtualPageAddr>],
}

impl<'a> PageMappings<'a> {
    pub fn virtual_of(&self, page: PhysicalPageId) -> Option<VirtualPageAddr> {
        self.owners.get(page.index()).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PhysicalPageId, VirtualPageAddr)> + 'a {
        self.owners.iter().enumerate().filter_map(|(i, owner)| {
            let addr = (*owner)?;
            let page = PhysicalPageId::from_index(i as u32).ok()?;
            Some((page, addr))
        })
    }
}

/// Borrowed view of everything a GPU pass needs to consume this frame's state.
#[derive(Clone, Copy)]
pub struct DispatchState<'a> {
    pub pool: &'a PhysicalPagePool,
    pub mappings: PageMappings<'a>,
    pub page_table: &'a [PackedPageEntry],
    pub space: VirtualSpaceConfig,
}

/// Reconciles GPU feedback against the page table: maps missing pages under budget,
/// refreshes recency of hits, and schedules capture/relight work.
pub struct FeedbackRequestProcessor {
    space: VirtualSpaceConfig,
    limits: FeedbackLimits,
    pool: PhysicalPagePool,
    page_table: Vec<PackedPageEntry>,
    owners: Vec<Option<VirtualPageAddr>>,
    patches: Vec<PatchId>,
    recapture: VecDeque<VirtualPageAddr>,
    recapture_queued: HashSet<VirtualPageAddr>,
    totals: FeedbackStats,
}

impl FeedbackRequestProcessor {
    pub fn new(layout: AtlasLayout, space: VirtualSpaceConfig, limits: FeedbackLimits) -> Self {
        let pool = PhysicalPagePool::new(layout);
        let capacity = pool.capacity();
        Self {
            space,
            limits,
            pool,
            page_table: vec![PackedPageEntry::UNMAPPED; space.total_pages()],
            owners: vec![None; capacity],
            patches: vec![PatchId::NONE; capacity],
            recapture: VecDeque::new(),
            recapture_queued: HashSet::new(),
            totals: FeedbackStats::default(),
        }
    }

    #[inline]
    pub fn limits(&self) -> &FeedbackLimits {
        &self.limits
    }

    pub fn set_limits(&mut self, limits: FeedbackLimits) {
        self.limits = limits;
    }

    #[inline]
    pub fn pool(&self) -> &PhysicalPagePool {
        &self.pool
    }

    #[inline]
    pub fn totals(&self) -> FeedbackStats {
        self.totals
    }

    #[inline]
    pub fn recapture_backlog(&self) -> usize {
        self.recapture.len()
    }

    pub fn dispatch_state(&self) -> DispatchState<'_> {
        DispatchState {
            pool: &self.pool,
            mappings: PageMappings {
                owners: &self.owners,
            },
            page_table: &self.page_table,
            space: self.space,
        }
    }

    fn linear(&self, addr: VirtualPageAddr) -> Option<usize> {
        if addr.chunk_slot < self.space.chunk_slots && addr.page_index < self.space.pages_per_slot {
            Some(
                addr.chunk_slot as usize * self.space.pages_per_slot as usize
                    + addr.page_index as usize,
            )
        } else {
            None
        }
    }

    pub fn entry(&self, addr: VirtualPageAddr) -> PackedPageEntry {
        self.linear(addr)
            .map_or(PackedPageEntry::UNMAPPED, |i| self.page_table[i])
    }

    pub fn patch_of(&self, page: PhysicalPageId) -> PatchId {
        self.patches.get(page.index()).copied().unwrap_or(PatchId::NONE)
    }

    /// One feedback pass. `out` is cleared first.
    pub fn process(
        &mut self,
        requests: &[FeedbackRequest],
        writer: &mut dyn PageTableWriter,
        out: &mut FrameWork,
    ) {
        out.clear();
        let mut new_allocations = 0usize;
        for req in requests.iter().take(self.limits.max_requests_to_process) {
            out.stats.processed += 1;
            let addr = VirtualPageAddr::new(req.chunk_slot, req.virtual_page);
            let Some(linear) = self.linear(addr) else {
                out.stats.rejected += 1;
                continue;
            };
            if let Some(page) = self.page_table[linear].physical_page() {
                self.pool.touch(page);
                out.stats.touched += 1;
                continue;
            }
            if new_allocations >= self.limits.max_new_allocations {
                out.stats.deferred += 1;
                continue;
            }
            let Some(page) = self.allocate_or_evict_one(writer, out) else {
                out.stats.failed += 1;
                continue;
            };
            new_allocations += 1;
            self.bind(addr, linear, page, req.patch, writer);
            out.stats.allocated += 1;
            self.push_work(addr, page, req.patch, out);
        }
        self.drain_recapture(writer, out);
        self.totals.accumulate(&out.stats);
        if out.stats.failed > 0 || out.stats.deferred > 0 {
            log::debug!(
                target: "feedback",
                "pass: {} allocated, {} deferred, {} failed",
                out.stats.allocated,
                out.stats.deferred,
                out.stats.failed
            );
        }
    }

    fn allocate_or_evict_one(
        &mut self,
        writer: &mut dyn PageTableWriter,
        out: &mut FrameWork,
    ) -> Option<PhysicalPageId> {
        if let Some(page) = self.pool.try_allocate() {
            return Some(page);
        }
        let victim = self.pool.try_get_eviction_candidate()?;
        self.release_page(victim, writer);
        out.forget_page(victim);
        out.stats.evicted += 1;
        self.pool.try_allocate()
    }

    fn bind(
        &mut self,
        addr: VirtualPageAddr,
        linear: usize,
        page: PhysicalPageId,
        patch: PatchId,
        writer: &mut dyn PageTableWriter,
    ) {
        let entry = PackedPageEntry::new(page, PageFlags::FRESH);
        self.page_table[linear] = entry;
        self.owners[page.index()] = Some(addr);
        self.patches[page.index()] = patch;
        writer.write_entry(addr.chunk_slot, addr.page_index, entry.raw());
    }

    fn push_work(
        &mut self,
        addr: VirtualPageAddr,
        page: PhysicalPageId,
        patch: PatchId,
        out: &mut FrameWork,
    ) {
        let capture_full = out.capture.len() >= self.limits.max_capture_work;
        let relight_full = out.relight.len() >= self.limits.max_relight_work;
        if capture_full || relight_full {
            // Flags stay set; the page is picked up again by the recapture queue.
            out.stats.work_overflow += 1;
            self.queue_recapture(addr);
            return;
        }
        out.capture.push(CaptureWork { addr, page, patch });
        out.relight.push(RelightWork { addr, page });
    }

    fn release_page(&mut self, page: PhysicalPageId, writer: &mut dyn PageTableWriter) {
        if let Some(addr) = self.owners[page.index()].take() {
            if let Some(linear) = self.linear(addr) {
                self.page_table[linear] = PackedPageEntry::UNMAPPED;
            }
            writer.write_entry(addr.chunk_slot, addr.page_index, PackedPageEntry::UNMAPPED.raw());
        }
        self.patches[page.index()] = PatchId::NONE;
        self.pool.free(page);
    }

    fn queue_recapture(&mut self, addr: VirtualPageAddr) -> bool {
        if self.recapture_queued.insert(addr) {
            self.recapture.push_back(addr);
            true
        } else {
            false
        }
    }

    fn drain_recapture(&mut self, writer: &mut dyn PageTableWriter, out: &mut FrameWork) {
        let mut drained = 0;
        while drained < self.limits.max_recaptures_per_frame {
            if out.capture.len() >= self.limits.max_capture_work
                || out.relight.len() >= self.limits.max_relight_work
            {
                break;
            }
            let Some(addr) = self.recapture.pop_front() else {
                break;
            };
            self.recapture_queued.remove(&addr);
            drained += 1;
            let Some(linear) = self.linear(addr) else {
                continue;
            };
            let entry = self.page_table[linear];
            let Some(page) = entry.physical_page() else {
                continue;
            };
            let updated = entry.insert_flags(PageFlags::STALE);
            if updated != entry {
                self.page_table[linear] = updated;
                writer.write_entry(addr.chunk_slot, addr.page_index, updated.raw());
            }
            let patch = self.patches[page.index()];
            out.capture.push(CaptureWork { addr, page, patch });
            out.relight.push(RelightWork { addr, page });
            out.stats.recaptured += 1;
        }
    }

    /// Queues every mapped page for recapture, most recently used first.
    pub fn notify_all_dirty(&mut self, reason: &str) -> usize {
        let addrs: Vec<VirtualPageAddr> = self
            .pool
            .iter_mru()
            .filter_map(|page| self.owners[page.index()])
            .collect();
        let queued = addrs
            .into_iter()
            .filter(|&addr| self.queue_recapture(addr))
            .count();
        log::info!(
            target: "feedback",
            "all pages dirty ({}): {} queued, backlog {}",
            reason,
            queued,
            self.recapture.len()
        );
        queued
    }

    pub fn try_clear_page_flags(
        &mut self,
        addr: VirtualPageAddr,
        mask: PageFlags,
        writer: &mut dyn PageTableWriter,
    ) -> bool {
        self.edit_flags(addr, writer, |e| e.remove_flags(mask))
    }

    pub fn try_set_page_flags(
        &mut self,
        addr: VirtualPageAddr,
        mask: PageFlags,
        writer: &mut dyn PageTableWriter,
    ) -> bool {
        self.edit_flags(addr, writer, |e| e.insert_flags(mask))
    }

    fn edit_flags(
        &mut self,
        addr: VirtualPageAddr,
        writer: &mut dyn PageTableWriter,
        f: impl FnOnce(PackedPageEntry) -> PackedPageEntry,
    ) -> bool {
        let Some(linear) = self.linear(addr) else {
            return false;
        };
        let entry = self.page_table[linear];
        if !entry.is_mapped() {
            return false;
        }
        let updated = f(entry);
        if updated != entry {
            self.page_table[linear] = updated;
            writer.write_entry(addr.chunk_slot, addr.page_index, updated.raw());
        }
        true
    }

    /// Applies `f` only if `addr` still maps to `page`.
    fn edit_if_owned(
        &mut self,
        addr: VirtualPageAddr,
        page: PhysicalPageId,
        writer: &mut dyn PageTableWriter,
        f: impl FnOnce(PackedPageEntry) -> PackedPageEntry,
    ) -> bool {
        if self.entry(addr).physical_page() != Some(page) {
            return false;
        }
        self.edit_flags(addr, writer, f)
    }

    pub fn mark_capture_dispatched(
        &mut self,
        work: &[CaptureWork],
        writer: &mut dyn PageTableWriter,
    ) {
        for w in work {
            self.edit_if_owned(w.addr, w.page, writer, |e| e.insert_flags(PageFlags::CAPTURING));
        }
    }

    pub fn complete_capture(
        &mut self,
        addr: VirtualPageAddr,
        page: PhysicalPageId,
        writer: &mut dyn PageTableWriter,
    ) -> bool {
        self.edit_if_owned(addr, page, writer, |e| {
            e.remove_flags(PageFlags::NEEDS_CAPTURE | PageFlags::CAPTURING)
        })
    }

    pub fn mark_relight_dispatched(
        &mut self,
        work: &[RelightWork],
        writer: &mut dyn PageTableWriter,
    ) {
        for w in work {
            self.edit_if_owned(w.addr, w.page, writer, |e| e.insert_flags(PageFlags::RELIGHTING));
        }
    }

    pub fn complete_relight(
        &mut self,
        addr: VirtualPageAddr,
        page: PhysicalPageId,
        writer: &mut dyn PageTableWriter,
    ) -> bool {
        self.edit_if_owned(addr, page, writer, |e| {
            e.remove_flags(PageFlags::NEEDS_RELIGHT | PageFlags::RELIGHTING)
        })
    }

    /// Pages still needing relight and not in flight, most recently used first.
    pub fn relight_priority(&self, out: &mut Vec<RelightWork>, max: usize) {
        out.clear();
        for page in self.pool.iter_mru() {
            if out.len() >= max {
                break;
            }
            let Some(addr) = self.owners[page.index()] else {
                continue;
            };
            let flags = self.entry(addr).flags();
            if flags.contains(PageFlags::NEEDS_RELIGHT) && !flags.contains(PageFlags::RELIGHTING) {
                out.push(RelightWork { addr, page });
            }
        }
    }

    /// Unmaps every page of one chunk slot. Returns how many were released.
    pub fn release_slot(&mut self, chunk_slot: u32, writer: &mut dyn PageTableWriter) -> usize {
        if chunk_slot >= self.space.chunk_slots {
            return 0;
        }
        let mut released = 0;
        for index in 0..self.space.pages_per_slot {
            let addr = VirtualPageAddr::new(chunk_slot, index);
            if let Some(page) = self.entry(addr).physical_page() {
                self.release_page(page, writer);
                released += 1;
            }
        }
        released
    }

    pub fn reset(&mut self, writer: &mut dyn PageTableWriter) {
        let pages: Vec<PhysicalPageId> = self.pool.iter_mru().collect();
        for page in pages {
            self.release_page(page, writer);
        }
        self.pool.reset();
        self.recapture.clear();
        self.recapture_queued.clear();
        log::info!(target: "feedback", "virtual page table reset");
    }
}
