use hashbrown::HashMap;
use strata_geom::ChunkCoord;
use strata_page::{AtlasLayout, PageAddress, PhysicalPageId, PhysicalPagePool};

/// Which atlas a chunk's page lives in. A chunk is resident in at most one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Near,
    Far,
}

impl Field {
    pub const ALL: [Field; 2] = [Field::Near, Field::Far];

    #[inline]
    fn index(self) -> usize {
        match self {
            Field::Near => 0,
            Field::Far => 1,
        }
    }

    #[inline]
    pub fn other(self) -> Field {
        match self {
            Field::Near => Field::Far,
            Field::Far => Field::Near,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReleaseReason {
    Evicted,
    ChunkUnloaded,
    FieldTransition,
    Reset,
}

/// Emitted after the binding is gone but before the page returns to its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRelease {
    pub field: Field,
    pub chunk: ChunkCoord,
    pub page: PhysicalPageId,
    pub reason: ReleaseReason,
}

pub trait PageReleaseListener {
    fn on_page_released(&mut self, release: &PageRelease);
}

impl<F: FnMut(&PageRelease)> PageReleaseListener for F {
    fn on_page_released(&mut self, release: &PageRelease) {
        self(release)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivatedPage {
    pub field: Field,
    pub page: PhysicalPageId,
    pub address: PageAddress,
    /// False when the chunk was already resident in this field.
    pub newly_allocated: bool,
    pub pinned: bool,
    pub evicted: Option<ChunkCoord>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResidencyStats {
    pub activations: u64,
    pub reuses: u64,
    pub transitions: u64,
    pub evictions: u64,
    pub failed: u64,
    pub rejected: u64,
    pub releases: u64,
}

struct FieldState {
    pool: PhysicalPagePool,
    by_chunk: HashMap<u64, PhysicalPageId>,
    /// Packed chunk key per pool slot.
    owners: Vec<Option<u64>>,
}

impl FieldState {
    fn new(layout: AtlasLayout) -> Self {
        let pool = PhysicalPagePool::new(layout);
        let owners = vec![None; pool.capacity()];
        Self {
            pool,
            by_chunk: HashMap::new(),
            owners,
        }
    }
}

/// Binds chunks to physical pages in the Near and Far atlases, evicting LRU pages
/// under pressure and telling listeners whenever a binding ends.
pub struct ChunkResidencyManager {
    fields: [FieldState; 2],
    listeners: Vec<Box<dyn PageReleaseListener>>,
    stats: ResidencyStats,
}

impl ChunkResidencyManager {
    pub fn new(near: AtlasLayout, far: AtlasLayout) -> Self {
        Self {
            fields: [FieldState::new(near), FieldState::new(far)],
            listeners: Vec::new(),
            stats: ResidencyStats::default(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn PageReleaseListener>) {
        self.listeners.push(listener);
    }

    /// Releases every binding, then rebuilds both pools. Listeners are kept.
    pub fn reconfigure(&mut self, near: AtlasLayout, far: AtlasLayout) {
        self.reset();
        self.fields = [FieldState::new(near), FieldState::new(far)];
    }

    #[inline]
    pub fn pool(&self, field: Field) -> &PhysicalPagePool {
        &self.fields[field.index()].pool
    }

    #[inline]
    pub fn stats(&self) -> ResidencyStats {
        self.stats
    }

    pub fn resident_count(&self, field: Field) -> usize {
        self.fields[field.index()].by_chunk.len()
    }

    pub fn page_for(&self, field: Field, chunk: ChunkCoord) -> Option<PhysicalPageId> {
        let key = chunk.try_pack_key().ok()?;
        self.fields[field.index()].by_chunk.get(&key).copied()
    }

    pub fn field_of(&self, chunk: ChunkCoord) -> Option<Field> {
        let key = chunk.try_pack_key().ok()?;
        Field::ALL
            .into_iter()
            .find(|f| self.fields[f.index()].by_chunk.contains_key(&key))
    }

    pub fn chunk_of(&self, field: Field, page: PhysicalPageId) -> Option<ChunkCoord> {
        self.fields[field.index()]
            .owners
            .get(page.index())
            .copied()
            .flatten()
            .map(ChunkCoord::from_key)
    }

    /// Makes `chunk` resident in `field`. Attempts at most one eviction.
    pub fn try_activate_chunk(&mut self, field: Field, chunk: ChunkCoord) -> Option<ActivatedPage> {
        let key = match chunk.try_pack_key() {
            Ok(k) => k,
            Err(e) => {
                self.stats.rejected += 1;
                log::warn!(target: "residency", "rejecting chunk {:?}: {}", chunk, e);
                return None;
            }
        };

        let fi = field.index();
        if let Some(&page) = self.fields[fi].by_chunk.get(&key) {
            let state = &mut self.fields[fi];
            state.pool.touch(page);
            self.stats.reuses += 1;
            return Some(ActivatedPage {
                field,
                page,
                address: state.pool.address(page)?,
                newly_allocated: false,
                pinned: state.pool.is_pinned(page),
                evicted: None,
            });
        }

        let other = field.other();
        if self.fields[other.index()].by_chunk.contains_key(&key) {
            self.release(other, key, ReleaseReason::FieldTransition);
            self.stats.transitions += 1;
        }

        let mut evicted = None;
        let page = match self.fields[fi].pool.try_allocate() {
            Some(p) => p,
            None => {
                if let Some(victim) = self.fields[fi].pool.try_get_eviction_candidate() {
                    match self.fields[fi].owners[victim.index()] {
                        Some(owner) => {
                            self.release(field, owner, ReleaseReason::Evicted);
                            evicted = Some(ChunkCoord::from_key(owner));
                        }
                        None => {
                            self.fields[fi].pool.free(victim);
                        }
                    }
                    self.stats.evictions += 1;
                }
                match self.fields[fi].pool.try_allocate() {
                    Some(p) => p,
                    None => {
                        self.stats.failed += 1;
                        log::debug!(
                            target: "residency",
                            "{:?} field exhausted, {:?} stays non-resident",
                            field,
                            chunk
                        );
                        return None;
                    }
                }
            }
        };

        let state = &mut self.fields[fi];
        state.by_chunk.insert(key, page);
        state.owners[page.index()] = Some(key);
        self.stats.activations += 1;
        Some(ActivatedPage {
            field,
            page,
            address: state.pool.address(page)?,
            newly_allocated: true,
            pinned: false,
            evicted,
        })
    }

    /// Activates and pins the page when the field can hold all `requested_pages`
    /// of the current plan.
    pub fn try_activate_chunk_planned(
        &mut self,
        field: Field,
        chunk: ChunkCoord,
        requested_pages: usize,
    ) -> Option<ActivatedPage> {
        let mut activated = self.try_activate_chunk(field, chunk)?;
        activated.pinned = self.fields[field.index()]
            .pool
            .pin_if_guaranteed(activated.page, requested_pages);
        Some(activated)
    }

    pub fn unpin_chunk(&mut self, field: Field, chunk: ChunkCoord) -> bool {
        match self.page_for(field, chunk) {
            Some(page) => self.fields[field.index()].pool.unpin(page),
            None => false,
        }
    }

    pub fn on_chunk_unloaded(&mut self, chunk: ChunkCoord) -> bool {
        let Ok(key) = chunk.try_pack_key() else {
            return false;
        };
        let mut released = false;
        for field in Field::ALL {
            released |= self
                .release(field, key, ReleaseReason::ChunkUnloaded)
                .is_some();
        }
        released
    }

    pub fn reset(&mut self) {
        for field in Field::ALL {
            let keys: Vec<u64> = self.fields[field.index()].by_chunk.keys().copied().collect();
            for key in keys {
                self.release(field, key, ReleaseReason::Reset);
            }
            self.fields[field.index()].pool.reset();
        }
        log::info!(target: "residency", "chunk residency reset");
    }

    fn release(&mut self, field: Field, key: u64, reason: ReleaseReason) -> Option<PhysicalPageId> {
        let state = &mut self.fields[field.index()];
        let page = state.by_chunk.remove(&key)?;
        state.pool.unpin(page);
        state.owners[page.index()] = None;
        let event = PageRelease {
            field,
            chunk: ChunkCoord::from_key(key),
            page,
            reason,
        };
        for listener in self.listeners.iter_mut() {
            listener.on_page_released(&event);
        }
        state.pool.free(page);
        self.stats.releases += 1;
        log::debug!(
            target: "residency",
            "released {} ({:?}) from {:?}: {:?}",
            page,
            event.chunk,
            field,
            reason
        );
        Some(page)
    }
}
