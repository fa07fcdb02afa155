use hashbrown::HashMap;
use strata_geom::RegionKey;

/// Source of truth for how fresh a region's content is.
pub trait ChunkVersionProvider {
    fn current_version(&self, key: RegionKey) -> u64;
    /// Bumps the key's version and returns the new one.
    fn mark_dirty(&mut self, key: RegionKey) -> u64;
    /// Invalidates every key at once.
    fn bump_global_generation(&mut self) -> u64;
}

/// Versions as `local + generation`; a generation bump moves every key in O(1).
/// Both counters only grow, so each key's version never decreases.
#[derive(Debug, Default)]
pub struct RegionVersions {
    local: HashMap<RegionKey, u64>,
    generation: u64,
}

impl RegionVersions {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl ChunkVersionProvider for RegionVersions {
    fn current_version(&self, key: RegionKey) -> u64 {
        let local = self.local.get(&key).copied().unwrap_or(0);
        local.saturating_add(self.generation)
    }

    fn mark_dirty(&mut self, key: RegionKey) -> u64 {
        let local = self.local.entry(key).or_insert(0);
        *local = local.saturating_add(1);
        self.current_version(key)
    }

    fn bump_global_generation(&mut self) -> u64 {
        self.generation = self.generation.saturating_add(1);
        self.generation
    }
}
