use strata_geom::{CellPos, RegionBox};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnchorUpdate {
    NotMoved,
    /// Moved by less than the resolution on every axis; only the exposed slabs need data.
    Shifted { delta: CellPos },
    /// First anchor or a jump of at least a full window; every slab is pending.
    Invalidated,
}

/// One clipmap level: a `resolution^3` window of level cells centered on the anchor,
/// stored toroidally so a move only rewrites the exposed slabs.
#[derive(Clone, Debug)]
pub struct ClipmapLevel {
    level: u8,
    resolution: u32,
    anchor: CellPos,
    origin_min: CellPos,
    ring: [u32; 3],
    initialized: bool,
}

impl ClipmapLevel {
    pub fn new(level: u8, resolution: u32) -> Self {
        Self {
            level,
            resolution,
            anchor: CellPos::ZERO,
            origin_min: CellPos::ZERO,
            ring: [0; 3],
            initialized: false,
        }
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }
    #[inline]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }
    #[inline]
    pub fn anchor(&self) -> CellPos {
        self.anchor
    }
    #[inline]
    pub fn origin_min(&self) -> CellPos {
        self.origin_min
    }
    #[inline]
    pub fn ring(&self) -> [u32; 3] {
        self.ring
    }
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Level cell containing `world_cell`, flooring toward negative infinity.
    #[inline]
    pub fn level_cell(&self, world_cell: CellPos) -> CellPos {
        world_cell.shr_floor(u32::from(self.level))
    }

    /// Level cells currently covered, half-open.
    pub fn window(&self) -> RegionBox {
        let r = self.resolution as i32;
        RegionBox::new(self.origin_min, self.origin_min + CellPos::splat(r))
    }

    pub fn update_anchor(&mut self, new_anchor: CellPos) -> AnchorUpdate {
        let half = (self.resolution / 2) as i32;
        let new_origin = new_anchor - CellPos::splat(half);
        if !self.initialized {
            self.anchor = new_anchor;
            self.origin_min = new_origin;
            self.ring = [0; 3];
            self.initialized = true;
            return AnchorUpdate::Invalidated;
        }
        if new_anchor == self.anchor {
            return AnchorUpdate::NotMoved;
        }
        let delta = new_anchor - self.anchor;
        let res = i64::from(self.resolution);
        for (ring, d) in self.ring.iter_mut().zip(delta.to_array()) {
            *ring = (i64::from(*ring) + i64::from(d)).rem_euclid(res) as u32;
        }
        self.anchor = new_anchor;
        self.origin_min = new_origin;
        if i64::from(delta.max_abs_component()) >= res {
            AnchorUpdate::Invalidated
        } else {
            AnchorUpdate::Shifted { delta }
        }
    }

    /// Forgets the anchor so the next update invalidates the whole level.
    pub fn invalidate(&mut self) {
        self.initialized = false;
    }

    pub fn texel_for(&self, level_cell: CellPos) -> Option<[u32; 3]> {
        if !self.initialized {
            return None;
        }
        world_cell_to_texel(level_cell, self.origin_min, self.ring, self.resolution)
    }
}

/// Toroidal texel of a level cell, or `None` when it lies outside the window.
pub fn world_cell_to_texel(
    level_cell: CellPos,
    origin_min: CellPos,
    ring: [u32; 3],
    resolution: u32,
) -> Option<[u32; 3]> {
    let local = [
        i64::from(level_cell.x) - i64::from(origin_min.x),
        i64::from(level_cell.y) - i64::from(origin_min.y),
        i64::from(level_cell.z) - i64::from(origin_min.z),
    ];
    let res = i64::from(resolution);
    let mut out = [0u32; 3];
    for axis in 0..3 {
        if local[axis] < 0 || local[axis] >= res {
            return None;
        }
        out[axis] = ((local[axis] + i64::from(ring[axis])) % res) as u32;
    }
    Some(out)
}

/// Coordinates inside `next` but not `prev`, x fastest.
pub fn newly_exposed<'a>(
    prev: &'a RegionBox,
    next: &'a RegionBox,
) -> impl Iterator<Item = CellPos> + 'a {
    next.iter().filter(move |p| !prev.contains(*p))
}
