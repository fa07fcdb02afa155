use strata_geom::{CellPos, RegionBox, RegionKey};

use crate::level::{AnchorUpdate, ClipmapLevel, newly_exposed};
use crate::{ClipmapConfig, ClipmapError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelUpdate {
    pub level: u8,
    pub update: AnchorUpdate,
    /// Regions that entered the window and need a snapshot.
    pub exposed: Vec<RegionKey>,
    /// Regions that left the window.
    pub departed: Vec<RegionKey>,
}

/// Stack of levels sharing resolution and region size, all following one viewer.
pub struct Clipmap {
    config: ClipmapConfig,
    levels: Vec<ClipmapLevel>,
    windows: Vec<RegionBox>,
}

impl Clipmap {
    pub fn new(config: ClipmapConfig) -> Result<Self, ClipmapError> {
        config.validate()?;
        let levels = (0..config.levels)
            .map(|l| ClipmapLevel::new(l, config.resolution))
            .collect();
        Ok(Self {
            config,
            levels,
            windows: vec![RegionBox::default(); config.levels as usize],
        })
    }

    #[inline]
    pub fn config(&self) -> &ClipmapConfig {
        &self.config
    }

    #[inline]
    pub fn levels(&self) -> &[ClipmapLevel] {
        &self.levels
    }

    /// Region coordinates covered by `level`, half-open. Empty before the first update.
    pub fn region_window(&self, level: u8) -> Option<RegionBox> {
        self.windows.get(level as usize).copied()
    }

    pub fn texel_for_world_cell(&self, level: u8, world_cell: CellPos) -> Option<[u32; 3]> {
        let lvl = self.levels.get(level as usize)?;
        lvl.texel_for(lvl.level_cell(world_cell))
    }

    /// Region containing a level cell.
    pub fn region_of(&self, level_cell: CellPos) -> CellPos {
        level_cell.div_floor(self.config.region_size as i32)
    }

    /// Level-cell box covered by one region.
    pub fn region_cells(&self, region: CellPos) -> RegionBox {
        let rs = self.config.region_size as i32;
        let min = CellPos::new(region.x * rs, region.y * rs, region.z * rs);
        RegionBox::new(min, min + CellPos::splat(rs))
    }

    fn regions_covering(&self, cells: RegionBox) -> RegionBox {
        if cells.is_empty() {
            return RegionBox::default();
        }
        let min = self.region_of(cells.min);
        let max = self.region_of(cells.max - CellPos::splat(1)) + CellPos::splat(1);
        RegionBox::new(min, max)
    }

    /// Re-anchors every level on `world_cell`. Levels that did not move are omitted.
    pub fn update(&mut self, world_cell: CellPos) -> Vec<LevelUpdate> {
        let mut updates = Vec::new();
        for i in 0..self.levels.len() {
            let anchor = self.levels[i].level_cell(world_cell);
            let update = self.levels[i].update_anchor(anchor);
            if update == AnchorUpdate::NotMoved {
                continue;
            }
            let level = self.levels[i].level();
            let prev = self.windows[i];
            let next = self.regions_covering(self.levels[i].window());
            let key = |coord| RegionKey::new(level, coord);
            let exposed: Vec<RegionKey> = match update {
                AnchorUpdate::Invalidated => next.iter().map(key).collect(),
                _ => newly_exposed(&prev, &next).map(key).collect(),
            };
            let departed: Vec<RegionKey> = newly_exposed(&next, &prev).map(key).collect();
            if update == AnchorUpdate::Invalidated {
                log::debug!(
                    target: "clipmap",
                    "level {} invalidated at {:?}: {} regions pending",
                    level,
                    anchor,
                    exposed.len()
                );
            }
            self.windows[i] = next;
            updates.push(LevelUpdate {
                level,
                update,
                exposed,
                departed,
            });
        }
        updates
    }

    /// Forces every level to refill on the next update.
    pub fn invalidate_all(&mut self) {
        for level in &mut self.levels {
            level.invalidate();
        }
    }
}
