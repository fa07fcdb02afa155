//! Clipmap ring-buffer addressing: per-level anchors, toroidal texel wrap and region
//! window diffing.
#![forbid(unsafe_code)]

mod level;
mod map;

pub use level::{AnchorUpdate, ClipmapLevel, newly_exposed, world_cell_to_texel};
pub use map::{Clipmap, LevelUpdate};

use serde::Deserialize;

/// Finest level spacing is one cell; level `L` covers cells of size `2^L`.
pub const MAX_LEVELS: u8 = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClipmapError {
    #[error("resolution {0} must be a power of two >= 2")]
    Resolution(u32),
    #[error("region size {region_size} must be >= 1 and divide resolution {resolution}")]
    RegionSize { region_size: u32, resolution: u32 },
    #[error("level count {0} outside 1..={MAX_LEVELS}")]
    LevelCount(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ClipmapConfig {
    #[serde(default = "default_levels")]
    pub levels: u8,
    /// Texels per axis of every level volume.
    #[serde(default = "default_resolution")]
    pub resolution: u32,
    /// Level cells per region edge.
    #[serde(default = "default_region_size")]
    pub region_size: u32,
}

fn default_levels() -> u8 {
    4
}
fn default_resolution() -> u32 {
    64
}
fn default_region_size() -> u32 {
    16
}

impl Default for ClipmapConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            resolution: default_resolution(),
            region_size: default_region_size(),
        }
    }
}

impl ClipmapConfig {
    pub fn validate(&self) -> Result<(), ClipmapError> {
        if self.resolution < 2 || !self.resolution.is_power_of_two() || self.resolution > 1 << 20 {
            return Err(ClipmapError::Resolution(self.resolution));
        }
        if self.region_size == 0 || self.resolution % self.region_size != 0 {
            return Err(ClipmapError::RegionSize {
                region_size: self.region_size,
                resolution: self.resolution,
            });
        }
        if self.levels == 0 || self.levels > MAX_LEVELS {
            return Err(ClipmapError::LevelCount(self.levels));
        }
        Ok(())
    }
}
