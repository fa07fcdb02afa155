use serde::Deserialize;

use crate::entry::{MAX_PAGE_ID, PhysicalPageId};
use crate::PackError;

/// Where a physical page lives inside the bank of atlas arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageAddress {
    pub array: u32,
    pub tile_x: u32,
    pub tile_y: u32,
}

/// Shape of the atlas bank: `arrays` layers of `tiles_x * tiles_y` tiles each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct AtlasLayout {
    #[serde(default = "default_tiles")]
    pub tiles_x: u32,
    #[serde(default = "default_tiles")]
    pub tiles_y: u32,
    #[serde(default = "default_arrays")]
    pub arrays: u32,
    #[serde(default = "default_tile_texels")]
    pub tile_texels: u32,
}

fn default_tiles() -> u32 {
    16
}
fn default_arrays() -> u32 {
    1
}
fn default_tile_texels() -> u32 {
    32
}

impl Default for AtlasLayout {
    fn default() -> Self {
        Self {
            tiles_x: default_tiles(),
            tiles_y: default_tiles(),
            arrays: default_arrays(),
            tile_texels: default_tile_texels(),
        }
    }
}

impl AtlasLayout {
    pub fn new(tiles_x: u32, tiles_y: u32, arrays: u32) -> Result<Self, PackError> {
        let layout = Self {
            tiles_x,
            tiles_y,
            arrays,
            tile_texels: default_tile_texels(),
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Flat layout holding exactly `pages` tiles in a single row.
    pub fn linear(pages: u32) -> Result<Self, PackError> {
        Self::new(pages, 1, 1)
    }

    pub fn validate(&self) -> Result<(), PackError> {
        let pages = u64::from(self.tiles_x) * u64::from(self.tiles_y) * u64::from(self.arrays);
        if pages == 0 || pages > u64::from(MAX_PAGE_ID) {
            return Err(PackError::LayoutOutOfRange {
                tiles_x: self.tiles_x,
                tiles_y: self.tiles_y,
                arrays: self.arrays,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn tiles_per_array(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.tiles_per_array() * self.arrays
    }

    /// Deterministic decomposition of a page id; `None` if the id is beyond capacity.
    pub fn address(&self, page: PhysicalPageId) -> Option<PageAddress> {
        let index = page.get() - 1;
        if index >= self.capacity() {
            return None;
        }
        let per_array = self.tiles_per_array();
        let within = index % per_array;
        Some(PageAddress {
            array: index / per_array,
            tile_x: within % self.tiles_x,
            tile_y: within / self.tiles_x,
        })
    }

    /// Inverse of [`Self::address`].
    pub fn page_at(&self, addr: PageAddress) -> Option<PhysicalPageId> {
        if addr.array >= self.arrays || addr.tile_x >= self.tiles_x || addr.tile_y >= self.tiles_y
        {
            return None;
        }
        let index = addr.array * self.tiles_per_array() + addr.tile_y * self.tiles_x + addr.tile_x;
        PhysicalPageId::from_index(index).ok()
    }

    /// Texel origin of the page's tile inside its array layer.
    pub fn texel_origin(&self, page: PhysicalPageId) -> Option<(u32, u32, u32)> {
        self.address(page).map(|a| {
            (
                a.tile_x * self.tile_texels,
                a.tile_y * self.tile_texels,
                a.array,
            )
        })
    }
}
