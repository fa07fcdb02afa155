use fastnoise_lite::{FastNoiseLite, NoiseType};
use strata_geom::RegionKey;
use strata_runtime::{CancelToken, ChunkSnapshotSource, RegionSnapshot};

use crate::config::TerrainConfig;

/// Heightfield terrain sampled at each region's level spacing.
pub struct NoiseTerrainSource {
    noise: FastNoiseLite,
    params: TerrainConfig,
    region_cells: u32,
}

impl NoiseTerrainSource {
    pub fn new(params: TerrainConfig, region_cells: u32) -> Self {
        let mut noise = FastNoiseLite::with_seed(params.seed);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_frequency(Some(params.height_frequency));
        Self {
            noise,
            params,
            region_cells,
        }
    }

    pub fn height_at(&self, wx: f32, wz: f32) -> f32 {
        self.params.base_height + self.noise.get_noise_2d(wx, wz) * self.params.amplitude
    }
}

impl ChunkSnapshotSource for NoiseTerrainSource {
    fn try_create_snapshot(
        &self,
        key: RegionKey,
        _expected_version: u64,
        cancel: &CancelToken,
    ) -> Option<RegionSnapshot> {
        let n = self.region_cells as i64;
        let spacing = 1i64 << key.level;
        let base = [
            i64::from(key.coord.x) * n,
            i64::from(key.coord.y) * n,
            i64::from(key.coord.z) * n,
        ];
        let len = (n * n * n) as usize;
        let mut cells = vec![0u8; len];
        // heights are per column, so sample once per (x, z)
        let mut heights = vec![0f32; (n * n) as usize];
        for lz in 0..n {
            if cancel.is_cancelled() {
                return None;
            }
            for lx in 0..n {
                let wx = ((base[0] + lx) * spacing + spacing / 2) as f32;
                let wz = ((base[2] + lz) * spacing + spacing / 2) as f32;
                heights[(lz * n + lx) as usize] = self.height_at(wx, wz);
            }
        }
        for lz in 0..n {
            for ly in 0..n {
                let wy = ((base[1] + ly) * spacing) as f32;
                for lx in 0..n {
                    if wy < heights[(lz * n + lx) as usize] {
                        cells[((lz * n + ly) * n + lx) as usize] = 1;
                    }
                }
            }
        }
        let edge = self.region_cells;
        Some(RegionSnapshot {
            dims: [edge; 3],
            cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_geom::CellPos;
    use strata_runtime::pack_occupancy;

    fn source() -> NoiseTerrainSource {
        NoiseTerrainSource::new(TerrainConfig::default(), 8)
    }

    #[test]
    fn deep_regions_are_solid_and_sky_is_empty() {
        let s = source();
        let cancel = CancelToken::new();
        let deep = s
            .try_create_snapshot(RegionKey::new(0, CellPos::new(0, -4, 0)), 0, &cancel)
            .unwrap();
        assert!(deep.cells.iter().all(|&c| c == 1));
        let sky = s
            .try_create_snapshot(RegionKey::new(0, CellPos::new(0, 20, 0)), 0, &cancel)
            .unwrap();
        assert!(sky.cells.iter().all(|&c| c == 0));
        let packed = pack_occupancy(RegionKey::default(), 0, &deep).unwrap();
        assert_eq!(packed.solid_cells, 512);
    }

    #[test]
    fn cancelled_extraction_yields_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(
            source()
                .try_create_snapshot(RegionKey::default(), 0, &cancel)
                .is_none()
        );
    }
}
