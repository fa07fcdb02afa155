use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use strata_geom::RegionKey;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("snapshot holds {got} cells, dims {dims:?} need {expected}")]
    SizeMismatch {
        dims: [u32; 3],
        expected: usize,
        got: usize,
    },
}

/// Raised once when the owning pipeline goes away; sources may poll it to bail early.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Raw cell data for one region, x fastest then y then z. Zero is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionSnapshot {
    pub dims: [u32; 3],
    pub cells: Vec<u8>,
}

/// Produces region snapshots on worker threads.
pub trait ChunkSnapshotSource: Send + Sync {
    fn try_create_snapshot(
        &self,
        key: RegionKey,
        expected_version: u64,
        cancel: &CancelToken,
    ) -> Option<RegionSnapshot>;
}

/// Bit-packed occupancy for one region at one version, ready for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionPayload {
    pub key: RegionKey,
    pub version: u64,
    pub dims: [u32; 3],
    pub words: Arc<[u32]>,
    pub solid_cells: u32,
}

#[inline]
fn cell_count(dims: [u32; 3]) -> usize {
    dims[0] as usize * dims[1] as usize * dims[2] as usize
}

pub fn pack_occupancy(
    key: RegionKey,
    version: u64,
    snapshot: &RegionSnapshot,
) -> Result<RegionPayload, PayloadError> {
    let expected = cell_count(snapshot.dims);
    if snapshot.cells.len() != expected {
        return Err(PayloadError::SizeMismatch {
            dims: snapshot.dims,
            expected,
            got: snapshot.cells.len(),
        });
    }
    let mut words = vec![0u32; expected.div_ceil(32)];
    let mut solid_cells = 0u32;
    for (i, &c) in snapshot.cells.iter().enumerate() {
        if c != 0 {
            words[i / 32] |= 1 << (i % 32);
            solid_cells += 1;
        }
    }
    Ok(RegionPayload {
        key,
        version,
        dims: snapshot.dims,
        words: words.into(),
        solid_cells,
    })
}

impl RegionPayload {
    /// All-empty payload applied when extraction fails.
    pub fn empty(key: RegionKey, version: u64, dims: [u32; 3]) -> Self {
        Self {
            key,
            version,
            dims,
            words: vec![0u32; cell_count(dims).div_ceil(32)].into(),
            solid_cells: 0,
        }
    }

    pub fn is_solid(&self, x: u32, y: u32, z: u32) -> bool {
        if x >= self.dims[0] || y >= self.dims[1] || z >= self.dims[2] {
            return false;
        }
        let i = ((z as usize * self.dims[1] as usize) + y as usize) * self.dims[0] as usize
            + x as usize;
        self.words[i / 32] & (1 << (i % 32)) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.solid_cells == 0
    }
}
