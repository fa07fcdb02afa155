//! Integer grid coordinates, packed chunk keys and region boxes (no GPU dependency).
#![forbid(unsafe_code)]

use core::ops::{Add, AddAssign, Sub};

/// Bits per axis lane in a packed chunk key.
pub const KEY_LANE_BITS: u32 = 21;
const KEY_LANE_MASK: u64 = (1 << KEY_LANE_BITS) - 1;

/// Smallest axis value that survives zig-zag packing.
pub const KEY_AXIS_MIN: i32 = -(1 << (KEY_LANE_BITS - 1));
/// Largest axis value that survives zig-zag packing.
pub const KEY_AXIS_MAX: i32 = (1 << (KEY_LANE_BITS - 1)) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("chunk axis {axis} = {value} outside packable range [{min}, {max}]", min = KEY_AXIS_MIN, max = KEY_AXIS_MAX)]
pub struct KeyRangeError {
    pub axis: char,
    pub value: i32,
}

#[inline]
fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

#[inline]
fn unzigzag(u: u32) -> i32 {
    ((u >> 1) as i32) ^ -((u & 1) as i32)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
}

impl ChunkCoord {
    #[inline]
    pub const fn new(cx: i32, cy: i32, cz: i32) -> Self {
        Self { cx, cy, cz }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            cx: self.cx + dx,
            cy: self.cy + dy,
            cz: self.cz + dz,
        }
    }

    #[inline]
    pub fn distance_sq(self, other: ChunkCoord) -> i64 {
        let dx = i64::from(self.cx - other.cx);
        let dy = i64::from(self.cy - other.cy);
        let dz = i64::from(self.cz - other.cz);
        dx * dx + dy * dy + dz * dz
    }

    /// Packs the coordinate into a 64-bit key: zig-zag per axis, 21-bit lanes
    /// (x in bits 0..21, y in 21..42, z in 42..63).
    pub fn try_pack_key(self) -> Result<u64, KeyRangeError> {
        let lane = |axis: char, value: i32| -> Result<u64, KeyRangeError> {
            if (KEY_AXIS_MIN..=KEY_AXIS_MAX).contains(&value) {
                Ok(u64::from(zigzag(value)))
            } else {
                Err(KeyRangeError { axis, value })
            }
        };
        let x = lane('x', self.cx)?;
        let y = lane('y', self.cy)?;
        let z = lane('z', self.cz)?;
        Ok(x | (y << KEY_LANE_BITS) | (z << (2 * KEY_LANE_BITS)))
    }

    #[inline]
    pub fn from_key(key: u64) -> Self {
        let lane = |shift: u32| unzigzag(((key >> shift) & KEY_LANE_MASK) as u32);
        Self {
            cx: lane(0),
            cy: lane(KEY_LANE_BITS),
            cz: lane(2 * KEY_LANE_BITS),
        }
    }

    /// Chunk containing the world cell, for chunks of `size` cells per axis.
    #[inline]
    pub fn containing(cell: CellPos, size: i32) -> Self {
        Self {
            cx: cell.x.div_euclid(size),
            cy: cell.y.div_euclid(size),
            cz: cell.z.div_euclid(size),
        }
    }
}

impl From<(i32, i32, i32)> for ChunkCoord {
    fn from(value: (i32, i32, i32)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

impl From<ChunkCoord> for (i32, i32, i32) {
    fn from(value: ChunkCoord) -> Self {
        (value.cx, value.cy, value.cz)
    }
}

/// Signed integer cell position (world cells, level cells or region coordinates).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellPos {
    pub const ZERO: CellPos = CellPos { x: 0, y: 0, z: 0 };

    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub const fn splat(v: i32) -> Self {
        Self { x: v, y: v, z: v }
    }

    /// Arithmetic right shift per axis; floors toward negative infinity.
    #[inline]
    pub fn shr_floor(self, bits: u32) -> Self {
        Self::new(self.x >> bits, self.y >> bits, self.z >> bits)
    }

    #[inline]
    pub fn div_floor(self, n: i32) -> Self {
        Self::new(self.x.div_euclid(n), self.y.div_euclid(n), self.z.div_euclid(n))
    }

    #[inline]
    pub fn to_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }

    #[inline]
    pub fn from_array(a: [i32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    #[inline]
    pub fn max_abs_component(self) -> i32 {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }
}

impl Add for CellPos {
    type Output = CellPos;
    #[inline]
    fn add(self, rhs: CellPos) -> CellPos {
        CellPos::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for CellPos {
    #[inline]
    fn add_assign(&mut self, rhs: CellPos) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for CellPos {
    type Output = CellPos;
    #[inline]
    fn sub(self, rhs: CellPos) -> CellPos {
        CellPos::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Half-open axis-aligned box of integer coordinates: `min <= p < max`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RegionBox {
    pub min: CellPos,
    pub max: CellPos,
}

impl RegionBox {
    #[inline]
    pub const fn new(min: CellPos, max: CellPos) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max.x <= self.min.x || self.max.y <= self.min.y || self.max.z <= self.min.z
    }

    #[inline]
    pub fn contains(&self, p: CellPos) -> bool {
        p.x >= self.min.x
            && p.x < self.max.x
            && p.y >= self.min.y
            && p.y < self.max.y
            && p.z >= self.min.z
            && p.z < self.max.z
    }

    pub fn volume(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let dx = (self.max.x - self.min.x) as usize;
        let dy = (self.max.y - self.min.y) as usize;
        let dz = (self.max.z - self.min.z) as usize;
        dx * dy * dz
    }

    pub fn intersect(&self, other: &RegionBox) -> RegionBox {
        RegionBox {
            min: CellPos::new(
                self.min.x.max(other.min.x),
                self.min.y.max(other.min.y),
                self.min.z.max(other.min.z),
            ),
            max: CellPos::new(
                self.max.x.min(other.max.x),
                self.max.y.min(other.max.y),
                self.max.z.min(other.max.z),
            ),
        }
    }

    /// Iterates every coordinate, x fastest, then y, then z.
    pub fn iter(&self) -> impl Iterator<Item = CellPos> + '_ {
        let b = *self;
        let (zs, ys, xs) = if b.is_empty() {
            (0..0, 0..0, 0..0)
        } else {
            (b.min.z..b.max.z, b.min.y..b.max.y, b.min.x..b.max.x)
        };
        zs.flat_map(move |z| {
            let xs = xs.clone();
            ys.clone()
                .flat_map(move |y| xs.clone().map(move |x| CellPos::new(x, y, z)))
        })
    }
}

/// Identity of one streamed region: clipmap level plus region coordinate at that level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey {
    pub level: u8,
    pub coord: CellPos,
}

impl RegionKey {
    #[inline]
    pub const fn new(level: u8, coord: CellPos) -> Self {
        Self { level, coord }
    }
}
