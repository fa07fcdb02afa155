use hashbrown::HashMap;

use crate::PackError;

const FACE_BITS: u32 = 3;
const PLANE_BITS: u32 = 13;
const SUB_PATCH_BITS: u32 = 16;
const FACE_SHIFT: u32 = PLANE_BITS + SUB_PATCH_BITS;
const PLANE_SHIFT: u32 = SUB_PATCH_BITS;

pub const MAX_FACE: u32 = (1 << FACE_BITS) - 1;
pub const MAX_PLANE: u32 = (1 << PLANE_BITS) - 1;
pub const MAX_SUB_PATCH: u32 = (1 << SUB_PATCH_BITS) - 1;

/// Identity of a renderable surface unit, stable across frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PatchKey {
    /// Face/plane/sub-patch indices packed into one word.
    VoxelFace { packed: u32 },
    MeshCard { instance_id: u64, card_index: u32 },
}

impl PatchKey {
    pub fn voxel_face(face: u32, plane: u32, sub_patch: u32) -> Result<Self, PackError> {
        let check = |field: &'static str, value: u32, max: u32| {
            if value > max {
                Err(PackError::PatchFieldOverflow { field, value, max })
            } else {
                Ok(())
            }
        };
        check("face", face, MAX_FACE)?;
        check("plane", plane, MAX_PLANE)?;
        check("sub_patch", sub_patch, MAX_SUB_PATCH)?;
        Ok(PatchKey::VoxelFace {
            packed: (face << FACE_SHIFT) | (plane << PLANE_SHIFT) | sub_patch,
        })
    }

    #[inline]
    pub fn mesh_card(instance_id: u64, card_index: u32) -> Self {
        PatchKey::MeshCard {
            instance_id,
            card_index,
        }
    }

    /// `(face, plane, sub_patch)` for voxel-face patches.
    pub fn face_parts(&self) -> Option<(u32, u32, u32)> {
        match *self {
            PatchKey::VoxelFace { packed } => Some((
                packed >> FACE_SHIFT,
                (packed >> PLANE_SHIFT) & MAX_PLANE,
                packed & MAX_SUB_PATCH,
            )),
            PatchKey::MeshCard { .. } => None,
        }
    }
}

/// Compact handle carried through feedback requests; 0 means "no origin".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchId(pub u32);

impl PatchId {
    pub const NONE: PatchId = PatchId(0);

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Interns patch keys so GPU-visible ids map back to their origin without object identity.
#[derive(Default)]
pub struct PatchTable {
    ids: HashMap<PatchKey, PatchId>,
    keys: Vec<PatchKey>,
}

impl PatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, key: PatchKey) -> PatchId {
        if let Some(&id) = self.ids.get(&key) {
            return id;
        }
        self.keys.push(key);
        let id = PatchId(self.keys.len() as u32);
        self.ids.insert(key, id);
        id
    }

    pub fn get(&self, id: PatchId) -> Option<&PatchKey> {
        if id.is_none() {
            return None;
        }
        self.keys.get(id.0 as usize - 1)
    }

    pub fn id_of(&self, key: &PatchKey) -> Option<PatchId> {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.keys.clear();
    }
}
