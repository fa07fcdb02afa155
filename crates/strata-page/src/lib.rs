//! Physical page ids, packed page-table entries and the fixed-capacity page pool.
#![forbid(unsafe_code)]

mod entry;
mod layout;
mod patch;
mod pool;

pub use entry::{MAX_PAGE_ID, PackedPageEntry, PageFlags, PhysicalPageId};
pub use layout::{AtlasLayout, PageAddress};
pub use patch::{PatchId, PatchKey, PatchTable};
pub use pool::PhysicalPagePool;

/// Violations of a fixed-width encoding. These indicate a logic error in the caller:
/// silently truncating would alias two distinct pages or patches.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    #[error("physical page id {id} outside 1..={max}", max = MAX_PAGE_ID)]
    PageIdOutOfRange { id: u32 },
    #[error("page flags {bits:#x} do not fit in 8 bits")]
    FlagsOverflow { bits: u32 },
    #[error("patch {field} = {value} exceeds {max}")]
    PatchFieldOverflow {
        field: &'static str,
        value: u32,
        max: u32,
    },
    #[error("atlas layout {tiles_x}x{tiles_y}x{arrays} is empty or exceeds {max} pages", max = MAX_PAGE_ID)]
    LayoutOutOfRange {
        tiles_x: u32,
        tiles_y: u32,
        arrays: u32,
    },
}
