use core::fmt;
use core::num::NonZeroU32;

use crate::PackError;

pub const PAGE_ID_BITS: u32 = 24;
pub const PAGE_ID_MASK: u32 = (1 << PAGE_ID_BITS) - 1;
pub const FLAGS_SHIFT: u32 = PAGE_ID_BITS;
pub const FLAGS_MASK: u32 = 0xFF;

/// Largest representable physical page id (ids are 1-based, 0 means unmapped).
pub const MAX_PAGE_ID: u32 = PAGE_ID_MASK;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PageFlags: u8 {
        const RESIDENT = 0x01;
        const NEEDS_CAPTURE = 0x02;
        const NEEDS_RELIGHT = 0x04;
        const CAPTURING = 0x08;
        const RELIGHTING = 0x10;
    }
}

impl PageFlags {
    /// Flags written for a page that was just bound to a virtual address.
    pub const FRESH: PageFlags = PageFlags::RESIDENT
        .union(PageFlags::NEEDS_CAPTURE)
        .union(PageFlags::NEEDS_RELIGHT);
    pub const STALE: PageFlags = PageFlags::NEEDS_CAPTURE.union(PageFlags::NEEDS_RELIGHT);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalPageId(NonZeroU32);

impl PhysicalPageId {
    pub fn new(raw: u32) -> Result<Self, PackError> {
        match NonZeroU32::new(raw) {
            Some(nz) if raw <= MAX_PAGE_ID => Ok(Self(nz)),
            _ => Err(PackError::PageIdOutOfRange { id: raw }),
        }
    }

    /// Id for a zero-based slot index.
    pub fn from_index(index: u32) -> Result<Self, PackError> {
        Self::new(index.saturating_add(1))
    }

    /// Callers guarantee `index < MAX_PAGE_ID` (pool layouts are validated up front).
    #[inline]
    pub(crate) fn from_slot(index: u32) -> Self {
        Self(NonZeroU32::MIN.saturating_add(index))
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Display for PhysicalPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// One page-table word: physical page id in bits 0..24, flags in bits 24..32.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PackedPageEntry(u32);

impl PackedPageEntry {
    pub const UNMAPPED: PackedPageEntry = PackedPageEntry(0);

    #[inline]
    pub fn new(page: PhysicalPageId, flags: PageFlags) -> Self {
        Self(page.get() | (u32::from(flags.bits()) << FLAGS_SHIFT))
    }

    /// Checked packing from raw parts. Page 0 packs to [`Self::UNMAPPED`] whatever the
    /// flags, since flags on an unmapped entry carry no meaning.
    pub fn pack(page: u32, flags: u32) -> Result<Self, PackError> {
        if page > MAX_PAGE_ID {
            return Err(PackError::PageIdOutOfRange { id: page });
        }
        if flags > FLAGS_MASK {
            return Err(PackError::FlagsOverflow { bits: flags });
        }
        if page == 0 {
            return Ok(Self::UNMAPPED);
        }
        Ok(Self(page | (flags << FLAGS_SHIFT)))
    }

    /// Raw `(page, flags)`; flags read as 0 for unmapped entries.
    #[inline]
    pub fn unpack(self) -> (u32, u32) {
        let page = self.0 & PAGE_ID_MASK;
        if page == 0 {
            (0, 0)
        } else {
            (page, (self.0 >> FLAGS_SHIFT) & FLAGS_MASK)
        }
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_mapped(self) -> bool {
        self.0 & PAGE_ID_MASK != 0
    }

    #[inline]
    pub fn physical_page(self) -> Option<PhysicalPageId> {
        NonZeroU32::new(self.0 & PAGE_ID_MASK).map(PhysicalPageId)
    }

    #[inline]
    pub fn flags(self) -> PageFlags {
        if self.is_mapped() {
            PageFlags::from_bits_retain((self.0 >> FLAGS_SHIFT) as u8)
        } else {
            PageFlags::empty()
        }
    }

    #[inline]
    pub fn with_flags(self, flags: PageFlags) -> Self {
        match self.physical_page() {
            Some(page) => Self::new(page, flags),
            None => Self::UNMAPPED,
        }
    }

    #[inline]
    pub fn insert_flags(self, flags: PageFlags) -> Self {
        self.with_flags(self.flags() | flags)
    }

    #[inline]
    pub fn remove_flags(self, flags: PageFlags) -> Self {
        self.with_flags(self.flags() - flags)
    }
}

impl fmt::Debug for PackedPageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.physical_page() {
            Some(page) => write!(f, "PackedPageEntry({page}, {:?})", self.flags()),
            None => write!(f, "PackedPageEntry(unmapped)"),
        }
    }
}
