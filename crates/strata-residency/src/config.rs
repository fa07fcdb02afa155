use serde::Deserialize;
use strata_page::{AtlasLayout, PackError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{which} atlas: {source}")]
    Layout {
        which: &'static str,
        #[source]
        source: PackError,
    },
    #[error("virtual space needs at least one chunk slot and one page per slot")]
    EmptyVirtualSpace,
    #[error("virtual space of {slots} slots x {pages} pages does not fit in u32")]
    VirtualSpaceTooLarge { slots: u32, pages: u32 },
    #[error("feedback limit `{0}` must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Address space of the virtual page table: `chunk_slots` tables of `pages_per_slot` pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct VirtualSpaceConfig {
    #[serde(default = "default_chunk_slots")]
    pub chunk_slots: u32,
    #[serde(default = "default_pages_per_slot")]
    pub pages_per_slot: u32,
}

fn default_chunk_slots() -> u32 {
    64
}
fn default_pages_per_slot() -> u32 {
    64
}

impl Default for VirtualSpaceConfig {
    fn default() -> Self {
        Self {
            chunk_slots: default_chunk_slots(),
            pages_per_slot: default_pages_per_slot(),
        }
    }
}

impl VirtualSpaceConfig {
    #[inline]
    pub fn total_pages(&self) -> usize {
        self.chunk_slots as usize * self.pages_per_slot as usize
    }
}

/// Per-frame caps for the feedback pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct FeedbackLimits {
    #[serde(default = "default_max_requests")]
    pub max_requests_to_process: usize,
    #[serde(default = "default_max_new_allocations")]
    pub max_new_allocations: usize,
    #[serde(default = "default_max_work")]
    pub max_capture_work: usize,
    #[serde(default = "default_max_work")]
    pub max_relight_work: usize,
    #[serde(default = "default_max_recaptures")]
    pub max_recaptures_per_frame: usize,
}

fn default_max_requests() -> usize {
    256
}
fn default_max_new_allocations() -> usize {
    32
}
fn default_max_work() -> usize {
    64
}
fn default_max_recaptures() -> usize {
    32
}

impl Default for FeedbackLimits {
    fn default() -> Self {
        Self {
            max_requests_to_process: default_max_requests(),
            max_new_allocations: default_max_new_allocations(),
            max_capture_work: default_max_work(),
            max_relight_work: default_max_work(),
            max_recaptures_per_frame: default_max_recaptures(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ResidencyConfig {
    #[serde(default)]
    pub near: AtlasLayout,
    #[serde(default)]
    pub far: AtlasLayout,
    #[serde(default)]
    pub surface: AtlasLayout,
    #[serde(default)]
    pub virtual_space: VirtualSpaceConfig,
    #[serde(default)]
    pub feedback: FeedbackLimits,
}

impl ResidencyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (which, layout) in [
            ("near", &self.near),
            ("far", &self.far),
            ("surface", &self.surface),
        ] {
            layout
                .validate()
                .map_err(|source| ConfigError::Layout { which, source })?;
        }
        let vs = &self.virtual_space;
        if vs.chunk_slots == 0 || vs.pages_per_slot == 0 {
            return Err(ConfigError::EmptyVirtualSpace);
        }
        if vs.chunk_slots.checked_mul(vs.pages_per_slot).is_none() {
            return Err(ConfigError::VirtualSpaceTooLarge {
                slots: vs.chunk_slots,
                pages: vs.pages_per_slot,
            });
        }
        if self.feedback.max_requests_to_process == 0 {
            return Err(ConfigError::ZeroLimit("max_requests_to_process"));
        }
        Ok(())
    }
}
