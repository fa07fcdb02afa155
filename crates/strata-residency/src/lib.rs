//! Residency bookkeeping: chunk-to-page binding across Near/Far fields and
//! feedback-driven virtual page reconciliation.
#![forbid(unsafe_code)]

mod chunks;
mod config;
mod context;
mod feedback;

pub use chunks::{
    ActivatedPage, ChunkResidencyManager, Field, PageRelease, PageReleaseListener,
    ReleaseReason, ResidencyStats,
};
pub use config::{ConfigError, FeedbackLimits, ResidencyConfig, VirtualSpaceConfig};
pub use context::ResidencyContext;
pub use feedback::{
    CaptureWork, DispatchState, FeedbackRequest, FeedbackRequestProcessor, FeedbackStats,
    FrameWork, PageMappings, PageTableWriter, RelightWork, VirtualPageAddr,
};

#[cfg(test)]
mod tests;
