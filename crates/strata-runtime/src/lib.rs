//! Region snapshot pipeline: versioned, deduplicated extraction on a worker pool.
#![forbid(unsafe_code)]

mod payload_cache;
mod pipeline;
mod snapshot;
mod version;

pub use payload_cache::{PayloadCache, PayloadCacheStats};
pub use pipeline::{
    EnqueueOutcome, PipelineConfig, PipelineError, PipelineStats, RegionSnapshotPipeline,
};
pub use snapshot::{
    CancelToken, ChunkSnapshotSource, PayloadError, RegionPayload, RegionSnapshot,
    pack_occupancy,
};
pub use version::{ChunkVersionProvider, RegionVersions};
