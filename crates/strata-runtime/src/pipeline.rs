use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use hashbrown::HashMap;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Deserialize;
use strata_geom::RegionKey;

use crate::payload_cache::{PayloadCache, PayloadCacheStats};
use crate::snapshot::{CancelToken, ChunkSnapshotSource, RegionPayload, pack_occupancy};
use crate::version::{ChunkVersionProvider, RegionVersions};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("snapshot worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("pipeline limit `{0}` must be greater than zero")]
    ZeroLimit(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct PipelineConfig {
    /// 0 picks the available parallelism.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_dispatch_budget")]
    pub dispatch_budget: usize,
    #[serde(default = "default_poll_budget")]
    pub poll_budget: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Cells per region edge; extraction failures fall back to an empty payload of this size.
    #[serde(default = "default_region_cells")]
    pub region_cells: u32,
}

fn default_max_in_flight() -> usize {
    64
}
fn default_dispatch_budget() -> usize {
    16
}
fn default_poll_budget() -> usize {
    32
}
fn default_cache_capacity() -> usize {
    256
}
fn default_region_cells() -> u32 {
    16
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_in_flight: default_max_in_flight(),
            dispatch_budget: default_dispatch_budget(),
            poll_budget: default_poll_budget(),
            cache_capacity: default_cache_capacity(),
            region_cells: default_region_cells(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_in_flight == 0 {
            return Err(PipelineError::ZeroLimit("max_in_flight"));
        }
        if self.region_cells == 0 {
            return Err(PipelineError::ZeroLimit("region_cells"));
        }
        Ok(())
    }

    fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .saturating_sub(1)
            .max(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Served from the payload cache; delivered by the next poll.
    Cached,
    AlreadyCurrent,
    InFlight,
    AlreadyPending,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub enqueued: u64,
    pub deduplicated: u64,
    pub dispatched: u64,
    pub applied: u64,
    pub stale: u64,
    pub failed_extractions: u64,
    pub cache_hits: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct InFlight {
    version: u64,
    job_id: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct KeyState {
    applied: Option<u64>,
    in_flight: Option<InFlight>,
    pending: bool,
}

struct JobOut {
    key: RegionKey,
    version: u64,
    job_id: u64,
    payload: RegionPayload,
    failed: bool,
}

/// Keeps one packed payload per region key current without redundant or stale work.
/// Extraction runs on a rayon pool; results are harvested by polling.
pub struct RegionSnapshotPipeline<V: ChunkVersionProvider = RegionVersions> {
    config: PipelineConfig,
    versions: V,
    source: Arc<dyn ChunkSnapshotSource>,
    pool: ThreadPool,
    res_tx: Sender<JobOut>,
    res_rx: Receiver<JobOut>,
    cancel: CancelToken,
    states: HashMap<RegionKey, KeyState>,
    pending: VecDeque<RegionKey>,
    ready: VecDeque<RegionPayload>,
    cache: PayloadCache,
    outstanding: usize,
    next_job_id: u64,
    stats: PipelineStats,
}

impl RegionSnapshotPipeline<RegionVersions> {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn ChunkSnapshotSource>,
    ) -> Result<Self, PipelineError> {
        Self::with_versions(config, source, RegionVersions::new())
    }
}

impl<V: ChunkVersionProvider> RegionSnapshotPipeline<V> {
    pub fn with_versions(
        config: PipelineConfig,
        source: Arc<dyn ChunkSnapshotSource>,
        versions: V,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let workers = config.worker_count();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("strata-snap-{i}"))
            .build()?;
        let (res_tx, res_rx) = unbounded::<JobOut>();
        log::info!(target: "pipeline", "snapshot pipeline: {} workers", workers);
        Ok(Self {
            config,
            versions,
            source,
            pool,
            res_tx,
            res_rx,
            cancel: CancelToken::new(),
            states: HashMap::new(),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            cache: PayloadCache::new(config.cache_capacity),
            outstanding: 0,
            next_job_id: 1,
            stats: PipelineStats::default(),
        })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn versions(&self) -> &V {
        &self.versions
    }

    #[inline]
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn cache_stats(&self) -> PayloadCacheStats {
        self.cache.stats()
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.outstanding
    }

    pub fn pending_len(&self) -> usize {
        self.states.values().filter(|s| s.pending).count()
    }

    pub fn tracked_len(&self) -> usize {
        self.states.len()
    }

    pub fn is_pending(&self, key: RegionKey) -> bool {
        self.states.get(&key).is_some_and(|s| s.pending)
    }

    pub fn applied_version(&self, key: RegionKey) -> Option<u64> {
        self.states.get(&key).and_then(|s| s.applied)
    }

    pub fn in_flight_version(&self, key: RegionKey) -> Option<u64> {
        self.states
            .get(&key)
            .and_then(|s| s.in_flight)
            .map(|f| f.version)
    }

    pub fn enqueue(&mut self, key: RegionKey) -> EnqueueOutcome {
        let version = self.versions.current_version(key);
        let st = self.states.entry(key).or_default();
        if st.applied == Some(version) {
            self.stats.deduplicated += 1;
            return EnqueueOutcome::AlreadyCurrent;
        }
        if st.in_flight.is_some_and(|f| f.version == version) {
            self.stats.deduplicated += 1;
            return EnqueueOutcome::InFlight;
        }
        if st.pending {
            self.stats.deduplicated += 1;
            return EnqueueOutcome::AlreadyPending;
        }
        if let Some(payload) = self.cache.get(key, version) {
            st.applied = Some(version);
            self.ready.push_back(payload);
            self.stats.cache_hits += 1;
            return EnqueueOutcome::Cached;
        }
        st.pending = true;
        self.pending.push_back(key);
        self.stats.enqueued += 1;
        EnqueueOutcome::Queued
    }

    /// Bumps the key's version. Tracked keys are re-queued unless a job is already
    /// out, in which case harvesting the stale result re-queues them.
    pub fn mark_dirty(&mut self, key: RegionKey) -> u64 {
        let version = self.versions.mark_dirty(key);
        let requeue = match self.states.get_mut(&key) {
            Some(st) => {
                st.applied = None;
                st.in_flight.is_none()
            }
            None => false,
        };
        if requeue {
            self.enqueue(key);
        }
        version
    }

    /// O(1) invalidation of every key, then re-queues everything tracked.
    pub fn rebuild_all(&mut self) {
        let generation = self.versions.bump_global_generation();
        self.cache.clear();
        let keys: Vec<RegionKey> = self.states.keys().copied().collect();
        let mut queued = 0usize;
        for key in keys {
            let idle = match self.states.get_mut(&key) {
                Some(st) => {
                    st.applied = None;
                    st.in_flight.is_none()
                }
                None => false,
            };
            if idle && self.enqueue(key) == EnqueueOutcome::Queued {
                queued += 1;
            }
        }
        log::info!(
            target: "pipeline",
            "rebuild all: generation {}, {} regions queued",
            generation,
            queued
        );
    }

    /// Swaps the extraction source. Follow with `rebuild_all` so nothing the old source
    /// produced stays applied.
    pub fn replace_source(&mut self, source: Arc<dyn ChunkSnapshotSource>) {
        self.source = source;
    }

    /// Stops tracking a key. A job still running for it is discarded on arrival.
    pub fn forget(&mut self, key: RegionKey) -> bool {
        self.states.remove(&key).is_some()
    }

    /// Launches pending keys at their current version. Returns how many were launched.
    pub fn dispatch(&mut self, budget: usize) -> usize {
        let mut launched = 0;
        while launched < budget && self.outstanding < self.config.max_in_flight {
            let Some(key) = self.pending.pop_front() else {
                break;
            };
            let version = self.versions.current_version(key);
            let Some(st) = self.states.get_mut(&key) else {
                continue;
            };
            if !st.pending {
                continue;
            }
            st.pending = false;
            if st.applied == Some(version) || st.in_flight.is_some_and(|f| f.version == version) {
                continue;
            }
            let job_id = self.next_job_id;
            self.next_job_id += 1;
            st.in_flight = Some(InFlight { version, job_id });
            self.spawn_job(key, version, job_id);
            launched += 1;
        }
        self.stats.dispatched += launched as u64;
        launched
    }

    fn spawn_job(&mut self, key: RegionKey, version: u64, job_id: u64) {
        let source = Arc::clone(&self.source);
        let tx = self.res_tx.clone();
        let cancel = self.cancel.clone();
        let edge = self.config.region_cells;
        self.outstanding += 1;
        self.pool.spawn(move || {
            let dims = [edge; 3];
            let snapshot = if cancel.is_cancelled() {
                None
            } else {
                source.try_create_snapshot(key, version, &cancel)
            };
            let packed = snapshot.map(|s| pack_occupancy(key, version, &s));
            let (payload, failed) = match packed {
                Some(Ok(p)) => (p, false),
                Some(Err(e)) => {
                    log::debug!(target: "pipeline", "{:?} v{:#x}: {}", key, version, e);
                    (RegionPayload::empty(key, version, dims), true)
                }
                None => (RegionPayload::empty(key, version, dims), true),
            };
            let _ = tx.send(JobOut {
                key,
                version,
                job_id,
                payload,
                failed,
            });
        });
    }

    /// Harvests finished work without blocking. Returns payloads to apply, at most `budget`.
    pub fn poll_completed(&mut self, budget: usize) -> Vec<RegionPayload> {
        let mut out = Vec::new();
        while out.len() < budget {
            match self.ready.pop_front() {
                Some(p) => out.push(p),
                None => break,
            }
        }
        while out.len() < budget {
            let Ok(res) = self.res_rx.try_recv() else {
                break;
            };
            self.outstanding = self.outstanding.saturating_sub(1);
            if let Some(payload) = self.harvest(res) {
                out.push(payload);
            }
        }
        out
    }

    fn harvest(&mut self, res: JobOut) -> Option<RegionPayload> {
        let current = self.versions.current_version(res.key);
        let Some(st) = self.states.get_mut(&res.key) else {
            self.stats.stale += 1;
            log::trace!(target: "pipeline", "{:?} job {} for forgotten key", res.key, res.job_id);
            return None;
        };
        let owns = st.in_flight.is_some_and(|f| f.job_id == res.job_id);
        if owns {
            st.in_flight = None;
        }
        if !owns || res.version != current {
            self.stats.stale += 1;
            log::trace!(
                target: "pipeline",
                "{:?} job {} stale (v{}, current v{})",
                res.key,
                res.job_id,
                res.version,
                current
            );
            self.enqueue(res.key);
            return None;
        }
        if res.failed {
            // empty for now; not recorded, so the next enqueue asks again
            self.stats.failed_extractions += 1;
            log::debug!(
                target: "pipeline",
                "{:?} extraction failed, delivering empty payload",
                res.key
            );
            return Some(res.payload);
        }
        st.applied = Some(res.version);
        self.stats.applied += 1;
        self.cache.insert(res.payload.clone());
        Some(res.payload)
    }
}

impl<V: ChunkVersionProvider> Drop for RegionSnapshotPipeline<V> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
