use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use hashbrown::HashMap;
use strata_clipmap::Clipmap;
use strata_geom::{CellPos, ChunkCoord};
use strata_page::{PatchKey, PatchTable};
use strata_residency::{
    FeedbackRequest, FeedbackStats, Field, FrameWork, PageRelease, RelightWork, ResidencyContext,
};
use strata_runtime::RegionSnapshotPipeline;

use crate::config::{ConfigError, StrataConfig};
use crate::terrain::NoiseTerrainSource;

/// Stand-in for the GPU copy of the virtual page table.
struct GpuPageTable {
    entries: Vec<u32>,
    pages_per_slot: u32,
    writes: u64,
}

impl GpuPageTable {
    fn new(slots: u32, pages_per_slot: u32) -> Self {
        Self {
            entries: vec![0; slots as usize * pages_per_slot as usize],
            pages_per_slot,
            writes: 0,
        }
    }

    fn write(&mut self, slot: u32, index: u32, packed: u32) {
        let i = slot as usize * self.pages_per_slot as usize + index as usize;
        if let Some(e) = self.entries.get_mut(i) {
            *e = packed;
        }
        self.writes += 1;
    }
}

/// Virtual chunk slots handed to Near chunks.
#[derive(Default)]
struct SlotTable {
    by_chunk: HashMap<ChunkCoord, u32>,
    free: Vec<u32>,
}

impl SlotTable {
    fn new(slots: u32) -> Self {
        Self {
            by_chunk: HashMap::new(),
            free: (0..slots).rev().collect(),
        }
    }

    fn assign(&mut self, chunk: ChunkCoord) -> Option<u32> {
        if let Some(&slot) = self.by_chunk.get(&chunk) {
            return Some(slot);
        }
        let slot = self.free.pop()?;
        self.by_chunk.insert(chunk, slot);
        Some(slot)
    }

    fn release(&mut self, chunk: ChunkCoord) -> Option<u32> {
        let slot = self.by_chunk.remove(&chunk)?;
        self.free.push(slot);
        Some(slot)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameReport {
    pub frame: u32,
    pub viewer: CellPos,
    pub exposed: usize,
    pub departed: usize,
    pub launched: usize,
    pub applied: usize,
    pub near_resident: usize,
    pub far_resident: usize,
    pub feedback: FeedbackStats,
}

#[derive(Clone, Copy, Debug, Default)]
struct Totals {
    frames: u64,
    applied: u64,
    solid_cells: u64,
    releases: u64,
    captures: u64,
    relights: u64,
}

/// Headless frame loop wiring clipmap, snapshot pipeline and residency together.
pub struct Simulator {
    cfg: StrataConfig,
    ctx: ResidencyContext,
    clipmap: Clipmap,
    source: Arc<NoiseTerrainSource>,
    pipeline: RegionSnapshotPipeline,
    patches: PatchTable,
    work: FrameWork,
    relight: Vec<RelightWork>,
    slots: SlotTable,
    active: HashMap<ChunkCoord, Field>,
    releases: Rc<RefCell<Vec<PageRelease>>>,
    gpu: Rc<RefCell<GpuPageTable>>,
    totals: Totals,
}

impl Simulator {
    pub fn new(cfg: StrataConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let vs = cfg.residency.virtual_space;
        let gpu = Rc::new(RefCell::new(GpuPageTable::new(vs.chunk_slots, vs.pages_per_slot)));
        let sink = Rc::clone(&gpu);
        let mut ctx = ResidencyContext::new(Box::new(move |slot: u32, index: u32, packed: u32| {
            sink.borrow_mut().write(slot, index, packed)
        }));
        ctx.configure(&cfg.residency)?;

        let releases = Rc::new(RefCell::new(Vec::new()));
        if let Some(chunks) = ctx.chunks_mut() {
            let log = Rc::clone(&releases);
            chunks.add_listener(Box::new(move |r: &PageRelease| log.borrow_mut().push(*r)));
        }

        let clipmap = Clipmap::new(cfg.clipmap)?;
        let source = Arc::new(NoiseTerrainSource::new(cfg.terrain, cfg.clipmap.region_size));
        let pipeline = RegionSnapshotPipeline::new(cfg.pipeline, source.clone())?;
        Ok(Self {
            slots: SlotTable::new(vs.chunk_slots),
            cfg,
            ctx,
            clipmap,
            source,
            pipeline,
            patches: PatchTable::new(),
            work: FrameWork::default(),
            relight: Vec::new(),
            active: HashMap::new(),
            releases,
            gpu,
            totals: Totals::default(),
        })
    }

    /// Scripted flight: forward along x, weaving in z, hovering above the terrain.
    pub fn viewer_cell(&self, frame: u32) -> CellPos {
        let t = frame as f32 * self.cfg.sim.speed;
        let x = t;
        let z = (t * 0.01).sin() * 96.0;
        let y = self.source.height_at(x, z) + 12.0;
        CellPos::new(x.floor() as i32, y.floor() as i32, z.floor() as i32)
    }

    pub fn step(&mut self, frame: u32) -> FrameReport {
        let viewer = self.viewer_cell(frame);
        let mut report = FrameReport {
            frame,
            viewer,
            ..FrameReport::default()
        };

        for update in self.clipmap.update(viewer) {
            for key in &update.departed {
                self.pipeline.forget(*key);
            }
            for key in &update.exposed {
                self.pipeline.enqueue(*key);
            }
            report.exposed += update.exposed.len();
            report.departed += update.departed.len();
        }
        report.launched = self.pipeline.dispatch(self.cfg.pipeline.dispatch_budget);
        let applied = self.pipeline.poll_completed(self.cfg.pipeline.poll_budget);
        report.applied = applied.len();
        self.totals.applied += applied.len() as u64;
        self.totals.solid_cells += applied.iter().map(|p| u64::from(p.solid_cells)).sum::<u64>();

        self.update_chunks(viewer);

        let requests = self.synthesize_feedback(frame);
        self.ctx.process_feedback(&requests, &mut self.work);
        report.feedback = self.work.stats;
        self.ctx.mark_capture_dispatched(&self.work.capture);
        for w in &self.work.capture {
            self.ctx.complete_capture(w);
        }
        self.totals.captures += self.work.capture.len() as u64;
        let relight_budget = self.cfg.residency.feedback.max_relight_work;
        self.ctx.relight_priority(&mut self.relight, relight_budget);
        self.ctx.mark_relight_dispatched(&self.relight);
        for w in &self.relight {
            self.ctx.complete_relight(w);
        }
        self.totals.relights += self.relight.len() as u64;

        if let Some(chunks) = self.ctx.chunks() {
            report.near_resident = chunks.resident_count(Field::Near);
            report.far_resident = chunks.resident_count(Field::Far);
        }
        self.totals.frames += 1;
        log::debug!(target: "residency", "{:?}", report);
        let every = self.cfg.sim.report_every.max(1);
        if frame % every == 0 {
            log::info!(
                "frame {} viewer {:?}: near {} far {}, regions +{} -{} applied {}, feedback {} alloc {} evict {} recapture",
                frame,
                viewer,
                report.near_resident,
                report.far_resident,
                report.exposed,
                report.departed,
                report.applied,
                report.feedback.allocated,
                report.feedback.evicted,
                report.feedback.recaptured
            );
        }
        report
    }

    fn update_chunks(&mut self, viewer: CellPos) {
        let sim = self.cfg.sim;
        let center = ChunkCoord::containing(viewer, sim.chunk_size);
        let mut wanted: Vec<(ChunkCoord, Field, i32)> = Vec::new();
        for dz in -sim.far_radius..=sim.far_radius {
            for dy in -1i32..=1 {
                for dx in -sim.far_radius..=sim.far_radius {
                    let ring = dx.abs().max(dz.abs()).max(dy.abs());
                    let field = if ring <= sim.near_radius {
                        Field::Near
                    } else {
                        Field::Far
                    };
                    wanted.push((center.offset(dx, dy, dz), field, ring));
                }
            }
        }
        wanted.sort_by_key(|&(_, _, ring)| ring);
        let near_requested = wanted.iter().filter(|w| w.1 == Field::Near).count();
        let far_requested = wanted.len() - near_requested;

        let keep: HashMap<ChunkCoord, Field> = wanted.iter().map(|&(c, f, _)| (c, f)).collect();
        let leaving: Vec<ChunkCoord> = self
            .active
            .keys()
            .filter(|c| !keep.contains_key(*c))
            .copied()
            .collect();
        for chunk in leaving {
            self.ctx.on_chunk_unloaded(chunk);
            self.active.remove(&chunk);
        }

        let Some(chunks) = self.ctx.chunks_mut() else {
            return;
        };
        for (chunk, field, _) in wanted {
            let requested = match field {
                Field::Near => near_requested,
                Field::Far => far_requested,
            };
            if chunks.try_activate_chunk_planned(field, chunk, requested).is_some() {
                self.active.insert(chunk, field);
            }
        }
        self.drain_releases();

        let near: Vec<ChunkCoord> = self
            .active
            .iter()
            .filter(|&(_, f)| *f == Field::Near)
            .map(|(c, _)| *c)
            .collect();
        for chunk in near {
            if self.slots.assign(chunk).is_none() {
                log::debug!(target: "residency", "no virtual slot left for {:?}", chunk);
            }
        }
    }

    /// Drops slots and activity of every chunk whose page was released.
    fn drain_releases(&mut self) {
        let events: Vec<PageRelease> = self.releases.borrow_mut().drain(..).collect();
        self.totals.releases += events.len() as u64;
        for event in events {
            if self.active.get(&event.chunk) == Some(&event.field) {
                self.active.remove(&event.chunk);
            }
            if event.field == Field::Near {
                if let Some(slot) = self.slots.release(event.chunk) {
                    self.ctx.release_slot(slot);
                }
            }
        }
    }

    fn synthesize_feedback(&mut self, frame: u32) -> Vec<FeedbackRequest> {
        let pages_per_slot = self.cfg.residency.virtual_space.pages_per_slot;
        let per_chunk = self.cfg.sim.requests_per_chunk;
        let mut slots: Vec<(ChunkCoord, u32)> =
            self.slots.by_chunk.iter().map(|(c, s)| (*c, *s)).collect();
        slots.sort_by_key(|&(_, s)| s);
        let mut requests = Vec::with_capacity(slots.len() * per_chunk as usize);
        for (chunk, slot) in slots {
            for i in 0..per_chunk {
                // stable for a few frames so repeated requests become touches
                let h = mix(chunk, frame / 8, i);
                let face = (h % 6) as u32;
                let plane = ((h >> 8) % 8192) as u32;
                let sub_patch = ((h >> 24) & 0xFFFF) as u32;
                let Ok(key) = PatchKey::voxel_face(face, plane, sub_patch) else {
                    continue;
                };
                requests.push(FeedbackRequest {
                    chunk_slot: slot,
                    virtual_page: ((h >> 40) % u64::from(pages_per_slot)) as u32,
                    patch: self.patches.intern(key),
                });
            }
        }
        requests
    }

    /// Applies a reloaded config, then marks every surface page and region dirty.
    pub fn reload(&mut self, cfg: StrataConfig) -> Result<(), ConfigError> {
        cfg.validate()?;
        self.ctx.configure(&cfg.residency)?;
        self.drain_releases();
        self.active.clear();
        let vs = cfg.residency.virtual_space;
        if vs != self.cfg.residency.virtual_space {
            self.slots = SlotTable::new(vs.chunk_slots);
            *self.gpu.borrow_mut() = GpuPageTable::new(vs.chunk_slots, vs.pages_per_slot);
        }
        if cfg.clipmap != self.cfg.clipmap || cfg.pipeline != self.cfg.pipeline {
            self.clipmap = Clipmap::new(cfg.clipmap)?;
            self.source = Arc::new(NoiseTerrainSource::new(cfg.terrain, cfg.clipmap.region_size));
            self.pipeline = RegionSnapshotPipeline::new(cfg.pipeline, self.source.clone())?;
        } else if cfg.terrain != self.cfg.terrain {
            self.source = Arc::new(NoiseTerrainSource::new(cfg.terrain, cfg.clipmap.region_size));
            self.pipeline.replace_source(self.source.clone());
        }
        self.cfg = cfg;
        let dirty = self.ctx.notify_all_dirty("config reload");
        self.pipeline.rebuild_all();
        log::info!("config applied; {} surface pages queued for recapture", dirty);
        Ok(())
    }

    pub fn log_summary(&self) {
        let t = self.totals;
        let ps = self.pipeline.stats();
        let cs = self.pipeline.cache_stats();
        log::info!(
            "{} frames: {} regions applied ({} solid cells), {} stale, {} failed, cache {}/{} hits",
            t.frames,
            t.applied,
            t.solid_cells,
            ps.stale,
            ps.failed_extractions,
            cs.hits,
            cs.hits + cs.misses
        );
        if let Some(chunks) = self.ctx.chunks() {
            let rs = chunks.stats();
            log::info!(
                "chunks: {} activations, {} reuses, {} transitions, {} evictions, {} failed, {} releases",
                rs.activations,
                rs.reuses,
                rs.transitions,
                rs.evictions,
                rs.failed,
                t.releases
            );
        }
        if let Some(fb) = self.ctx.feedback() {
            let f = fb.totals();
            log::info!(
                "feedback: {} requests, {} touched, {} allocated, {} evicted, {} deferred, {} recaptured; {} captures, {} relights, {} table writes",
                f.processed,
                f.touched,
                f.allocated,
                f.evicted,
                f.deferred,
                f.recaptured,
                t.captures,
                t.relights,
                self.gpu.borrow().writes
            );
        }
    }
}

fn mix(chunk: ChunkCoord, epoch: u32, i: u32) -> u64 {
    let mut h = chunk.try_pack_key().unwrap_or(0) ^ (u64::from(epoch) << 32) ^ u64::from(i);
    // splitmix64 finalizer
    h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^ (h >> 31)
}
