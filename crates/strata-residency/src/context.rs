use strata_geom::ChunkCoord;
use strata_page::PageFlags;

use crate::chunks::ChunkResidencyManager;
use crate::config::{ConfigError, ResidencyConfig};
use crate::feedback::{
    CaptureWork, DispatchState, FeedbackRequest, FeedbackRequestProcessor, FrameWork,
    PageTableWriter, RelightWork, VirtualPageAddr,
};

struct Configured {
    config: ResidencyConfig,
    feedback: FeedbackRequestProcessor,
}

/// Renderer-facing entry point. Owned by the caller and passed by reference.
pub struct ResidencyContext {
    writer: Box<dyn PageTableWriter>,
    chunks: Option<ChunkResidencyManager>,
    configured: Option<Configured>,
}

impl ResidencyContext {
    pub fn new(writer: Box<dyn PageTableWriter>) -> Self {
        Self {
            writer,
            chunks: None,
            configured: None,
        }
    }

    #[inline]
    pub fn is_configured(&self) -> bool {
        self.configured.is_some()
    }

    pub fn config(&self) -> Option<&ResidencyConfig> {
        self.configured.as_ref().map(|c| &c.config)
    }

    /// Builds (or rebuilds) every pool. Existing mappings are released first and
    /// release listeners survive.
    pub fn configure(&mut self, config: &ResidencyConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if let Some(mut prev) = self.configured.take() {
            if prev.config.surface == config.surface
                && prev.config.virtual_space == config.virtual_space
            {
                prev.feedback.set_limits(config.feedback);
                prev.config = config.clone();
                self.configured = Some(prev);
            } else {
                prev.feedback.reset(self.writer.as_mut());
            }
        }
        if self.configured.is_none() {
            self.configured = Some(Configured {
                config: config.clone(),
                feedback: FeedbackRequestProcessor::new(
                    config.surface,
                    config.virtual_space,
                    config.feedback,
                ),
            });
        }
        match self.chunks.as_mut() {
            Some(chunks) => chunks.reconfigure(config.near, config.far),
            None => self.chunks = Some(ChunkResidencyManager::new(config.near, config.far)),
        }
        log::info!(
            target: "residency",
            "configured: near {} pages, far {} pages, surface {} pages, {}x{} virtual",
            config.near.capacity(),
            config.far.capacity(),
            config.surface.capacity(),
            config.virtual_space.chunk_slots,
            config.virtual_space.pages_per_slot
        );
        Ok(())
    }

    /// Queues every resident surface page for recapture and relight.
    pub fn notify_all_dirty(&mut self, reason: &str) -> usize {
        match self.configured.as_mut() {
            Some(c) => c.feedback.notify_all_dirty(reason),
            None => 0,
        }
    }

    pub fn try_get_dispatch_state(&self) -> Option<DispatchState<'_>> {
        self.configured.as_ref().map(|c| c.feedback.dispatch_state())
    }

    pub fn try_clear_page_flags(&mut self, addr: VirtualPageAddr, mask: PageFlags) -> bool {
        match self.configured.as_mut() {
            Some(c) => c.feedback.try_clear_page_flags(addr, mask, self.writer.as_mut()),
            None => false,
        }
    }

    pub fn try_set_page_flags(&mut self, addr: VirtualPageAddr, mask: PageFlags) -> bool {
        match self.configured.as_mut() {
            Some(c) => c.feedback.try_set_page_flags(addr, mask, self.writer.as_mut()),
            None => false,
        }
    }

    /// Runs one feedback pass into `out`. False when not yet configured.
    pub fn process_feedback(&mut self, requests: &[FeedbackRequest], out: &mut FrameWork) -> bool {
        match self.configured.as_mut() {
            Some(c) => {
                c.feedback.process(requests, self.writer.as_mut(), out);
                true
            }
            None => {
                out.clear();
                false
            }
        }
    }

    pub fn mark_capture_dispatched(&mut self, work: &[CaptureWork]) {
        if let Some(c) = self.configured.as_mut() {
            c.feedback.mark_capture_dispatched(work, self.writer.as_mut());
        }
    }

    pub fn complete_capture(&mut self, work: &CaptureWork) -> bool {
        match self.configured.as_mut() {
            Some(c) => c.feedback.complete_capture(work.addr, work.page, self.writer.as_mut()),
            None => false,
        }
    }

    pub fn mark_relight_dispatched(&mut self, work: &[RelightWork]) {
        if let Some(c) = self.configured.as_mut() {
            c.feedback.mark_relight_dispatched(work, self.writer.as_mut());
        }
    }

    pub fn complete_relight(&mut self, work: &RelightWork) -> bool {
        match self.configured.as_mut() {
            Some(c) => c.feedback.complete_relight(work.addr, work.page, self.writer.as_mut()),
            None => false,
        }
    }

    pub fn relight_priority(&self, out: &mut Vec<RelightWork>, max: usize) {
        match self.configured.as_ref() {
            Some(c) => c.feedback.relight_priority(out, max),
            None => out.clear(),
        }
    }

    pub fn release_slot(&mut self, chunk_slot: u32) -> usize {
        match self.configured.as_mut() {
            Some(c) => c.feedback.release_slot(chunk_slot, self.writer.as_mut()),
            None => 0,
        }
    }

    pub fn feedback(&self) -> Option<&FeedbackRequestProcessor> {
        self.configured.as_ref().map(|c| &c.feedback)
    }

    pub fn chunks(&self) -> Option<&ChunkResidencyManager> {
        self.chunks.as_ref()
    }

    pub fn chunks_mut(&mut self) -> Option<&mut ChunkResidencyManager> {
        self.chunks.as_mut()
    }

    pub fn on_chunk_unloaded(&mut self, chunk: ChunkCoord) -> bool {
        self.chunks
            .as_mut()
            .is_some_and(|m| m.on_chunk_unloaded(chunk))
    }

    pub fn reset(&mut self) {
        if let Some(chunks) = self.chunks.as_mut() {
            chunks.reset();
        }
        if let Some(c) = self.configured.as_mut() {
            c.feedback.reset(self.writer.as_mut());
        }
    }
}
