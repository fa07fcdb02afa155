use std::cell::RefCell;
use std::rc::Rc;

use strata_geom::ChunkCoord;
use strata_page::{AtlasLayout, PageFlags, PatchId};

use crate::{
    Field, FeedbackRequest, FrameWork, ResidencyConfig, ResidencyContext, VirtualPageAddr,
    VirtualSpaceConfig,
};

fn recording_context() -> (ResidencyContext, Rc<RefCell<Vec<(u32, u32, u32)>>>) {
    let writes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&writes);
    let ctx = ResidencyContext::new(Box::new(move |s: u32, i: u32, v: u32| {
        sink.borrow_mut().push((s, i, v))
    }));
    (ctx, writes)
}

fn small_config() -> ResidencyConfig {
    ResidencyConfig {
        near: AtlasLayout::linear(4).unwrap(),
        far: AtlasLayout::linear(4).unwrap(),
        surface: AtlasLayout::linear(8).unwrap(),
        virtual_space: VirtualSpaceConfig {
            chunk_slots: 2,
            pages_per_slot: 8,
        },
        ..ResidencyConfig::default()
    }
}

fn request(page: u32) -> FeedbackRequest {
    FeedbackRequest {
        chunk_slot: 0,
        virtual_page: page,
        patch: PatchId(page + 1),
    }
}

#[test]
fn unconfigured_context_is_inert() {
    let (mut ctx, writes) = recording_context();
    assert!(ctx.try_get_dispatch_state().is_none());
    assert_eq!(ctx.notify_all_dirty("boot"), 0);
    assert!(!ctx.try_clear_page_flags(VirtualPageAddr::new(0, 0), PageFlags::all()));
    let mut out = FrameWork::default();
    assert!(!ctx.process_feedback(&[request(0)], &mut out));
    assert!(ctx.chunks().is_none());
    assert!(writes.borrow().is_empty());
}

#[test]
fn configured_context_routes_writes() {
    let (mut ctx, writes) = recording_context();
    ctx.configure(&small_config()).unwrap();
    let mut out = FrameWork::default();
    assert!(ctx.process_feedback(&[request(2)], &mut out));
    assert_eq!(out.capture.len(), 1);
    assert_eq!(writes.borrow().len(), 1);

    ctx.mark_capture_dispatched(&out.capture);
    assert!(ctx.complete_capture(&out.capture[0]));
    let state = ctx.try_get_dispatch_state().unwrap();
    assert_eq!(state.pool.allocated_count(), 1);
    let addr = VirtualPageAddr::new(0, 2);
    assert_eq!(
        state.page_table[2].flags(),
        PageFlags::RESIDENT | PageFlags::NEEDS_RELIGHT
    );
    assert!(ctx.try_clear_page_flags(addr, PageFlags::NEEDS_RELIGHT));
    assert_eq!(ctx.notify_all_dirty("sky"), 1);
}

#[test]
fn reconfigure_keeps_listeners_and_releases_pages() {
    let (mut ctx, _) = recording_context();
    ctx.configure(&small_config()).unwrap();
    let released = Rc::new(RefCell::new(0usize));
    let counter = Rc::clone(&released);
    let chunks = ctx.chunks_mut().unwrap();
    chunks.add_listener(Box::new(move |_: &crate::PageRelease| *counter.borrow_mut() += 1));
    chunks.try_activate_chunk(Field::Near, ChunkCoord::new(0, 0, 0));
    chunks.try_activate_chunk(Field::Far, ChunkCoord::new(1, 0, 0));

    let mut bigger = small_config();
    bigger.near = AtlasLayout::linear(16).unwrap();
    ctx.configure(&bigger).unwrap();
    assert_eq!(*released.borrow(), 2);
    let chunks = ctx.chunks_mut().unwrap();
    assert_eq!(chunks.pool(Field::Near).capacity(), 16);
    chunks.try_activate_chunk(Field::Near, ChunkCoord::new(2, 0, 0));
    assert!(ctx.on_chunk_unloaded(ChunkCoord::new(2, 0, 0)));
    assert_eq!(*released.borrow(), 3);
}

#[test]
fn surface_change_resets_page_table() {
    let (mut ctx, writes) = recording_context();
    ctx.configure(&small_config()).unwrap();
    let mut out = FrameWork::default();
    ctx.process_feedback(&[request(0), request(1)], &mut out);
    writes.borrow_mut().clear();

    let mut cfg = small_config();
    cfg.surface = AtlasLayout::linear(32).unwrap();
    ctx.configure(&cfg).unwrap();
    assert_eq!(writes.borrow().len(), 2);
    assert!(writes.borrow().iter().all(|&(_, _, v)| v == 0));
    let state = ctx.try_get_dispatch_state().unwrap();
    assert_eq!(state.pool.capacity(), 32);
    assert_eq!(state.pool.allocated_count(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let (mut ctx, _) = recording_context();
    let mut cfg = small_config();
    cfg.virtual_space.chunk_slots = 0;
    assert!(ctx.configure(&cfg).is_err());
    assert!(!ctx.is_configured());

    let mut cfg = small_config();
    cfg.far.tiles_x = 0;
    assert!(matches!(
        ctx.configure(&cfg),
        Err(crate::ConfigError::Layout { which: "far", .. })
    ));
}
