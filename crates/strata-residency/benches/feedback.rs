use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;

use strata_geom::ChunkCoord;
use strata_page::{AtlasLayout, PatchId};
use strata_residency::{
    ChunkResidencyManager, FeedbackLimits, FeedbackRequest, FeedbackRequestProcessor, Field,
    FrameWork, VirtualSpaceConfig,
};

fn requests(count: u32, seed: u32) -> Vec<FeedbackRequest> {
    // xorshift so every frame asks for a different mix of hits and misses
    let mut s = seed | 1;
    (0..count)
        .map(|_| {
            s ^= s << 13;
            s ^= s >> 17;
            s ^= s << 5;
            FeedbackRequest {
                chunk_slot: s % 64,
                virtual_page: (s >> 8) % 64,
                patch: PatchId(s & 0xFFFF),
            }
        })
        .collect()
}

fn bench_feedback_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("feedback_pass");
    let frames: Vec<_> = (0..16).map(|i| requests(256, 0x9E37_79B9 ^ i)).collect();
    group.bench_function("1024_pages_256_requests", |b| {
        let mut p = FeedbackRequestProcessor::new(
            AtlasLayout::new(32, 32, 1).unwrap(),
            VirtualSpaceConfig::default(),
            FeedbackLimits::default(),
        );
        let mut out = FrameWork::default();
        let mut sink = |_: u32, _: u32, _: u32| {};
        let mut frame = 0usize;
        b.iter(|| {
            p.process(&frames[frame % frames.len()], &mut sink, &mut out);
            frame += 1;
            if frame % 8 == 0 {
                p.notify_all_dirty("bench");
            }
            black_box(out.capture.len());
        })
    });
    group.finish();
}

fn bench_chunk_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_churn");
    group.bench_function("256_near_512_far", |b| {
        let mut m = ChunkResidencyManager::new(
            AtlasLayout::linear(256).unwrap(),
            AtlasLayout::linear(512).unwrap(),
        );
        let mut t = 0i32;
        b.iter(|| {
            for i in 0..64 {
                let c = ChunkCoord::new(t + i, 0, (i * 7) % 13);
                let field = if i % 3 == 0 { Field::Far } else { Field::Near };
                black_box(m.try_activate_chunk(field, c));
            }
            t += 5;
        })
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(5));
    targets = bench_feedback_pass, bench_chunk_churn
}
criterion_main!(benches);
