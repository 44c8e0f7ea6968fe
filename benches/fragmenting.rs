//! Benchmarks for the fragmenter.
//!
//! Measures fragment boundary search, duration estimation, and a full
//! in-memory run over synthetic audio/video files.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mp4frag_media::fixtures::{FixtureSample, FixtureTrack, ProgressiveFixture};
use mp4frag_media::fragment::{
    estimate_fragment_duration, find_fragment_end, BufferedSource, FragmentOptions, Fragmenter,
    SampleSource,
};
use mp4frag_media::mp4::SampleEntry;
use mp4frag_media::Mp4File;
use std::io::Cursor;

/// 24 fps video at 90 kHz with a sync sample every `gop` frames.
fn video_source(count: u32, gop: u32) -> SampleSource {
    let mut source = BufferedSource::new();
    for i in 0..count {
        source.append(SampleEntry {
            dts: i as u64 * 3750,
            duration: 3750,
            size: 1000,
            is_keyframe: i % gop == 0,
            ..Default::default()
        });
    }
    SampleSource::Buffered(source)
}

fn bench_boundary_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("boundary_search");

    for gop in [12, 48, 240] {
        let source = video_source(10_000, gop);
        group.bench_with_input(BenchmarkId::from_parameter(gop), &source, |b, source| {
            b.iter(|| find_fragment_end(black_box(source), 0, black_box(180_000)).unwrap())
        });
    }

    group.finish();
}

fn bench_estimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_fragment_duration");

    for gop in [1, 48, 240] {
        let source = video_source(10_000, gop);
        group.bench_with_input(BenchmarkId::from_parameter(gop), &source, |b, source| {
            b.iter(|| estimate_fragment_duration(black_box(source), 90000).unwrap())
        });
    }

    group.finish();
}

fn bench_full_run(c: &mut Criterion) {
    let input = ProgressiveFixture::new()
        .track(FixtureTrack::video(1, 90000).samples(FixtureSample::gop(1440, 48, 3750)))
        .track(FixtureTrack::audio(2, 48000).samples(FixtureSample::constant(2812, 1024)))
        .build();

    let mut group = c.benchmark_group("fragment");
    group.throughput(Throughput::Bytes(input.len() as u64));
    group.bench_function("one_minute_av", |b| {
        b.iter(|| {
            let mut reader = Cursor::new(black_box(&input));
            let file = Mp4File::parse(&mut reader).unwrap();
            let mut out = Vec::with_capacity(input.len() + 4096);
            Fragmenter::new(file, FragmentOptions::default())
                .run(&mut reader, &mut out)
                .unwrap();
            out
        });
    });

    group.finish();
}

criterion_group!(benches, bench_boundary_search, bench_estimation, bench_full_run);
criterion_main!(benches);
