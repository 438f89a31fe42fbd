//! Benchmarks for SPLV encoding and decoding.

use std::io::Cursor;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use splv::{Decoder, Encoder, EncodingParams, Frame, pack_rgb, work::default_pool};

/// Hollow sphere of radius `size / 4` voxels, shifted along x by `shift`.
fn sphere_frame(size: u32, shift: u32) -> Frame {
    let bricks = size / 8;
    let mut frame = Frame::new(bricks, bricks, bricks, 64).unwrap();
    let radius = size as f32 / 4.0;
    let center = size as f32 / 2.0;

    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                let dx = x as f32 - center - shift as f32;
                let dy = y as f32 - center;
                let dz = z as f32 - center;
                let dist = (dx * dx + dy * dy + dz * dz).sqrt();
                if (dist - radius).abs() > 1.0 {
                    continue;
                }

                let (bx, by, bz) = (x / 8, y / 8, z / 8);
                if frame.brick_at(bx, by, bz).is_none() {
                    frame.reserve_next_brick().unwrap().commit(bx, by, bz).unwrap();
                }
                let color = pack_rgb(x as u8, y as u8, z as u8);
                frame
                    .brick_at_mut(bx, by, bz)
                    .unwrap()
                    .set_voxel_filled(x % 8, y % 8, z % 8, color);
            }
        }
    }
    frame
}

fn encode(frames: &[Frame], size: u32, params: EncodingParams) -> Vec<u8> {
    let mut encoder = Encoder::from_writer(
        Cursor::new(Vec::new()),
        size,
        size,
        size,
        30.0,
        params,
        default_pool(),
    )
    .unwrap();
    for frame in frames {
        encoder.encode_frame(frame).unwrap();
    }
    encoder.finish_into_inner().unwrap().0.into_inner()
}

fn bench_keyframe_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyframe_encode");

    for size in [32, 64, 128] {
        let frames = vec![sphere_frame(size, 0)];
        let params = EncodingParams {
            gop_size: 1,
            ..Default::default()
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}^3", size)),
            &size,
            |b, &size| {
                b.iter(|| encode(black_box(&frames), size, params));
            },
        );
    }

    group.finish();
}

fn bench_delta_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_encode");
    group.sample_size(20);

    let size = 64;
    let frames: Vec<Frame> = (0..8).map(|t| sphere_frame(size, t)).collect();

    for motion_vectors in [false, true] {
        let params = EncodingParams {
            gop_size: 8,
            motion_vectors,
            ..Default::default()
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(if motion_vectors { "motion" } else { "no_motion" }),
            &params,
            |b, &params| {
                b.iter(|| encode(black_box(&frames), size, params));
            },
        );
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_sequence");

    for size in [32, 64, 128] {
        let frames: Vec<Frame> = (0..8).map(|t| sphere_frame(size, t)).collect();
        let params = EncodingParams {
            gop_size: 4,
            ..Default::default()
        };
        let bytes = encode(&frames, size, params);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}^3", size)),
            &bytes,
            |b, bytes| {
                b.iter(|| {
                    let mut decoder = Decoder::from_memory(bytes.clone()).unwrap();
                    for frame in decoder.frames() {
                        black_box(frame.unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_keyframe_encode, bench_delta_encode, bench_decode);
criterion_main!(benches);
