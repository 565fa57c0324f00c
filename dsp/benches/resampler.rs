//! Resampler Throughput Benchmark
//!
//! Measures the two-stage resampler against the real-time requirement of
//! 2.5 MS/s sustained input.
//!
//! Run with:
//!   cargo bench -p dsp --bench resampler

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use dsp::{multi_tone, ToneSpec, TwoStageResampler};

fn bench_process(c: &mut Criterion) {
    let rate = 2_500_000.0;
    let tones = [
        ToneSpec {
            freq_hz: 67_000.0,
            amplitude: 0.5,
        },
        ToneSpec {
            freq_hz: -62_000.0,
            amplitude: 0.25,
        },
    ];

    let mut group = c.benchmark_group("resampler");
    for chunk in [32_768usize, 131_072] {
        let input = multi_tone(&tones, rate, chunk);
        let mut out = vec![num_complex::Complex32::new(0.0, 0.0); TwoStageResampler::max_output_len(chunk)];

        group.throughput(Throughput::Elements(chunk as u64));
        group.bench_function(format!("process_{}", chunk), |b| {
            let mut rs = TwoStageResampler::new();
            b.iter(|| {
                let produced = rs.process(black_box(&input), &mut out);
                black_box(produced);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_process);
criterion_main!(benches);
