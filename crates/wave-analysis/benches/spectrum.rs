//! Criterion benchmarks for the spectral hot paths.
//!
//! Run with: cargo bench -p wave-analysis --bench spectrum

use std::f64::consts::PI;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use wave_analysis::{GodaAnalyzer, ProbeGeometry, SpectralProcessor, SpectrumOptions, Window};

fn tone(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| (2.0 * PI * 5.0 * i as f64 / 1000.0).sin())
        .collect()
}

/// Repeated transforms of one chunk length, the streaming case the plan
/// cache exists for.
fn spectrum_cached_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("spectrum");
    let processor = SpectralProcessor::new();
    let options = SpectrumOptions::new(Window::Hann);

    for n in [256, 1024, 4096, 16384] {
        let samples = tone(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("hann", n), &samples, |b, samples| {
            b.iter(|| processor.spectrum(black_box(samples), 1000.0, &options).unwrap());
        });
    }

    group.finish();
}

fn goda_three_probes(c: &mut Criterion) {
    let mut group = c.benchmark_group("goda");
    let geometry = ProbeGeometry::new(vec![0.0, 0.25, 0.6], 0.5).unwrap();
    let analyzer = GodaAnalyzer::default();

    for n in [1024, 8192] {
        let series = vec![tone(n); 3];
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("analyze", n), &series, |b, series| {
            b.iter(|| analyzer.analyze(black_box(series), 32.0, &geometry).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, spectrum_cached_plan, goda_three_probes);
criterion_main!(benches);
