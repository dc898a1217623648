use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use labscan_core::{RoiLayout, SignalPipeline};
use labscan_traits::SequenceParams;

// Synthetic step: loading events in [0, load), a lost burst after load and
// an extraction peak around load + wait.
fn synth_events(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed.max(1);
    let mut unit = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    let mut v = Vec::with_capacity(n * 2);
    for _ in 0..n {
        v.push(unit() * 2.0);
        let fate = unit();
        if fate < 0.2 {
            v.push(2.0 + unit() * 5.0);
        } else if fate < 0.8 {
            v.push(50.0 + (unit() - 0.5) * 0.6);
        }
    }
    v
}

pub fn bench_extract(c: &mut Criterion) {
    let mut g = c.benchmark_group("extract");
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p labscan_core --bench extraction
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }

    let params = SequenceParams::default();
    for &n in &[1_000usize, 20_000, 200_000] {
        let events = synth_events(n, 0xC0FFEE);
        for &width in &[0.1f64, 0.5] {
            let pipeline = SignalPipeline {
                bin_width_us: width,
                margin_us: 100.0,
                layout: RoiLayout::default(),
            };
            g.bench_function(format!("events_{n}_bin_{width}"), |b| {
                b.iter_batched(
                    || events.clone(),
                    |ev| {
                        let out = pipeline.extract(black_box(&ev), black_box(&params));
                        black_box(out.map(|o| o.signals).ok());
                    },
                    BatchSize::LargeInput,
                )
            });
        }
    }
    g.finish();
}

criterion_group!(extraction, bench_extract);
criterion_main!(extraction);
