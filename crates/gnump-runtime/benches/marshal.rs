//! Marshalling and call overhead benchmarks
//!
//! Measures:
//! - Region bump allocation of f64 arrays at several sizes
//! - String marshalling through a bridge call
//! - Receiver-returning method calls through the identity cache

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gnump_config::BridgeConfig;
use gnump_runtime::engine::{reference, LinearEngine};
use gnump_runtime::marshal::MarshalRegion;
use gnump_runtime::{args, Bridge};

fn bench_region_arrays(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_f64_array");
    for len in [1usize, 64, 1024] {
        let values: Vec<f64> = (0..len).map(|i| i as f64 * 0.5).collect();
        group.throughput(Throughput::Bytes((len * 8) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &values, |b, values| {
            let engine = LinearEngine::new(1, 64).unwrap();
            let mut region = MarshalRegion::new(128);
            b.iter(|| {
                region.prepare(&engine).unwrap();
                black_box(region.write_elements(&engine, values).unwrap());
            });
        });
    }
    group.finish();
}

fn reference_bridge() -> Bridge {
    let config = BridgeConfig::default();
    Bridge::new(reference::engine(&config).unwrap(), &config)
        .unwrap()
        .with_numeric_classes()
        .unwrap()
}

fn bench_string_argument(c: &mut Criterion) {
    let bridge = reference_bridge();
    let x = bridge.float(0.0).unwrap();
    c.bench_function("call_set_string", |b| {
        b.iter(|| {
            bridge
                .call(&x, "set_string", &args![black_box("3.14159265358979"), 10])
                .unwrap()
        })
    });
}

fn bench_chained_method(c: &mut Criterion) {
    let bridge = reference_bridge();
    let x = bridge.float(1.0).unwrap();
    c.bench_function("call_chain_mul_d", |b| {
        b.iter(|| bridge.call(&x, "mul_d", &args![black_box(1.0)]).unwrap())
    });
}

criterion_group!(
    benches,
    bench_region_arrays,
    bench_string_argument,
    bench_chained_method
);
criterion_main!(benches);
