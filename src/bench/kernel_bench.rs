use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use matbench::kernels::BUILTIN_KERNELS;
use matbench::vectorized::{measure_native, measure_ndarray};
use matbench::{KernelRegistry, Matrix, invoke};

fn bench_kernels(c: &mut Criterion) {
    let registry = KernelRegistry::with_builtins().unwrap();
    let mut group = c.benchmark_group("invoke");

    for size in [64usize, 128, 256] {
        let (a, b) = Matrix::test_pair(size);
        group.throughput(Throughput::Elements((2 * size * size * size) as u64));

        for kernel in &BUILTIN_KERNELS {
            let descriptor = registry.lookup(kernel.name).unwrap();
            group.bench_with_input(BenchmarkId::new(kernel.name, size), &size, |bench, &size| {
                bench.iter(|| invoke(descriptor, black_box(&a), black_box(&b), size).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_in_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_process");

    for size in [64usize, 128, 256] {
        let (a, b) = Matrix::test_pair(size);
        group.bench_with_input(BenchmarkId::new("native", size), &size, |bench, &size| {
            bench.iter(|| measure_native(black_box(&a), black_box(&b), size).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("ndarray", size), &size, |bench, &size| {
            bench.iter(|| measure_ndarray(black_box(&a), black_box(&b), size).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_kernels, bench_in_process);
criterion_main!(benches);
