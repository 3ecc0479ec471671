//! Benchmarks for host dispatch overhead
//!
//! Measures the fixed cost of the dispatch layer itself: binding arguments
//! (marshalling + pin collection) and launching over trivial and 1D grids.
//! Kernel bodies are kept near-empty so the numbers isolate the runtime, not
//! the arithmetic.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use prism_core::{AccessMode, BackendKind, ComputeContext, KernelSpecBuilder, TypeId};
use prism_host::{args, open_context, register_host_kernel, HostKernel, HostKernelFn};

fn register_bench_kernels() {
    // Registration is process-wide; tolerate re-entry from multiple benches.
    let _ = register_host_kernel("bench_noop", |_ctx| {
        let spec = KernelSpecBuilder::new("bench_noop").finish()?;
        HostKernel::new(spec, HostKernelFn::zero(|_| Ok(())))
    });
    let _ = register_host_kernel("bench_scale", |_ctx| {
        let spec = KernelSpecBuilder::new("bench_scale")
            .add_dimension("i", "n", None)?
            .add_parameter("src", "r", "f32[n]")?
            .add_parameter("dst", "w", "f32[n]")?
            .add_parameter("n", "r", "u32")?
            .add_parameter("k", "r", "f32")?
            .set_grid_expression("[n]", "[1]")?
            .finish()?;
        HostKernel::new(
            spec,
            HostKernelFn::one(|i, _r, args| {
                let src = args.slice::<f32>(0)?;
                let dst = args.slice_mut::<f32>(1)?;
                let k = args.scalar::<f32>(3)?;
                dst[i as usize] = src[i as usize] * k;
                Ok(())
            }),
        )
    });
}

fn benchmark_bind_and_launch_noop(c: &mut Criterion) {
    register_bench_kernels();
    let ctx = open_context(BackendKind::Host).unwrap();
    let queue = ctx.queue();
    let kernel = ctx.kernel("bench_noop").unwrap();

    c.bench_function("bind_launch_noop", |bencher| {
        bencher.iter(|| {
            let bound = kernel.bind("bench", vec![]).unwrap();
            let event = queue.launch("bench", black_box(&bound), &[], &[]).unwrap();
            event.wait().unwrap();
        });
    });
}

fn benchmark_scale_1d(c: &mut Criterion) {
    register_bench_kernels();
    let ctx = open_context(BackendKind::Host).unwrap();
    let queue = ctx.queue();
    let kernel = ctx.kernel("bench_scale").unwrap();

    let mut group = c.benchmark_group("scale_1d");
    for size in [64u32, 1024, 16384] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bencher, &size| {
            let data = vec![1.0f32; size as usize];
            let src = ctx
                .upload(TypeId::new("f32"), bytemuck::cast_slice(&data))
                .unwrap();
            let dst = ctx.allocate(TypeId::new("f32"), size as usize).unwrap();

            bencher.iter(|| {
                let bound = kernel
                    .bind(
                        "bench",
                        vec![
                            args::region(&src, AccessMode::ReadOnly),
                            args::region(&dst, AccessMode::ReadWrite),
                            args::value(size).unwrap(),
                            args::value(0.5f32).unwrap(),
                        ],
                    )
                    .unwrap();
                queue
                    .launch("bench", &bound, &[size], &[])
                    .unwrap()
                    .wait()
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_bind_and_launch_noop, benchmark_scale_1d);
criterion_main!(benches);
