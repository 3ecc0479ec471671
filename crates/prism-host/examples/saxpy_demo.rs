//! End-to-end host dispatch demo: y = a*x + y
//!
//! Registers a 1D saxpy kernel, launches it over a padded grid, and prints
//! the event's profiling timestamps.
//!
//! Run with: cargo run --example saxpy_demo

use prism_core::{AccessMode, BackendKind, ComputeContext, KernelSpecBuilder, TypeId};
use prism_host::{args, open_context, register_host_kernel, HostKernel, HostKernelFn};

fn main() -> prism_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    register_host_kernel("saxpy", |_ctx| {
        let spec = KernelSpecBuilder::new("saxpy")
            .add_dimension("i", "n", 64)?
            .add_parameter("x", "r", "f32[n]")?
            .add_parameter("y", "rw", "f32[n]")?
            .add_parameter("n", "r", "u32")?
            .add_parameter("a", "r", "f32")?
            .add_tuneable("blockSize", 64)?
            .add_constraint("blockSize", "<=", "1024", "reference block limit")?
            .set_grid_expression("[ceilDiv(n,blockSize)*blockSize]", "[blockSize]")?
            .allow_grid_padding()
            .finish()?;
        HostKernel::new(
            spec,
            HostKernelFn::one(|i, _range, args| {
                let n = args.scalar::<u32>(2)?;
                if i >= n {
                    return Ok(());
                }
                let x = args.slice::<f32>(0)?;
                let y = args.slice_mut::<f32>(1)?;
                let a = args.scalar::<f32>(3)?;
                y[i as usize] = a * x[i as usize] + y[i as usize];
                Ok(())
            }),
        )
    })?;

    let n = 100u32;
    let ctx = open_context(BackendKind::Host)?;
    let xs: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let ys = vec![1.0f32; n as usize];
    let x = ctx.upload(TypeId::new("f32"), bytemuck::cast_slice(&xs))?;
    let y = ctx.upload(TypeId::new("f32"), bytemuck::cast_slice(&ys))?;

    let kernel = ctx.kernel("saxpy")?;
    let bound = kernel.bind(
        "saxpy demo",
        vec![
            args::region(&x, AccessMode::ReadOnly),
            args::region(&y, AccessMode::ReadWrite),
            args::value(n)?,
            args::value(2.0f32)?,
        ],
    )?;

    let queue = ctx.queue();
    let event = queue.launch("saxpy demo", &bound, &[n], &[])?;
    event.wait()?;
    queue.finish();

    let out: Vec<f32> = bytemuck::pod_collect_to_vec(&ctx.download(&y)?);
    tracing::info!(first = out[0], last = out[n as usize - 1], "saxpy done");
    println!("y[0..4] = {:?}", &out[..4]);
    if let Some(profiling) = event.profiling() {
        println!("profiling = {}", serde_json::to_string(&profiling).unwrap_or_default());
    }
    Ok(())
}
