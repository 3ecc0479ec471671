//! # prism-host - Reference Host Back-End
//!
//! The in-process CPU back-end of the Prism compute runtime. Kernel bodies
//! are plain Rust closures, queues execute them synchronously on the calling
//! thread, and every event is terminal by the time `launch` returns. The
//! marshalling performed here defines the semantics the device back-ends
//! must preserve.
//!
//! ## Usage
//!
//! ```
//! use prism_core::{AccessMode, BackendKind, ComputeContext, KernelSpecBuilder, TypeId};
//! use prism_host::{args, open_context, register_host_kernel, HostKernel, HostKernelFn};
//!
//! # fn main() -> prism_core::Result<()> {
//! // Register once at process start.
//! register_host_kernel("doc_scale", |_ctx| {
//!     let spec = KernelSpecBuilder::new("doc_scale")
//!         .add_dimension("i", "n", None)?
//!         .add_parameter("src", "r", "f32[n]")?
//!         .add_parameter("dst", "w", "f32[n]")?
//!         .add_parameter("n", "r", "u32")?
//!         .add_parameter("k", "r", "f32")?
//!         .finish()?;
//!     HostKernel::new(
//!         spec,
//!         HostKernelFn::one(|i, _r, args| {
//!             let src = args.slice::<f32>(0)?;
//!             let dst = args.slice_mut::<f32>(1)?;
//!             let k = args.scalar::<f32>(3)?;
//!             dst[i as usize] = src[i as usize] * k;
//!             Ok(())
//!         }),
//!     )
//! })?;
//!
//! // Launch against a host context.
//! let ctx = open_context(BackendKind::Host)?;
//! let src = ctx.upload(TypeId::new("f32"), bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]))?;
//! let dst = ctx.allocate(TypeId::new("f32"), 4)?;
//!
//! let kernel = ctx.kernel("doc_scale")?;
//! let bound = kernel.bind(
//!     "doc scale",
//!     vec![
//!         args::region(&src, AccessMode::ReadOnly),
//!         args::region(&dst, AccessMode::ReadWrite),
//!         args::value(4u32)?,
//!         args::value(0.5f32)?,
//!     ],
//! )?;
//! let event = ctx.queue().launch("doc scale", &bound, &[4], &[])?;
//! event.wait()?;
//!
//! let out: Vec<f32> = bytemuck::pod_collect_to_vec(&ctx.download(&dst)?);
//! assert_eq!(out, vec![0.5, 1.0, 1.5, 2.0]);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod handlers;
pub mod kernel;
pub mod memory;
pub mod queue;

// Re-export public API
pub use context::{open_context, HostContext};
pub use handlers::{PrimitiveArg, RegionArg};
pub use kernel::{HostKernel, HostKernelFn};
pub use memory::HostBuffer;
pub use queue::HostQueue;

/// Argument constructors for host calls
pub mod args {
    pub use crate::handlers::{region, value};
}

use prism_core::{register_kernel, BackendKind, ComputeContext, ComputeKernel, Result};
use std::sync::Arc;

/// Register a host kernel under its name
///
/// `build` runs once per context that materializes the kernel; it builds the
/// spec and pairs it with the entry body. Registration fails with
/// `AlreadyRegistered` if the name is taken for the host back-end.
pub fn register_host_kernel<F>(name: &str, build: F) -> Result<()>
where
    F: Fn(&dyn ComputeContext) -> Result<HostKernel> + Send + Sync + 'static,
{
    register_kernel(
        BackendKind::Host,
        name,
        Arc::new(move |ctx| {
            let kernel: Arc<dyn ComputeKernel> = Arc::new(build(ctx)?);
            Ok(kernel)
        }),
    )
}
