//! # prism-core - Device-Agnostic Kernel Dispatch
//!
//! The core of the Prism compute runtime: how a kernel is described, how its
//! formal parameters are reconciled against caller-supplied arguments, and
//! how bound kernels are launched over an N-dimensional grid with events
//! coordinating completion.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Application                          │
//! │        (builds arguments, launches, awaits events)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     prism-core                           │
//! │  KernelSpec → bind(args) → BoundKernel → launch → Event  │
//! │  (registry, type descriptors, shape exprs, grid plans)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         ▼             ▼             ▼
//!   ┌─────────┐  ┌─────────┐  ┌─────────┐
//!   │  Host   │  │ OpenCL  │  │  Metal  │
//!   │ Backend │  │ Backend │  │ Backend │
//!   └─────────┘  └─────────┘  └─────────┘
//! ```
//!
//! One call flows: the caller wraps arguments in [`KernelArg`] handlers,
//! looks the kernel up through a [`ComputeContext`] (which consults the
//! process-wide registry), binds (`spec × args → BoundKernel + pins`), and
//! submits to a [`ComputeQueue`] with optional prerequisite events. The
//! returned [`ComputeEvent`] resolves when the kernel body has completed.
//!
//! Back-ends implement the [`ComputeContext`] / [`ComputeQueue`] /
//! [`ComputeEvent`] / [`ComputeKernel`] traits; no back-end ever observes
//! another back-end's handles (`BackendMismatch` is raised at bind time).
//! The reference host back-end lives in the `prism-host` crate and defines
//! the marshalling semantics the device back-ends must preserve.

pub mod argument;
pub mod bind;
pub mod context;
pub mod error;
pub mod event;
pub mod expr;
pub mod grid;
pub mod kernel;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod spec;
pub mod types;

// Re-export public API
pub use argument::{ArgumentHandler, Capability, ConstRange, KernelArg, MutRange, RegionPin};
pub use bind::{bind_arguments, Binding, Bindings, BoundCallable, BoundKernel};
pub use context::ComputeContext;
pub use error::{Error, Result};
pub use event::{ComputeEvent, EventCell, EventState, ProfilingInfo};
pub use expr::{ceil_div, Env, ShapeExpr};
pub use grid::{plan_grid, GridRange};
pub use kernel::ComputeKernel;
pub use memory::{BackendKind, DeviceBuffer, MemoryHandle};
pub use queue::{ComputeQueue, FillInit, QueueState, FILL_TO_END};
pub use registry::{lookup_kernel, register_kernel, registered_kernels, KernelFactory};
pub use spec::{
    AccessMode, Constraint, ConstraintOp, Dimension, FormalParameter, GridExpression, KernelSpec,
    KernelSpecBuilder, ParamShape,
};
pub use types::{
    lookup_type, register_type, ScalarRepr, ScalarValue, TypeDescriptor, TypeId,
};
