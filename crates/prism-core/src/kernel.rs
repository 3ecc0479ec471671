//! The kernel trait back-ends implement
//!
//! A [`ComputeKernel`] is a spec materialized for one device context: its
//! entry point has been resolved (a compiled program for device back-ends, a
//! function table entry for the host) and it can bind caller arguments into
//! a launchable [`BoundKernel`].

use crate::argument::KernelArg;
use crate::bind::BoundKernel;
use crate::error::Result;
use crate::spec::KernelSpec;

/// A kernel materialized for one context
pub trait ComputeKernel: Send + Sync + std::fmt::Debug {
    /// The static description of this kernel
    fn spec(&self) -> &KernelSpec;

    /// Reconcile caller arguments with the formal parameters
    ///
    /// Every formal parameter gets exactly one binding; pins collected while
    /// binding travel with the returned value. Failures surface before any
    /// work is enqueued, with no pin or handle count leaked.
    fn bind(&self, op_name: &str, args: Vec<KernelArg>) -> Result<BoundKernel>;
}
