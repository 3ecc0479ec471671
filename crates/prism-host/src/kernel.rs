//! Host kernels: the arity-shaped entry table and the inline dispatcher
//!
//! A host kernel body is a plain Rust closure. Its signature declares both
//! the grid arity (0 to 3 axes) and, per axis, whether the dispatcher feeds
//! it `(index, extent)` scalar pairs or hands over a [`GridRange`] the body
//! iterates itself (useful for tiled loops). The dispatcher iterates
//! lexicographically with axis 0 outermost; a tiled inner axis restarts for
//! every outer index.
//!
//! Bodies pull their arguments out of the [`Bindings`] by parameter
//! position:
//!
//! ```text
//! HostKernelFn::one(|i, _extent, args| {
//!     let src = args.slice::<f32>(0)?;
//!     let dst = args.slice_mut::<f32>(1)?;
//!     let k = args.scalar::<f32>(3)?;
//!     dst[i as usize] = src[i as usize] * k;
//!     Ok(())
//! })
//! ```

use prism_core::{
    bind_arguments, BackendKind, Bindings, BoundCallable, BoundKernel, ComputeKernel, Error,
    GridRange, KernelArg, KernelSpec, Result,
};
use std::sync::Arc;

type Body0 = dyn Fn(&Bindings) -> Result<()> + Send + Sync;
type Body1 = dyn Fn(u32, u32, &Bindings) -> Result<()> + Send + Sync;
type Body1T = dyn Fn(&mut GridRange, &Bindings) -> Result<()> + Send + Sync;
type Body2 = dyn Fn(u32, u32, u32, u32, &Bindings) -> Result<()> + Send + Sync;
type Body2IT = dyn Fn(u32, u32, &mut GridRange, &Bindings) -> Result<()> + Send + Sync;
type Body2TI = dyn Fn(&mut GridRange, u32, u32, &Bindings) -> Result<()> + Send + Sync;
type Body3IT = dyn Fn(u32, u32, u32, u32, &mut GridRange, &Bindings) -> Result<()> + Send + Sync;
type Body3TI = dyn Fn(&mut GridRange, u32, u32, u32, u32, &Bindings) -> Result<()> + Send + Sync;

/// A host kernel body, shaped by grid arity and per-axis delivery
///
/// `I` axes receive `(index, extent)` pairs from the dispatcher; `T` axes
/// receive a [`GridRange`] the body iterates itself.
pub enum HostKernelFn {
    /// No grid; the body runs once
    Zero(Box<Body0>),
    /// 1D, indexed
    One(Box<Body1>),
    /// 1D, tiled
    OneTiled(Box<Body1T>),
    /// 2D, indexed x indexed
    Two(Box<Body2>),
    /// 2D, indexed outer, tiled inner
    TwoInnerTiled(Box<Body2IT>),
    /// 2D, tiled outer, indexed inner
    TwoOuterTiled(Box<Body2TI>),
    /// 3D, indexed x indexed outer, tiled innermost
    ThreeInnerTiled(Box<Body3IT>),
    /// 3D, tiled outermost, indexed x indexed inner
    ThreeOuterTiled(Box<Body3TI>),
}

impl HostKernelFn {
    pub fn zero(f: impl Fn(&Bindings) -> Result<()> + Send + Sync + 'static) -> Self {
        Self::Zero(Box::new(f))
    }

    pub fn one(f: impl Fn(u32, u32, &Bindings) -> Result<()> + Send + Sync + 'static) -> Self {
        Self::One(Box::new(f))
    }

    pub fn one_tiled(
        f: impl Fn(&mut GridRange, &Bindings) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::OneTiled(Box::new(f))
    }

    pub fn two(
        f: impl Fn(u32, u32, u32, u32, &Bindings) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::Two(Box::new(f))
    }

    pub fn two_inner_tiled(
        f: impl Fn(u32, u32, &mut GridRange, &Bindings) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::TwoInnerTiled(Box::new(f))
    }

    pub fn two_outer_tiled(
        f: impl Fn(&mut GridRange, u32, u32, &Bindings) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::TwoOuterTiled(Box::new(f))
    }

    pub fn three_inner_tiled(
        f: impl Fn(u32, u32, u32, u32, &mut GridRange, &Bindings) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::ThreeInnerTiled(Box::new(f))
    }

    pub fn three_outer_tiled(
        f: impl Fn(&mut GridRange, u32, u32, u32, u32, &Bindings) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::ThreeOuterTiled(Box::new(f))
    }

    /// Grid arity this body expects
    pub fn arity(&self) -> usize {
        match self {
            HostKernelFn::Zero(_) => 0,
            HostKernelFn::One(_) | HostKernelFn::OneTiled(_) => 1,
            HostKernelFn::Two(_)
            | HostKernelFn::TwoInnerTiled(_)
            | HostKernelFn::TwoOuterTiled(_) => 2,
            HostKernelFn::ThreeInnerTiled(_) | HostKernelFn::ThreeOuterTiled(_) => 3,
        }
    }
}

/// A kernel spec paired with its host entry point
pub struct HostKernel {
    spec: Arc<KernelSpec>,
    entry: Arc<HostKernelFn>,
}

impl std::fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKernel")
            .field("spec", &self.spec.name())
            .finish()
    }
}

impl HostKernel {
    /// Pair a spec with its body
    ///
    /// # Errors
    ///
    /// `GridArityMismatch` when the body's arity differs from the spec's
    /// declared dimension count.
    pub fn new(spec: KernelSpec, entry: HostKernelFn) -> Result<Self> {
        if entry.arity() != spec.dims().len() {
            return Err(Error::GridArityMismatch {
                kernel: spec.name().to_string(),
                expected: spec.dims().len(),
                got: entry.arity(),
            });
        }
        Ok(Self {
            spec: Arc::new(spec),
            entry: Arc::new(entry),
        })
    }
}

impl ComputeKernel for HostKernel {
    fn spec(&self) -> &KernelSpec {
        &self.spec
    }

    fn bind(&self, op_name: &str, args: Vec<KernelArg>) -> Result<BoundKernel> {
        let (bindings, pins, env) =
            bind_arguments(&self.spec, BackendKind::Host, op_name, &args)?;
        Ok(BoundKernel::new(
            Arc::clone(&self.spec),
            bindings,
            pins,
            env,
            Arc::new(HostCallable {
                entry: Arc::clone(&self.entry),
            }),
        ))
    }
}

struct HostCallable {
    entry: Arc<HostKernelFn>,
}

impl BoundCallable for HostCallable {
    fn call(&self, grid: &mut [GridRange], bindings: &Bindings) -> Result<()> {
        match (&*self.entry, grid) {
            (HostKernelFn::Zero(f), []) => f(bindings),

            (HostKernelFn::One(f), [axis0]) => {
                let r0 = axis0.range();
                while let Some(i0) = axis0.next() {
                    f(i0, r0, bindings)?;
                }
                Ok(())
            }

            (HostKernelFn::OneTiled(f), [axis0]) => f(axis0, bindings),

            (HostKernelFn::Two(f), [axis0, axis1]) => {
                let (r0, r1) = (axis0.range(), axis1.range());
                let inner = axis1.clone();
                while let Some(i0) = axis0.next() {
                    let mut axis1 = inner.clone();
                    while let Some(i1) = axis1.next() {
                        f(i0, r0, i1, r1, bindings)?;
                    }
                }
                Ok(())
            }

            (HostKernelFn::TwoInnerTiled(f), [axis0, axis1]) => {
                let r0 = axis0.range();
                let inner = axis1.clone();
                while let Some(i0) = axis0.next() {
                    let mut axis1 = inner.clone();
                    f(i0, r0, &mut axis1, bindings)?;
                }
                Ok(())
            }

            (HostKernelFn::TwoOuterTiled(f), [axis0, axis1]) => {
                let r1 = axis1.range();
                let tiled = axis0.clone();
                while let Some(i1) = axis1.next() {
                    let mut axis0 = tiled.clone();
                    f(&mut axis0, i1, r1, bindings)?;
                }
                Ok(())
            }

            (HostKernelFn::ThreeInnerTiled(f), [axis0, axis1, axis2]) => {
                let (r0, r1) = (axis0.range(), axis1.range());
                let mid = axis1.clone();
                let inner = axis2.clone();
                while let Some(i0) = axis0.next() {
                    let mut axis1 = mid.clone();
                    while let Some(i1) = axis1.next() {
                        let mut axis2 = inner.clone();
                        f(i0, r0, i1, r1, &mut axis2, bindings)?;
                    }
                }
                Ok(())
            }

            (HostKernelFn::ThreeOuterTiled(f), [axis0, axis1, axis2]) => {
                let (r1, r2) = (axis1.range(), axis2.range());
                let tiled = axis0.clone();
                let inner = axis2.clone();
                while let Some(i1) = axis1.next() {
                    let mut axis2 = inner.clone();
                    while let Some(i2) = axis2.next() {
                        let mut axis0 = tiled.clone();
                        f(&mut axis0, i1, r1, i2, r2, bindings)?;
                    }
                }
                Ok(())
            }

            (entry, grid) => Err(Error::GridArityMismatch {
                kernel: String::new(),
                expected: entry.arity(),
                got: grid.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::KernelSpecBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn grid(extents: &[u32]) -> Vec<GridRange> {
        extents.iter().map(|&n| GridRange::new(0, n)).collect()
    }

    fn run(entry: HostKernelFn, extents: &[u32]) -> Result<()> {
        let callable = HostCallable {
            entry: Arc::new(entry),
        };
        let mut ranges = grid(extents);
        let bindings = empty_bindings();
        callable.call(&mut ranges, &bindings)
    }

    fn empty_bindings() -> Bindings {
        let spec = KernelSpecBuilder::new("probe").finish().unwrap();
        let (bindings, _, _) =
            bind_arguments(&spec, BackendKind::Host, "test", &[]).unwrap();
        bindings
    }

    #[test]
    fn test_zero_d_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        run(
            HostKernelFn::zero(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            &[],
        )
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_one_d_indexed_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        run(
            HostKernelFn::one(move |i, r, _| {
                assert_eq!(r, 4);
                s.lock().push(i);
                Ok(())
            }),
            &[4],
        )
        .unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_one_d_tiled_body_iterates() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        run(
            HostKernelFn::one_tiled(move |range, _| {
                let mut seen = s.lock();
                for i in range {
                    seen.push(i);
                }
                Ok(())
            }),
            &[3],
        )
        .unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_two_d_lexicographic() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        run(
            HostKernelFn::two(move |i0, _r0, i1, _r1, _| {
                s.lock().push((i0, i1));
                Ok(())
            }),
            &[2, 3],
        )
        .unwrap();
        assert_eq!(
            *seen.lock(),
            vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]
        );
    }

    #[test]
    fn test_two_d_inner_tiled_restarts() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        run(
            HostKernelFn::two_inner_tiled(move |i0, _r0, inner, _| {
                let collected: Vec<u32> = inner.collect();
                s.lock().push((i0, collected));
                Ok(())
            }),
            &[2, 3],
        )
        .unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (0, vec![0, 1, 2]));
        assert_eq!(seen[1], (1, vec![0, 1, 2]));
    }

    #[test]
    fn test_three_d_inner_tiled() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        run(
            HostKernelFn::three_inner_tiled(move |_i0, _r0, _i1, _r1, inner, _| {
                c.fetch_add(inner.count(), Ordering::SeqCst);
                Ok(())
            }),
            &[2, 3, 4],
        )
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 24);
    }

    #[test]
    fn test_body_error_stops_iteration() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let err = run(
            HostKernelFn::one(move |i, _r, _| {
                c.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    Err(Error::execution("body failed"))
                } else {
                    Ok(())
                }
            }),
            &[8],
        )
        .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_entry_arity_checked_against_spec() {
        let spec = KernelSpecBuilder::new("k")
            .add_dimension("i", "n", None)
            .unwrap()
            .add_parameter("n", "r", "u32")
            .unwrap()
            .finish()
            .unwrap();
        let err = HostKernel::new(spec, HostKernelFn::zero(|_| Ok(()))).unwrap_err();
        assert!(matches!(
            err,
            Error::GridArityMismatch {
                expected: 1,
                got: 0,
                ..
            }
        ));
    }
}
