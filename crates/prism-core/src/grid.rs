//! Grid ranges and launch-grid planning
//!
//! A launch covers an N-dimensional rectangular index space. Each axis is
//! materialized as a [`GridRange`]: a half-open `[lo, hi)` cursor that yields
//! indices in ascending order, plus the axis's full extent for boundary
//! checks when padding is in effect.
//!
//! Planning resolves the kernel's grid expression in two phases: dimension
//! extents and tuneables yield integer values, then the global and local
//! expressions produce the absolute work count and block size per axis. With
//! `allow_grid_padding` the launched extent is rounded up to whole blocks and
//! work items past the logical extent are expected to return early; without
//! it, a global size that is not an exact block multiple is a
//! `GridMisalignment`.

use crate::error::{Error, Result};
use crate::expr::{ceil_div, Env};
use crate::spec::KernelSpec;

/// One axis of a launch: a half-open interval plus the full extent
#[derive(Clone, Debug)]
pub struct GridRange {
    next: u32,
    hi: u32,
    range: u32,
}

impl GridRange {
    /// An axis covering `[lo, hi)` with `hi` as its full extent
    pub fn new(lo: u32, hi: u32) -> Self {
        Self {
            next: lo,
            hi,
            range: hi,
        }
    }

    /// The full extent of this axis, independent of iteration progress
    pub fn range(&self) -> u32 {
        self.range
    }

    /// Remaining items
    pub fn len(&self) -> usize {
        (self.hi - self.next) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next >= self.hi
    }
}

impl Iterator for GridRange {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.next < self.hi {
            let i = self.next;
            self.next += 1;
            Some(i)
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len(), Some(self.len()))
    }
}

/// Resolve a launch request into per-axis ranges
///
/// `grid` carries the caller's logical extent per declared dimension and must
/// have exactly one entry per dimension; each dimension's name is bound to
/// its extent in the evaluation environment before the grid expression is
/// evaluated.
///
/// # Errors
///
/// - `GridArityMismatch` when `grid.len()` differs from the declared
///   dimension count
/// - `GridMisalignment` when padding is disallowed and an axis's global size
///   is not a multiple of its local size
/// - `ConstraintUnsatisfied` when a declared extent resolves to a different
///   value than the caller's grid entry
pub fn plan_grid(spec: &KernelSpec, env: &Env, grid: &[u32]) -> Result<Vec<GridRange>> {
    if grid.len() != spec.dims().len() {
        return Err(Error::GridArityMismatch {
            kernel: spec.name().to_string(),
            expected: spec.dims().len(),
            got: grid.len(),
        });
    }

    let mut env = env.clone();
    for (dim, &extent) in spec.dims().iter().zip(grid) {
        env.insert(dim.name.clone(), extent as i64);
    }

    let context = format!("grid of kernel {}", spec.name());
    let mut ranges = Vec::with_capacity(grid.len());
    for (axis, (dim, &extent)) in spec.dims().iter().zip(grid).enumerate() {
        // A declared extent that resolves must agree with the launch request.
        if dim.extent.is_resolvable(&env) {
            let declared = dim.extent.eval(&env, &context)?;
            if declared != extent as i64 {
                return Err(Error::ConstraintUnsatisfied {
                    kernel: spec.name().to_string(),
                    detail: format!(
                        "dimension {} declares extent {} = {declared}, launched with {extent}",
                        dim.name, dim.extent
                    ),
                });
            }
        }

        let (global, local) = match spec.grid_expression() {
            Some(expr) => {
                let global = expr.global[axis].eval(&env, &context)?;
                let local = expr.local[axis].eval(&env, &context)?;
                (global, local)
            }
            None => (extent as i64, dim.default_block.unwrap_or(1) as i64),
        };
        if global < 0 || local <= 0 {
            return Err(Error::InvalidExpression {
                context: context.clone(),
                detail: format!("axis {axis}: global {global}, local {local}"),
            });
        }
        let (global, local) = (global as u64, local as u64);

        let launched = if spec.allows_grid_padding() {
            ceil_div(global, local) * local
        } else {
            if global % local != 0 {
                return Err(Error::GridMisalignment {
                    axis,
                    global,
                    local,
                });
            }
            global
        };
        let launched = u32::try_from(launched).map_err(|_| Error::InvalidExpression {
            context: context.clone(),
            detail: format!("axis {axis}: {launched} work items overflow u32"),
        })?;
        ranges.push(GridRange::new(0, launched));
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::KernelSpecBuilder;

    fn padded_spec() -> KernelSpec {
        KernelSpecBuilder::new("zero")
            .add_dimension("i", "n", 64)
            .unwrap()
            .add_parameter("buf", "w", "u32[n]")
            .unwrap()
            .add_parameter("n", "r", "u32")
            .unwrap()
            .set_grid_expression("[ceilDiv(n,64)*64]", "[64]")
            .unwrap()
            .allow_grid_padding()
            .finish()
            .unwrap()
    }

    #[test]
    fn test_range_iterates_ascending() {
        let r = GridRange::new(2, 6);
        assert_eq!(r.range(), 6);
        assert_eq!(r.collect::<Vec<_>>(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_padding_rounds_up_to_blocks() {
        let spec = padded_spec();
        let mut env = spec.base_env();
        env.insert("n", 100);
        let ranges = plan_grid(&spec, &env, &[100]).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].range(), 128);
    }

    #[test]
    fn test_ceil_div_covers_global() {
        // ceilDiv(global, local) * local >= global, for a spread of shapes.
        for (global, local) in [(1u64, 64u64), (63, 64), (64, 64), (65, 64), (1000, 256)] {
            assert!(ceil_div(global, local) * local >= global);
        }
    }

    #[test]
    fn test_misalignment_without_padding() {
        let spec = KernelSpecBuilder::new("k")
            .add_dimension("i", "n", None)
            .unwrap()
            .add_parameter("n", "r", "u32")
            .unwrap()
            .set_grid_expression("[n]", "[64]")
            .unwrap()
            .finish()
            .unwrap();
        let mut env = spec.base_env();
        env.insert("n", 100);
        let err = plan_grid(&spec, &env, &[100]).unwrap_err();
        match err {
            Error::GridMisalignment {
                axis,
                global,
                local,
            } => {
                assert_eq!(axis, 0);
                assert_eq!(global, 100);
                assert_eq!(local, 64);
            }
            other => panic!("unexpected error: {other}"),
        }

        env.insert("n", 128);
        assert!(plan_grid(&spec, &env, &[128]).is_ok());
    }

    #[test]
    fn test_grid_arity_checked() {
        let spec = padded_spec();
        let mut env = spec.base_env();
        env.insert("n", 100);
        let err = plan_grid(&spec, &env, &[100, 1]).unwrap_err();
        assert!(matches!(
            err,
            Error::GridArityMismatch {
                expected: 1,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_declared_extent_disagreement() {
        let spec = padded_spec();
        let mut env = spec.base_env();
        env.insert("n", 100);
        // Dimension i declares extent n = 100; launching with 50 is a lie.
        let err = plan_grid(&spec, &env, &[50]).unwrap_err();
        assert!(matches!(err, Error::ConstraintUnsatisfied { .. }));
    }

    #[test]
    fn test_zero_dim_grid() {
        let spec = KernelSpecBuilder::new("k")
            .add_parameter("a", "r", "u32")
            .unwrap()
            .finish()
            .unwrap();
        assert!(plan_grid(&spec, &spec.base_env(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_default_block_without_grid_expression() {
        let spec = KernelSpecBuilder::new("k")
            .add_dimension("i", "n", 32)
            .unwrap()
            .add_parameter("n", "r", "u32")
            .unwrap()
            .finish()
            .unwrap();
        // 96 is a multiple of the default block of 32.
        let mut env = spec.base_env();
        env.insert("n", 96);
        let ranges = plan_grid(&spec, &env, &[96]).unwrap();
        assert_eq!(ranges[0].range(), 96);
    }
}
