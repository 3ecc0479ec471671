//! The binder: reconciling caller arguments with formal parameters
//!
//! Binding walks the formal parameter list and, for each parameter, selects
//! an extraction strategy from the parameter's shape and access mode combined
//! with the handler's capabilities:
//!
//! | formal shape          | extraction          | binding       | pin  |
//! |-----------------------|---------------------|---------------|------|
//! | scalar `T`            | primitive           | typed value   | none |
//! | array `T[n]`, writable| mutable range       | mutable span  | kept |
//! | array `T[n]`, read    | const range         | const span    | kept |
//! | array `T[n]`, no range| device handle       | handle        | none |
//!
//! Scalars are copied through the argument's type descriptor (so lossless
//! conversions apply); spans and handles require an exact element-type match.
//! Any failure discards every pin accumulated so far and surfaces an error
//! annotated with the kernel name and the failing parameter's index and name.

use crate::argument::{Capability, KernelArg, RegionPin};
use crate::error::{raw, Error, Result};
use crate::expr::Env;
use crate::grid::GridRange;
use crate::memory::{BackendKind, MemoryHandle};
use crate::spec::{KernelSpec, ParamShape};
use crate::types::{ScalarRepr, ScalarValue, TypeDescriptor};
use std::slice::{from_raw_parts, from_raw_parts_mut};
use std::sync::Arc;

/// One bound argument
pub enum Binding {
    /// A primitive copied into the formal parameter's type
    Scalar(ScalarValue),
    /// A zero-copy device handle
    Handle(MemoryHandle),
    /// A pinned read-only span
    ConstSpan {
        ptr: *const u8,
        len_elems: usize,
        elem: TypeDescriptor,
    },
    /// A pinned mutable span
    MutSpan {
        ptr: *mut u8,
        len_elems: usize,
        elem: TypeDescriptor,
    },
}

impl Binding {
    fn len_elems(&self) -> Option<usize> {
        match self {
            Binding::Scalar(_) => None,
            Binding::Handle(h) => h.elem_count(lookup_size(h)?).ok(),
            Binding::ConstSpan { len_elems, .. } | Binding::MutSpan { len_elems, .. } => {
                Some(*len_elems)
            }
        }
    }
}

fn lookup_size(h: &MemoryHandle) -> Option<usize> {
    crate::types::lookup_type(h.elem().name())
        .ok()
        .map(|d| d.size())
}

/// The typed bindings of a bound kernel, indexed by parameter position
///
/// Kernel bodies pull their arguments out with the typed accessors. Spans
/// hand out references built from the pinned pointers; the pins held by the
/// owning [`BoundKernel`] keep them valid for the duration of the call, and
/// the queue serializes kernel execution, so a body must simply not request
/// the same writable slot twice at once.
pub struct Bindings {
    kernel: String,
    slots: Vec<Binding>,
}

impl Bindings {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, index: usize) -> Result<&Binding> {
        self.slots.get(index).ok_or_else(|| {
            Error::execution(format!(
                "kernel {}: binding index {index} out of range ({} bound)",
                self.kernel,
                self.slots.len()
            ))
        })
    }

    /// Extract a scalar parameter
    pub fn scalar<T: ScalarRepr>(&self, index: usize) -> Result<T> {
        match self.slot(index)? {
            Binding::Scalar(value) => value.extract::<T>(),
            _ => Err(raw::capability_missing(Capability::Primitive, "a range or handle binding")),
        }
    }

    /// Extract a read-only typed span
    pub fn slice<T: ScalarRepr>(&self, index: usize) -> Result<&[T]> {
        match self.slot(index)? {
            Binding::ConstSpan {
                ptr,
                len_elems,
                elem,
            } => {
                check_span::<T>(*ptr, elem)?;
                Ok(unsafe { from_raw_parts(ptr.cast::<T>(), *len_elems) })
            }
            Binding::MutSpan {
                ptr,
                len_elems,
                elem,
            } => {
                check_span::<T>(*ptr, elem)?;
                Ok(unsafe { from_raw_parts(ptr.cast_const().cast::<T>(), *len_elems) })
            }
            _ => Err(raw::capability_missing(Capability::ConstRange, "a scalar or handle binding")),
        }
    }

    /// Extract a mutable typed span
    pub fn slice_mut<T: ScalarRepr>(&self, index: usize) -> Result<&mut [T]> {
        match self.slot(index)? {
            Binding::MutSpan {
                ptr,
                len_elems,
                elem,
            } => {
                check_span::<T>(*ptr, elem)?;
                Ok(unsafe { from_raw_parts_mut(ptr.cast::<T>(), *len_elems) })
            }
            _ => Err(raw::capability_missing(Capability::MutRange, "a non-mutable binding")),
        }
    }

    /// Extract a device handle binding
    pub fn handle(&self, index: usize) -> Result<MemoryHandle> {
        match self.slot(index)? {
            Binding::Handle(h) => Ok(h.clone()),
            _ => Err(raw::capability_missing(Capability::DeviceHandle, "a scalar or span binding")),
        }
    }
}

fn check_span<T: ScalarRepr>(ptr: *const u8, elem: &TypeDescriptor) -> Result<()> {
    if elem.id() != T::type_id() {
        return Err(raw::type_mismatch(T::TYPE_NAME, elem.id().name()));
    }
    if (ptr as usize) % std::mem::align_of::<T>() != 0 {
        return Err(Error::execution(format!(
            "span base {ptr:p} is not aligned for {}",
            T::TYPE_NAME
        )));
    }
    Ok(())
}

/// The launchable part of a bound kernel, provided by the back-end
pub trait BoundCallable: Send + Sync {
    /// Execute the kernel body over the planned grid
    fn call(&self, grid: &mut [GridRange], bindings: &Bindings) -> Result<()>;
}

/// A kernel paired with validated arguments, pins, and an entry callable
///
/// Holds exactly one binding per formal parameter and every pin produced
/// while binding. Pins are released when the `BoundKernel` drops, which a
/// caller should only do once the launch event has reached a terminal state.
pub struct BoundKernel {
    spec: Arc<KernelSpec>,
    bindings: Bindings,
    pins: Vec<RegionPin>,
    env: Env,
    callable: Arc<dyn BoundCallable>,
}

impl std::fmt::Debug for BoundKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundKernel")
            .field("spec", &self.spec.name())
            .field("pins", &self.pins.len())
            .field("env", &self.env)
            .finish()
    }
}

impl BoundKernel {
    pub fn new(
        spec: Arc<KernelSpec>,
        bindings: Bindings,
        pins: Vec<RegionPin>,
        env: Env,
        callable: Arc<dyn BoundCallable>,
    ) -> Self {
        Self {
            spec,
            bindings,
            pins,
            env,
            callable,
        }
    }

    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }

    /// Bind-time environment: tuneables overlaid with primitive parameters
    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    /// Run the kernel body over `grid`
    pub fn invoke(&self, grid: &mut [GridRange]) -> Result<()> {
        self.callable.call(grid, &self.bindings)
    }
}

// ================================================================================================
// Binding
// ================================================================================================

/// Reconcile caller arguments against a kernel spec
///
/// Returns the typed bindings, the pins keeping mapped ranges valid, and the
/// bind-time environment. On any failure every pin accumulated so far is
/// dropped before the error is returned.
pub fn bind_arguments(
    spec: &KernelSpec,
    backend: BackendKind,
    op_name: &str,
    args: &[KernelArg],
) -> Result<(Bindings, Vec<RegionPin>, Env)> {
    let kernel = spec.name();
    if args.len() != spec.params().len() {
        return Err(Error::ArityMismatch {
            kernel: kernel.to_string(),
            expected: spec.params().len(),
            got: args.len(),
        });
    }

    let mut env = spec.base_env();
    let mut slots = Vec::with_capacity(args.len());
    let mut pins = Vec::new();

    for (index, (param, arg)) in spec.params().iter().zip(args).enumerate() {
        let handler = arg.handler();
        let annotate = |e: Error| e.for_param(kernel, index, &param.name);

        match &param.shape {
            ParamShape::Scalar(desc) => {
                let value = handler.primitive(op_name).map_err(annotate)?;
                let mut bytes = vec![0u8; desc.size()];
                value
                    .descriptor()
                    .copy_into(value.bytes(), &mut bytes, desc.id())
                    .map_err(annotate)?;
                let bound = ScalarValue::from_bytes(bytes, desc.clone());
                if let Some(v) = bound.as_i64() {
                    env.insert(param.name.clone(), v);
                }
                slots.push(Binding::Scalar(bound));
            }
            ParamShape::Array { elem, .. } => {
                if handler.backend() != backend {
                    return Err(Error::BackendMismatch {
                        expected: backend,
                        got: handler.backend(),
                    });
                }
                if handler.value_type() != elem.id() {
                    return Err(annotate(raw::type_mismatch(
                        elem.id().name(),
                        handler.value_type().name(),
                    )));
                }
                let binding = if param.access.is_writable() && handler.can_mut_range() {
                    let range = handler.mut_range(op_name).map_err(annotate)?;
                    let len_elems = span_len(range.len_bytes, elem).map_err(annotate)?;
                    if let Some(pin) = range.pin {
                        pins.push(pin);
                    }
                    Binding::MutSpan {
                        ptr: range.ptr,
                        len_elems,
                        elem: elem.clone(),
                    }
                } else if !param.access.is_writable() && handler.can_const_range() {
                    let range = handler.const_range(op_name).map_err(annotate)?;
                    let len_elems = span_len(range.len_bytes, elem).map_err(annotate)?;
                    if let Some(pin) = range.pin {
                        pins.push(pin);
                    }
                    Binding::ConstSpan {
                        ptr: range.ptr,
                        len_elems,
                        elem: elem.clone(),
                    }
                } else if handler.can_handle() {
                    let handle = handler.handle(op_name).map_err(annotate)?;
                    let handle = if param.access.is_writable() {
                        handle
                    } else {
                        // Read-only formal: the kernel sees a const view.
                        handle.viewed_as(elem.id())
                    };
                    Binding::Handle(handle)
                } else {
                    let needed = if param.access.is_writable() {
                        Capability::MutRange
                    } else {
                        Capability::ConstRange
                    };
                    return Err(annotate(handler.refuse(needed)));
                };
                slots.push(binding);
            }
        }
    }

    // Second pass: array extents that resolve under the now-complete
    // environment must agree with the actual element counts.
    let context = format!("binding kernel {kernel}");
    for (index, (param, binding)) in spec.params().iter().zip(&slots).enumerate() {
        if let ParamShape::Array { extent, .. } = &param.shape {
            if !extent.is_resolvable(&env) {
                continue;
            }
            let declared = extent.eval(&env, &context)?;
            if let Some(actual) = binding.len_elems() {
                if declared != actual as i64 {
                    return Err(Error::ConstraintUnsatisfied {
                        kernel: kernel.to_string(),
                        detail: format!(
                            "parameter {index} ({}): extent {extent} = {declared}, argument has {actual} elements",
                            param.name
                        ),
                    });
                }
            }
        }
    }

    // Constraints whose identifiers all resolved become assertions; the rest
    // stay hints.
    for constraint in spec.constraints() {
        if constraint.lhs.is_resolvable(&env) && constraint.rhs.is_resolvable(&env) {
            let lhs = constraint.lhs.eval(&env, &context)?;
            let rhs = constraint.rhs.eval(&env, &context)?;
            if !constraint.op.holds(lhs, rhs) {
                return Err(Error::ConstraintUnsatisfied {
                    kernel: kernel.to_string(),
                    detail: format!(
                        "{constraint} ({lhs} {} {rhs} is false): {}",
                        constraint.op.as_str(),
                        constraint.rationale
                    ),
                });
            }
        } else {
            tracing::debug!(kernel, %constraint, "constraint kept as hint");
        }
    }

    tracing::debug!(
        kernel,
        op = op_name,
        params = slots.len(),
        pins = pins.len(),
        "bound"
    );

    Ok((
        Bindings {
            kernel: kernel.to_string(),
            slots,
        },
        pins,
        env,
    ))
}

fn span_len(len_bytes: usize, elem: &TypeDescriptor) -> Result<usize> {
    if elem.size() == 0 || len_bytes % elem.size() != 0 {
        return Err(raw::size_not_aligned(elem.size(), len_bytes));
    }
    Ok(len_bytes / elem.size())
}
