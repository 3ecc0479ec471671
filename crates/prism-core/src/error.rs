//! Error types for kernel dispatch operations

use crate::argument::Capability;
use crate::memory::BackendKind;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, binding, or launching kernels
///
/// Build-time and bind-time errors are returned synchronously to the caller;
/// runtime failures are only ever observed through an event's terminal state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Caller argument count does not match the formal parameter list
    #[error("kernel {kernel}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        kernel: String,
        expected: usize,
        got: usize,
    },

    /// Launch grid axis count does not match the declared dimensions
    #[error("kernel {kernel}: launch grid has {got} axes, {expected} dimensions declared")]
    GridArityMismatch {
        kernel: String,
        expected: usize,
        got: usize,
    },

    /// Argument type is not convertible to the formal parameter type
    #[error(
        "kernel {kernel} parameter {param_index} ({param_name}): expected {expected_type}, got {got_type}"
    )]
    TypeMismatch {
        kernel: String,
        param_index: usize,
        param_name: String,
        expected_type: String,
        got_type: String,
    },

    /// Argument handler cannot yield what the formal parameter requires
    #[error(
        "kernel {kernel} parameter {param_index} ({param_name}): needs {needed}, argument offers {available}"
    )]
    CapabilityMissing {
        kernel: String,
        param_index: usize,
        param_name: String,
        needed: Capability,
        available: String,
    },

    /// Byte range cannot be reinterpreted as a whole number of elements
    #[error(
        "kernel {kernel} parameter {param_index} ({param_name}): byte length {byte_len} is not a multiple of element size {element_size}"
    )]
    SizeNotAligned {
        kernel: String,
        param_index: usize,
        param_name: String,
        element_size: usize,
        byte_len: usize,
    },

    /// Name collision within a declaration scope
    #[error("duplicate name {name:?} in {scope}")]
    DuplicateName { scope: String, name: String },

    /// Identifier did not resolve against the declarations in scope
    #[error("unknown identifier {name:?} in {context}")]
    UnknownIdentifier { context: String, name: String },

    /// Shape or grid expression failed to parse or evaluate
    #[error("invalid expression in {context}: {detail}")]
    InvalidExpression { context: String, detail: String },

    /// Global work size is not an exact multiple of the block size
    #[error("grid axis {axis}: global size {global} is not a multiple of local size {local}")]
    GridMisalignment { axis: usize, global: u64, local: u64 },

    /// Argument belongs to a different back-end than the kernel
    #[error("backend mismatch: expected {expected}, got {got}")]
    BackendMismatch {
        expected: BackendKind,
        got: BackendKind,
    },

    /// Kernel name already present in the registry for this back-end
    #[error("kernel {name:?} already registered for backend {backend}")]
    AlreadyRegistered { backend: BackendKind, name: String },

    /// A declared constraint evaluated to false at bind time
    #[error("kernel {kernel}: constraint not satisfied: {detail}")]
    ConstraintUnsatisfied { kernel: String, detail: String },

    /// A prerequisite event reached a failure state; the root cause is preserved
    #[error("prerequisite failed: {0}")]
    PrereqFailed(#[source] Box<Error>),

    /// The event was cancelled before completion
    #[error("cancelled")]
    Cancelled,

    /// A bounded wait elapsed without the event reaching a terminal state
    #[error("timed out")]
    TimedOut,

    /// The requested back-end is not compiled into this build
    #[error("backend {0} is not available: {1}")]
    BackendUnavailable(BackendKind, String),

    /// Kernel body or back-end command failed at runtime
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl Error {
    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Wrap a prerequisite's failure, preserving the root cause
    pub fn prereq(inner: Error) -> Self {
        Self::PrereqFailed(Box::new(inner))
    }

    /// Annotate a parameter-scoped error with the kernel and parameter it
    /// occurred in.
    ///
    /// Low-level conversions (type descriptors, span reinterpretation,
    /// capability queries) cannot know which kernel parameter they serve;
    /// the binder retags their errors on the way out. Errors that carry no
    /// parameter identity pass through unchanged.
    pub(crate) fn for_param(self, kernel: &str, index: usize, name: &str) -> Self {
        match self {
            Self::TypeMismatch {
                expected_type,
                got_type,
                ..
            } => Self::TypeMismatch {
                kernel: kernel.to_string(),
                param_index: index,
                param_name: name.to_string(),
                expected_type,
                got_type,
            },
            Self::CapabilityMissing {
                needed, available, ..
            } => Self::CapabilityMissing {
                kernel: kernel.to_string(),
                param_index: index,
                param_name: name.to_string(),
                needed,
                available,
            },
            Self::SizeNotAligned {
                element_size,
                byte_len,
                ..
            } => Self::SizeNotAligned {
                kernel: kernel.to_string(),
                param_index: index,
                param_name: name.to_string(),
                element_size,
                byte_len,
            },
            other => other,
        }
    }
}

/// Builders for errors raised below the binder, before the kernel and
/// parameter identity is known. The binder fills those fields in via
/// [`Error::for_param`].
pub(crate) mod raw {
    use super::Error;
    use crate::argument::Capability;

    pub(crate) fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Error {
        Error::TypeMismatch {
            kernel: String::new(),
            param_index: 0,
            param_name: String::new(),
            expected_type: expected.into(),
            got_type: got.into(),
        }
    }

    pub(crate) fn capability_missing(needed: Capability, available: impl Into<String>) -> Error {
        Error::CapabilityMissing {
            kernel: String::new(),
            param_index: 0,
            param_name: String::new(),
            needed,
            available: available.into(),
        }
    }

    pub(crate) fn size_not_aligned(element_size: usize, byte_len: usize) -> Error {
        Error::SizeNotAligned {
            kernel: String::new(),
            param_index: 0,
            param_name: String::new(),
            element_size,
            byte_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::Capability;

    #[test]
    fn test_for_param_retags_type_mismatch() {
        let err = raw::type_mismatch("u32", "f32").for_param("scale", 2, "n");
        match err {
            Error::TypeMismatch {
                kernel,
                param_index,
                param_name,
                expected_type,
                got_type,
            } => {
                assert_eq!(kernel, "scale");
                assert_eq!(param_index, 2);
                assert_eq!(param_name, "n");
                assert_eq!(expected_type, "u32");
                assert_eq!(got_type, "f32");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_for_param_passes_unrelated_errors_through() {
        let err = Error::Cancelled.for_param("scale", 0, "src");
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_prereq_preserves_root_cause() {
        let root = Error::execution("divide by zero");
        let wrapped = Error::prereq(root);
        let msg = wrapped.to_string();
        assert!(msg.starts_with("prerequisite failed"));
        match wrapped {
            Error::PrereqFailed(inner) => {
                assert!(matches!(*inner, Error::ExecutionFailed(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_capability_missing_message_names_both_sides() {
        let err =
            raw::capability_missing(Capability::MutRange, "[Primitive]").for_param("add2", 1, "b");
        let msg = err.to_string();
        assert!(msg.contains("mutable range"));
        assert!(msg.contains("Primitive"));
    }
}
