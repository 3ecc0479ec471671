//! Process-wide kernel registry
//!
//! A two-level table, `backend -> kernel name -> factory`, populated during
//! program start-up and read-mostly thereafter: lookups take a read lock,
//! registration takes the write lock. A factory is a closure that, given a
//! device context, returns a fresh kernel bound to that context's compiled
//! entry point.

use crate::context::ComputeContext;
use crate::error::{Error, Result};
use crate::kernel::ComputeKernel;
use crate::memory::BackendKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Materializes a kernel spec for a device context
pub type KernelFactory =
    Arc<dyn Fn(&dyn ComputeContext) -> Result<Arc<dyn ComputeKernel>> + Send + Sync>;

type Table = HashMap<BackendKind, HashMap<String, KernelFactory>>;

fn table() -> &'static RwLock<Table> {
    static KERNELS: OnceLock<RwLock<Table>> = OnceLock::new();
    KERNELS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a kernel factory under `(backend, name)`
///
/// # Errors
///
/// Fails with `AlreadyRegistered` when the pair is taken; the first mapping
/// is left intact.
pub fn register_kernel(backend: BackendKind, name: &str, factory: KernelFactory) -> Result<()> {
    let mut map = table().write();
    let kernels = map.entry(backend).or_default();
    if kernels.contains_key(name) {
        return Err(Error::AlreadyRegistered {
            backend,
            name: name.to_string(),
        });
    }
    kernels.insert(name.to_string(), factory);
    tracing::debug!(%backend, name, "kernel registered");
    Ok(())
}

/// Look up the factory registered under `(backend, name)`
///
/// # Errors
///
/// Fails with `UnknownIdentifier` for unregistered names.
pub fn lookup_kernel(backend: BackendKind, name: &str) -> Result<KernelFactory> {
    table()
        .read()
        .get(&backend)
        .and_then(|kernels| kernels.get(name))
        .cloned()
        .ok_or_else(|| Error::UnknownIdentifier {
            context: format!("kernel registry ({backend})"),
            name: name.to_string(),
        })
}

/// Names registered for a back-end, in no particular order
pub fn registered_kernels(backend: BackendKind) -> Vec<String> {
    table()
        .read()
        .get(&backend)
        .map(|kernels| kernels.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::KernelArg;
    use crate::bind::BoundKernel;
    use crate::spec::{KernelSpec, KernelSpecBuilder};

    #[derive(Debug)]
    struct SpecOnlyKernel(KernelSpec);

    impl ComputeKernel for SpecOnlyKernel {
        fn spec(&self) -> &KernelSpec {
            &self.0
        }
        fn bind(&self, _op_name: &str, _args: Vec<KernelArg>) -> Result<BoundKernel> {
            Err(Error::execution("bind is not under test"))
        }
    }

    fn factory_for(name: &'static str) -> KernelFactory {
        Arc::new(move |_ctx| {
            let spec = KernelSpecBuilder::new(name).finish()?;
            Ok(Arc::new(SpecOnlyKernel(spec)) as Arc<dyn ComputeKernel>)
        })
    }

    #[test]
    fn test_duplicate_registration_keeps_first_mapping() {
        register_kernel(BackendKind::Metal, "regTestDup", factory_for("regTestDup")).unwrap();
        let err = register_kernel(BackendKind::Metal, "regTestDup", factory_for("other"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { .. }));
        assert!(lookup_kernel(BackendKind::Metal, "regTestDup").is_ok());
    }

    #[test]
    fn test_same_name_different_backends() {
        register_kernel(BackendKind::Metal, "regTestShared", factory_for("regTestShared"))
            .unwrap();
        register_kernel(BackendKind::OpenCl, "regTestShared", factory_for("regTestShared"))
            .unwrap();
        assert!(lookup_kernel(BackendKind::Metal, "regTestShared").is_ok());
        assert!(lookup_kernel(BackendKind::OpenCl, "regTestShared").is_ok());
    }

    #[test]
    fn test_lookup_miss() {
        let err = lookup_kernel(BackendKind::Metal, "regTestMissing").unwrap_err();
        match err {
            Error::UnknownIdentifier { context, name } => {
                assert!(context.contains("metal"));
                assert_eq!(name, "regTestMissing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_registered_names_listed() {
        register_kernel(BackendKind::Metal, "regTestListed", factory_for("regTestListed"))
            .unwrap();
        assert!(registered_kernels(BackendKind::Metal)
            .iter()
            .any(|n| n == "regTestListed"));
    }
}
