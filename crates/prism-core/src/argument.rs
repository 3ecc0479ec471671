//! Caller-argument handlers and pins
//!
//! Every caller argument reaches the binder wrapped in an
//! [`ArgumentHandler`]: a capability-bearing adapter that can yield some
//! subset of {primitive bytes, const range, mutable range, device handle}.
//! The binder queries capabilities and picks an extraction per the formal
//! parameter's shape; asking a handler for something it cannot yield fails
//! with `CapabilityMissing`.

use crate::error::{raw, Result};
use crate::memory::{BackendKind, MemoryHandle};
use crate::types::{ScalarValue, TypeId};
use std::any::Any;
use std::fmt;

/// What an argument handler can yield
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Capability {
    Primitive,
    ConstRange,
    MutRange,
    DeviceHandle,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Primitive => "a primitive value",
            Capability::ConstRange => "a const range",
            Capability::MutRange => "a mutable range",
            Capability::DeviceHandle => "a device handle",
        })
    }
}

/// Scoped lifetime token for a mapped memory range
///
/// Holding a pin guarantees the underlying buffer stays alive and, for
/// ranges, mapped into host-addressable space. Dropping the pin releases the
/// mapping. Pins are collected into the bound kernel and must not outlive
/// the call frame that produced them.
pub struct RegionPin(#[allow(dead_code)] Box<dyn Any + Send + Sync>);

impl RegionPin {
    /// Wrap whatever guard object keeps the mapping valid; dropping the pin
    /// drops the guard
    pub fn new(guard: impl Any + Send + Sync) -> Self {
        RegionPin(Box::new(guard))
    }
}

impl fmt::Debug for RegionPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RegionPin")
    }
}

/// A read-only mapped range: base pointer, byte length, and the pin keeping
/// the mapping valid
#[derive(Debug)]
pub struct ConstRange {
    pub ptr: *const u8,
    pub len_bytes: usize,
    pub pin: Option<RegionPin>,
}

/// A mutable mapped range
#[derive(Debug)]
pub struct MutRange {
    pub ptr: *mut u8,
    pub len_bytes: usize,
    pub pin: Option<RegionPin>,
}

/// Capability-bearing wrapper around one caller argument
///
/// The four extraction operations mirror the four capabilities; the default
/// bodies refuse with `CapabilityMissing`, so a handler only implements what
/// it can actually yield. `op_name` flows into error messages.
pub trait ArgumentHandler: Send + Sync {
    /// Back-end this argument's storage belongs to (irrelevant for pure
    /// primitives, which bind on any back-end)
    fn backend(&self) -> BackendKind;

    /// Element (or value) type of the argument
    fn value_type(&self) -> TypeId;

    fn can_primitive(&self) -> bool {
        false
    }
    fn can_const_range(&self) -> bool {
        false
    }
    fn can_mut_range(&self) -> bool {
        false
    }
    fn can_handle(&self) -> bool {
        false
    }

    /// The capabilities this handler advertises
    fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.can_primitive() {
            caps.push(Capability::Primitive);
        }
        if self.can_const_range() {
            caps.push(Capability::ConstRange);
        }
        if self.can_mut_range() {
            caps.push(Capability::MutRange);
        }
        if self.can_handle() {
            caps.push(Capability::DeviceHandle);
        }
        caps
    }

    /// Serialized bytes of a single value plus its descriptor
    fn primitive(&self, _op_name: &str) -> Result<ScalarValue> {
        Err(self.refuse(Capability::Primitive))
    }

    /// Read-only mapped range, valid until the pin drops
    fn const_range(&self, _op_name: &str) -> Result<ConstRange> {
        Err(self.refuse(Capability::ConstRange))
    }

    /// Mutable mapped range, valid until the pin drops
    fn mut_range(&self, _op_name: &str) -> Result<MutRange> {
        Err(self.refuse(Capability::MutRange))
    }

    /// The argument's memory handle, zero-copy
    fn handle(&self, _op_name: &str) -> Result<MemoryHandle> {
        Err(self.refuse(Capability::DeviceHandle))
    }

    /// Build the refusal for an unsupported extraction
    fn refuse(&self, needed: Capability) -> crate::error::Error {
        raw::capability_missing(needed, format!("{:?}", self.capabilities()))
    }
}

/// One caller argument, ready for binding
pub struct KernelArg(Box<dyn ArgumentHandler>);

impl KernelArg {
    pub fn new(handler: impl ArgumentHandler + 'static) -> Self {
        KernelArg(Box::new(handler))
    }

    pub fn handler(&self) -> &dyn ArgumentHandler {
        self.0.as_ref()
    }
}

impl fmt::Debug for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KernelArg({} {:?})",
            ArgumentHandler::value_type(self.0.as_ref()),
            self.0.capabilities()
        )
    }
}
