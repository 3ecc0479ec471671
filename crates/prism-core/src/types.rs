//! Type identities, descriptors, and the process-wide scalar registry
//!
//! A [`TypeDescriptor`] is the sole bridge from serialized bytes to a typed
//! value: it pairs a [`TypeId`] with an element size and a copy routine that
//! writes the serialized representation into a destination slot identified by
//! another `TypeId`. The dispatch layer never interprets bytes itself; it
//! always goes through a descriptor.
//!
//! The registry is seeded with the machine primitives (`u8`..`u64`,
//! `i8`..`i64`, `f16`, `f32`, `f64`) and host applications may register
//! additional descriptors for their own element types (structs passed to
//! kernels by layout).

use crate::error::{raw, Error, Result};
use half::f16;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Opaque, equality-comparable token identifying a concrete value type
///
/// The wrapped name doubles as the spelling used in kernel type expressions
/// (`"u32"`, `"f32"`, ...) and in error messages.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeId(&'static str);

impl TypeId {
    /// Create a type identity from its registry name
    pub const fn new(name: &'static str) -> Self {
        TypeId(name)
    }

    /// Get the registry name
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

type CopyIntoFn = dyn Fn(&[u8], &mut [u8], TypeId) -> Result<()> + Send + Sync;

/// Value layout handle: a type identity, an element size, and a byte-level
/// copy routine
///
/// `copy_into` copies one serialized value into a destination slot typed by
/// `dst_id`, converting where the conversion is lossless at the type level.
/// Incompatible destinations fail with [`Error::TypeMismatch`].
#[derive(Clone)]
pub struct TypeDescriptor {
    id: TypeId,
    size: usize,
    copy_into: Arc<CopyIntoFn>,
}

impl TypeDescriptor {
    /// Create a descriptor from its parts
    ///
    /// Host applications use this to describe their own element types; the
    /// machine primitives are pre-registered.
    pub fn new(
        id: TypeId,
        size: usize,
        copy_into: impl Fn(&[u8], &mut [u8], TypeId) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            size,
            copy_into: Arc::new(copy_into),
        }
    }

    /// The type identity this descriptor describes
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Element size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy a serialized value into a destination slot typed by `dst_id`
    ///
    /// # Errors
    ///
    /// Fails with `TypeMismatch` when `dst_id` is not reachable from this
    /// descriptor's type by an exact or lossless conversion.
    pub fn copy_into(&self, src: &[u8], dst: &mut [u8], dst_id: TypeId) -> Result<()> {
        (self.copy_into)(src, dst, dst_id)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

// ================================================================================================
// Scalar values
// ================================================================================================

/// Rust-side representation of a registered scalar type
///
/// Links a plain-old-data Rust type to its registry name so bindings can be
/// extracted with compile-time types (`bindings.scalar::<u32>(0)`).
pub trait ScalarRepr: bytemuck::Pod {
    /// Registry name of this type
    const TYPE_NAME: &'static str;

    /// Type identity of this type
    fn type_id() -> TypeId {
        TypeId::new(Self::TYPE_NAME)
    }
}

macro_rules! scalar_repr {
    ($($ty:ty => $name:literal,)*) => {
        $(impl ScalarRepr for $ty {
            const TYPE_NAME: &'static str = $name;
        })*
    };
}

scalar_repr! {
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    f16 => "f16",
    f32 => "f32",
    f64 => "f64",
}

/// One serialized value paired with its descriptor
#[derive(Clone, Debug)]
pub struct ScalarValue {
    bytes: Vec<u8>,
    desc: TypeDescriptor,
}

impl ScalarValue {
    /// Wrap already-serialized bytes
    pub fn from_bytes(bytes: Vec<u8>, desc: TypeDescriptor) -> Self {
        Self { bytes, desc }
    }

    /// Serialize a Rust scalar using its registered descriptor
    pub fn of<T: ScalarRepr>(value: T) -> Result<Self> {
        let desc = lookup_type(T::TYPE_NAME)?;
        Ok(Self {
            bytes: bytemuck::bytes_of(&value).to_vec(),
            desc,
        })
    }

    /// The descriptor of the stored value
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.desc
    }

    /// The serialized bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Extract as a Rust scalar, converting through the descriptor
    pub fn extract<T: ScalarRepr>(&self) -> Result<T> {
        let mut out = T::zeroed();
        self.desc
            .copy_into(&self.bytes, bytemuck::bytes_of_mut(&mut out), T::type_id())?;
        Ok(out)
    }

    /// Integer view of the value, if it holds one of the integer primitives
    ///
    /// Used by the binder to feed primitive parameters into the shape/grid
    /// environment. Values outside the `i64` range yield `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match decode(self.desc.id().name(), &self.bytes).ok()? {
            Num::Int(v) => i64::try_from(v).ok(),
            Num::Float(_) => None,
        }
    }
}

// ================================================================================================
// Primitive conversions
// ================================================================================================

enum Num {
    Int(i128),
    Float(f64),
}

fn read_le<const N: usize>(src: &[u8]) -> Result<[u8; N]> {
    src.get(..N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::execution(format!("scalar blob of {} bytes, {N} needed", src.len())))
}

fn decode(name: &str, src: &[u8]) -> Result<Num> {
    Ok(match name {
        "u8" => Num::Int(u8::from_le_bytes(read_le(src)?) as i128),
        "u16" => Num::Int(u16::from_le_bytes(read_le(src)?) as i128),
        "u32" => Num::Int(u32::from_le_bytes(read_le(src)?) as i128),
        "u64" => Num::Int(u64::from_le_bytes(read_le(src)?) as i128),
        "i8" => Num::Int(i8::from_le_bytes(read_le(src)?) as i128),
        "i16" => Num::Int(i16::from_le_bytes(read_le(src)?) as i128),
        "i32" => Num::Int(i32::from_le_bytes(read_le(src)?) as i128),
        "i64" => Num::Int(i64::from_le_bytes(read_le(src)?) as i128),
        "f16" => Num::Float(f16::from_le_bytes(read_le(src)?).to_f64()),
        "f32" => Num::Float(f32::from_le_bytes(read_le(src)?) as f64),
        "f64" => Num::Float(f64::from_le_bytes(read_le(src)?)),
        other => return Err(Error::execution(format!("{other} is not a primitive"))),
    })
}

/// Integer conversion rank: (signed, bit width). An unsigned source fits any
/// same-or-wider unsigned destination or any strictly wider signed one; a
/// signed source fits same-or-wider signed destinations only.
fn int_rank(name: &str) -> Option<(bool, u32)> {
    Some(match name {
        "u8" => (false, 8),
        "u16" => (false, 16),
        "u32" => (false, 32),
        "u64" => (false, 64),
        "i8" => (true, 8),
        "i16" => (true, 16),
        "i32" => (true, 32),
        "i64" => (true, 64),
        _ => return None,
    })
}

fn float_rank(name: &str) -> Option<u32> {
    Some(match name {
        "f16" => 16,
        "f32" => 32,
        "f64" => 64,
        _ => return None,
    })
}

fn int_converts(src: &str, dst: &str) -> bool {
    match (int_rank(src), int_rank(dst)) {
        (Some((false, sw)), Some((false, dw))) => sw <= dw,
        (Some((false, sw)), Some((true, dw))) => sw < dw,
        (Some((true, sw)), Some((true, dw))) => sw <= dw,
        _ => false,
    }
}

fn float_converts(src: &str, dst: &str) -> bool {
    match (float_rank(src), float_rank(dst)) {
        (Some(sw), Some(dw)) => sw <= dw,
        _ => false,
    }
}

fn encode_int(name: &str, dst: &mut [u8], v: i128) -> Result<()> {
    fn store<const N: usize>(dst: &mut [u8], bytes: [u8; N]) -> Result<()> {
        dst.get_mut(..N)
            .ok_or_else(|| Error::execution(format!("destination slot of {N} bytes needed")))?
            .copy_from_slice(&bytes);
        Ok(())
    }
    let overflow = || Error::execution(format!("value {v} overflows {name}"));
    match name {
        "u8" => store(dst, u8::try_from(v).map_err(|_| overflow())?.to_le_bytes()),
        "u16" => store(dst, u16::try_from(v).map_err(|_| overflow())?.to_le_bytes()),
        "u32" => store(dst, u32::try_from(v).map_err(|_| overflow())?.to_le_bytes()),
        "u64" => store(dst, u64::try_from(v).map_err(|_| overflow())?.to_le_bytes()),
        "i8" => store(dst, i8::try_from(v).map_err(|_| overflow())?.to_le_bytes()),
        "i16" => store(dst, i16::try_from(v).map_err(|_| overflow())?.to_le_bytes()),
        "i32" => store(dst, i32::try_from(v).map_err(|_| overflow())?.to_le_bytes()),
        "i64" => store(dst, i64::try_from(v).map_err(|_| overflow())?.to_le_bytes()),
        other => Err(Error::execution(format!("{other} is not an integer"))),
    }
}

fn encode_float(name: &str, dst: &mut [u8], v: f64) -> Result<()> {
    fn store<const N: usize>(dst: &mut [u8], bytes: [u8; N]) -> Result<()> {
        dst.get_mut(..N)
            .ok_or_else(|| Error::execution(format!("destination slot of {N} bytes needed")))?
            .copy_from_slice(&bytes);
        Ok(())
    }
    match name {
        "f16" => store(dst, f16::from_f64(v).to_le_bytes()),
        "f32" => store(dst, (v as f32).to_le_bytes()),
        "f64" => store(dst, v.to_le_bytes()),
        other => Err(Error::execution(format!("{other} is not a float"))),
    }
}

fn primitive_copy_into(src_name: &'static str, src: &[u8], dst: &mut [u8], dst_id: TypeId) -> Result<()> {
    let dst_name = dst_id.name();
    if dst_name == src_name {
        let size = primitive_size(src_name);
        let bytes = src
            .get(..size)
            .ok_or_else(|| Error::execution(format!("scalar blob of {} bytes, {size} needed", src.len())))?;
        dst.get_mut(..size)
            .ok_or_else(|| Error::execution(format!("destination slot of {size} bytes needed")))?
            .copy_from_slice(bytes);
        return Ok(());
    }
    if int_converts(src_name, dst_name) {
        match decode(src_name, src)? {
            Num::Int(v) => return encode_int(dst_name, dst, v),
            Num::Float(_) => unreachable!("integer rank admitted a float"),
        }
    }
    if float_converts(src_name, dst_name) {
        match decode(src_name, src)? {
            Num::Float(v) => return encode_float(dst_name, dst, v),
            Num::Int(_) => unreachable!("float rank admitted an integer"),
        }
    }
    Err(raw::type_mismatch(dst_name, src_name))
}

fn primitive_size(name: &str) -> usize {
    match name {
        "u8" | "i8" => 1,
        "u16" | "i16" | "f16" => 2,
        "u32" | "i32" | "f32" => 4,
        "u64" | "i64" | "f64" => 8,
        _ => 0,
    }
}

// ================================================================================================
// Registry
// ================================================================================================

const PRIMITIVES: &[&str] = &[
    "u8", "u16", "u32", "u64", "i8", "i16", "i32", "i64", "f16", "f32", "f64",
];

fn table() -> &'static RwLock<HashMap<&'static str, TypeDescriptor>> {
    static TYPES: OnceLock<RwLock<HashMap<&'static str, TypeDescriptor>>> = OnceLock::new();
    TYPES.get_or_init(|| {
        let mut map = HashMap::new();
        for &name in PRIMITIVES {
            let desc = TypeDescriptor::new(
                TypeId::new(name),
                primitive_size(name),
                move |src, dst, dst_id| primitive_copy_into(name, src, dst, dst_id),
            );
            map.insert(name, desc);
        }
        RwLock::new(map)
    })
}

/// Register an application-supplied type descriptor
///
/// # Errors
///
/// Fails with `DuplicateName` when the descriptor's name is already taken;
/// the existing registration is left intact.
pub fn register_type(desc: TypeDescriptor) -> Result<()> {
    let mut map = table().write();
    let name = desc.id().name();
    if map.contains_key(name) {
        return Err(Error::DuplicateName {
            scope: "type registry".to_string(),
            name: name.to_string(),
        });
    }
    map.insert(name, desc);
    Ok(())
}

/// Resolve a type name against the registry
///
/// # Errors
///
/// Fails with `UnknownIdentifier` for unregistered names.
pub fn lookup_type(name: &str) -> Result<TypeDescriptor> {
    table().read().get(name).cloned().ok_or_else(|| Error::UnknownIdentifier {
        context: "type registry".to_string(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_seeded() {
        for &name in PRIMITIVES {
            let desc = lookup_type(name).unwrap();
            assert_eq!(desc.id().name(), name);
            assert_eq!(desc.size(), primitive_size(name));
        }
    }

    #[test]
    fn test_unknown_type_name() {
        let err = lookup_type("quaternion").unwrap_err();
        assert!(matches!(err, Error::UnknownIdentifier { .. }));
    }

    #[test]
    fn test_scalar_round_trip() {
        let v = ScalarValue::of(42u32).unwrap();
        assert_eq!(v.extract::<u32>().unwrap(), 42);
        assert_eq!(v.as_i64(), Some(42));
    }

    #[test]
    fn test_integer_widening() {
        let v = ScalarValue::of(300u16).unwrap();
        assert_eq!(v.extract::<u32>().unwrap(), 300);
        assert_eq!(v.extract::<u64>().unwrap(), 300);
        assert_eq!(v.extract::<i32>().unwrap(), 300);
        // Same width, different signedness: not lossless at the type level.
        assert!(v.extract::<i16>().is_err());
    }

    #[test]
    fn test_integer_narrowing_rejected() {
        let v = ScalarValue::of(7u64).unwrap();
        let err = v.extract::<u32>().unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_float_widening() {
        let v = ScalarValue::of(f16::from_f32(1.5)).unwrap();
        assert_eq!(v.extract::<f32>().unwrap(), 1.5);
        assert_eq!(v.extract::<f64>().unwrap(), 1.5);
    }

    #[test]
    fn test_float_to_int_rejected() {
        let v = ScalarValue::of(1.5f32).unwrap();
        assert!(v.extract::<u32>().is_err());
        assert!(v.as_i64().is_none());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let desc = TypeDescriptor::new(TypeId::new("u32"), 4, |_, _, _| Ok(()));
        let err = register_type(desc).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { .. }));
        // First mapping intact: u32 still converts.
        let v = ScalarValue::of(9u32).unwrap();
        assert_eq!(v.extract::<u32>().unwrap(), 9);
    }

    #[test]
    fn test_custom_type_registration() {
        #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct Pair {
            lo: u32,
            hi: u32,
        }

        let id = TypeId::new("TestPair");
        register_type(TypeDescriptor::new(id, 8, move |src, dst, dst_id| {
            if dst_id != id {
                return Err(crate::error::raw::type_mismatch(dst_id.name(), "TestPair"));
            }
            dst[..8].copy_from_slice(&src[..8]);
            Ok(())
        }))
        .unwrap();

        let desc = lookup_type("TestPair").unwrap();
        let src = bytemuck::bytes_of(&Pair { lo: 1, hi: 2 }).to_vec();
        let value = ScalarValue::from_bytes(src, desc);
        let mut out = [0u8; 8];
        value
            .descriptor()
            .copy_into(value.bytes(), &mut out, id)
            .unwrap();
        assert_eq!(bytemuck::from_bytes::<Pair>(&out), &Pair { lo: 1, hi: 2 });
    }
}
