//! Collaborator interfaces used by runtime services.
//!
//! The heap, the resolver and the monitor scheme belong to the VM. Runtime
//! calls reach them only through these traits, which keeps every service
//! body testable against a simulated heap.

use kiln_core::{
    HubHandle, LinkageError, ObjectLayout, Representation, ResolutionGuard, ResolvedField,
    ResolvedMethod, ResolvedType, RuntimeFault, TypeId, ValueKind,
};

use super::calls::RuntimeCall;
use super::mtable;
use super::value::RtValue;

// =============================================================================
// Memory
// =============================================================================

/// Byte-addressed view of the managed heap.
///
/// Objects and words are 64 bits wide; multi-byte values are little-endian.
pub trait Memory {
    /// Read `buf.len()` bytes at `address`.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), RuntimeFault>;

    /// Write `bytes` at `address`.
    fn write(&self, address: u64, bytes: &[u8]) -> Result<(), RuntimeFault>;

    /// Load a value of `kind`.
    fn load(&self, kind: ValueKind, address: u64) -> Result<RtValue, RuntimeFault> {
        let size = kind.size_in_bytes(8) as usize;
        if size == 0 {
            return Err(RuntimeFault::Internal("load of a kind without storage"));
        }
        let mut buf = [0u8; 8];
        self.read(address, &mut buf[..size])?;
        Ok(RtValue::from_bits(kind, u64::from_le_bytes(buf)))
    }

    /// Store `value` as `kind`, truncating to the kind's size.
    fn store(&self, kind: ValueKind, address: u64, value: &RtValue) -> Result<(), RuntimeFault> {
        let size = kind.size_in_bytes(8) as usize;
        let bits = value
            .to_bits()
            .filter(|_| size > 0)
            .ok_or(RuntimeFault::Internal("store of a value without storage"))?;
        self.write(address, &bits.to_le_bytes()[..size])
    }
}

// =============================================================================
// Heap
// =============================================================================

/// Allocation and object-model queries.
pub trait Heap: Memory {
    /// Allocate a tuple object described by `hub`.
    fn allocate_tuple(&self, hub: HubHandle) -> Result<u64, RuntimeFault>;

    /// Allocate a hybrid (tuple with trailing word array) described by `hub`.
    fn allocate_hybrid(&self, hub: HubHandle) -> Result<u64, RuntimeFault>;

    /// Allocate an array of `length` elements. `length` is never negative.
    fn allocate_array(&self, hub: HubHandle, length: i32) -> Result<u64, RuntimeFault>;

    /// Record that `value` was stored into a reference slot of `object`.
    fn write_barrier(&self, _object: u64, _value: u64) {}

    /// Hub of a non-null object.
    fn hub_of(&self, layout: &ObjectLayout, object: u64) -> Result<HubHandle, RuntimeFault> {
        if object == 0 {
            return Err(RuntimeFault::NullPointer);
        }
        let hub = self.load(ValueKind::Object, object.wrapping_add_signed(layout.hub_offset.into()))?;
        hub.as_address()
            .map(HubHandle)
            .ok_or(RuntimeFault::Internal("object without a hub"))
    }

    /// Type identifier stored in a hub.
    fn type_id_of(&self, layout: &ObjectLayout, hub: HubHandle) -> Result<TypeId, RuntimeFault> {
        let id = self.load(ValueKind::Int, hub.0.wrapping_add_signed(layout.type_id_offset.into()))?;
        id.as_int()
            .map(|id| id as TypeId)
            .ok_or(RuntimeFault::Internal("hub without a type id"))
    }

    /// Component hub of an array hub.
    fn component_hub(&self, layout: &ObjectLayout, hub: HubHandle) -> Result<HubHandle, RuntimeFault> {
        let component = self.load(
            ValueKind::Object,
            hub.0.wrapping_add_signed(layout.component_hub_offset.into()),
        )?;
        match component.as_address() {
            Some(0) | None => Err(RuntimeFault::Internal("hub is not an array hub")),
            Some(address) => Ok(HubHandle(address)),
        }
    }

    /// Length of a non-null array.
    fn array_length(&self, layout: &ObjectLayout, array: u64) -> Result<i32, RuntimeFault> {
        if array == 0 {
            return Err(RuntimeFault::NullPointer);
        }
        self.load(ValueKind::Int, array.wrapping_add_signed(layout.array_length_offset.into()))?
            .as_int()
            .ok_or(RuntimeFault::Internal("array without a length"))
    }

    /// Whether instances of `hub` are instances of type `id`.
    fn is_subtype(&self, layout: &ObjectLayout, hub: HubHandle, id: TypeId) -> Result<bool, RuntimeFault> {
        mtable::type_test(self, layout, hub, id)
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves guards to concrete types, fields and methods.
///
/// Two threads may resolve the same guard at once; implementations must
/// produce the same answer for both.
pub trait Resolver {
    /// Resolve a type guard. `ArrayClass` guards yield the array type.
    fn resolve_type(&self, guard: &ResolutionGuard) -> Result<ResolvedType, LinkageError>;

    /// Resolve a field guard to its holder and field.
    fn resolve_field(&self, guard: &ResolutionGuard) -> Result<(ResolvedType, ResolvedField), LinkageError>;

    /// Resolve a method guard.
    fn resolve_method(&self, guard: &ResolutionGuard) -> Result<ResolvedMethod, LinkageError>;

    /// Run static initialization of `ty`. Called only when
    /// `ty.is_initialized` is false; must tolerate repeated calls.
    fn initialize(&self, ty: &ResolvedType) -> Result<(), LinkageError>;

    /// Compile or look up the entry point of `method`.
    fn link(&self, method: &ResolvedMethod) -> Result<u64, LinkageError>;

    /// Address of the object representing `ty` as `representation`.
    fn representation(&self, ty: &ResolvedType, representation: Representation) -> u64;
}

/// Object monitors.
pub trait MonitorScheme {
    /// Acquire the monitor of a non-null object.
    fn monitor_enter(&self, object: u64) -> Result<(), RuntimeFault>;

    /// Release the monitor of a non-null object.
    fn monitor_exit(&self, object: u64) -> Result<(), RuntimeFault>;
}

// =============================================================================
// RuntimeServices
// =============================================================================

/// Everything a runtime call may touch.
#[derive(Clone, Copy)]
pub struct RuntimeServices<'a> {
    /// Object layout the templates were built for.
    pub layout: ObjectLayout,
    /// Hub of `int[]`, used for the dimension arrays of rank-N allocation.
    pub int_array_hub: HubHandle,
    /// Symbol resolution.
    pub resolver: &'a dyn Resolver,
    /// Managed heap.
    pub heap: &'a dyn Heap,
    /// Monitors.
    pub monitors: &'a dyn MonitorScheme,
}

impl RuntimeServices<'_> {
    /// Invoke `call` with `args`.
    pub fn invoke(&self, call: &RuntimeCall, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
        if args.len() != call.params.len() {
            return Err(RuntimeFault::Internal("runtime call argument count"));
        }
        tracing::trace!(call = call.name, "runtime call");
        (call.entry)(self, args)
    }
}

impl std::fmt::Debug for RuntimeServices<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeServices")
            .field("layout", &self.layout)
            .field("int_array_hub", &self.int_array_hub)
            .finish_non_exhaustive()
    }
}
