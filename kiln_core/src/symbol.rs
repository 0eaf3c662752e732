//! Symbol and type surface consumed from the class-metadata front end.
//!
//! The front end owns symbol tables and constant pools. The backend only
//! sees the values below: either a fully resolved description carrying the
//! offsets, indices and type descriptors the generated code needs, or an
//! unresolved reference naming a constant-pool entry.

use crate::kind::ValueKind;

/// Address of a type descriptor ("hub") in the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HubHandle(pub u64);

impl HubHandle {
    /// Raw address.
    #[inline]
    pub const fn address(self) -> u64 {
        self.0
    }
}

/// Opaque handle to a symbol table (constant pool) owned by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle(pub u32);

/// Globally unique type identifier, used as the hashed method-table key.
///
/// Identifiers start at 1; 0 never names a type.
pub type TypeId = u32;

// =============================================================================
// Types
// =============================================================================

/// Runtime representation requested when materializing a type constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    /// The language-level class object.
    JavaClass,
    /// The type descriptor (hub) used for dispatch and type tests.
    ObjectHub,
    /// The tuple holding the type's static fields.
    StaticFields,
    /// The VM-internal type information record.
    TypeInfo,
}

impl Representation {
    /// Every representation, in table order.
    pub const ALL: [Representation; 4] = [
        Representation::JavaClass,
        Representation::ObjectHub,
        Representation::StaticFields,
        Representation::TypeInfo,
    ];

    /// Index into per-representation tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A type whose descriptor is known at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    /// Type identifier (mtable key).
    pub id: TypeId,
    /// Dynamic hub used by instances of this type.
    pub hub: HubHandle,
    /// Whether the type is an interface.
    pub is_interface: bool,
    /// Whether the type cannot be subclassed.
    pub is_final: bool,
    /// Whether the type is an array class.
    pub is_array: bool,
    /// Whether instances use the hybrid (tuple + array) layout.
    pub is_hybrid: bool,
    /// Whether static initialization has completed.
    pub is_initialized: bool,
}

impl ResolvedType {
    /// Whether the cheap exact-hub comparison is a complete type test.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.is_final && !self.is_array && !self.is_interface
    }
}

/// A type referenced by a constant-pool entry not yet resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnresolvedSymbol {
    /// Pool containing the reference.
    pub pool: PoolHandle,
    /// Constant-pool index (always > 0).
    pub cpi: u32,
}

/// A type as seen at a compile-time operation site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    /// Known descriptor.
    Resolved(ResolvedType),
    /// Pool entry to resolve at first execution.
    Unresolved(UnresolvedSymbol),
}

impl TypeRef {
    /// Whether the type is resolved.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self, TypeRef::Resolved(_))
    }

    /// Whether the type is resolved and initialized.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        matches!(self, TypeRef::Resolved(t) if t.is_initialized)
    }
}

// =============================================================================
// Fields
// =============================================================================

/// A field whose offset is known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedField {
    /// Byte offset from the object origin (or static tuple origin).
    pub offset: i32,
    /// Field kind.
    pub kind: ValueKind,
}

/// A field as seen at a compile-time operation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRef {
    /// Known offset.
    Resolved(ResolvedField),
    /// Pool entry; the kind is known from the descriptor even when the
    /// holder is not loaded.
    Unresolved {
        /// Pool reference.
        symbol: UnresolvedSymbol,
        /// Field kind from the descriptor.
        kind: ValueKind,
    },
}

impl FieldRef {
    /// Kind of the field.
    #[inline]
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldRef::Resolved(f) => f.kind,
            FieldRef::Unresolved { kind, .. } => *kind,
        }
    }
}

// =============================================================================
// Methods
// =============================================================================

/// A method whose dispatch data is known at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethod {
    /// Identifier of the declaring type.
    pub holder_id: TypeId,
    /// Vtable index for virtual dispatch.
    pub vtable_index: Option<u32>,
    /// Index within the declaring interface's itable block. Index 0 holds
    /// the interface identifier, so method indices start at 1.
    pub itable_index: Option<u32>,
    /// Linked entry point, or 0 when the call site is patched at link time.
    pub entry_point: u64,
    /// Whether the method is called from native code (skips the stack
    /// overflow check in the prologue).
    pub is_vm_entry_point: bool,
    /// Words of incoming arguments, used by call adapters.
    pub argument_words: u16,
}

/// A method as seen at a compile-time operation site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodRef {
    /// Known dispatch data.
    Resolved(ResolvedMethod),
    /// Pool entry to resolve at first execution.
    Unresolved(UnresolvedSymbol),
}

impl MethodRef {
    /// Whether the method is resolved.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self, MethodRef::Resolved(_))
    }
}
