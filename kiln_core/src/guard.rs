//! Resolution guards.
//!
//! A guard names a symbolic reference that the generated code resolves the
//! first time it executes. The guard itself is pure identity: it never
//! caches the resolved value. Whatever caching happens is the resolver's
//! business, and the resolver must tolerate two threads resolving the same
//! guard at once.

use std::fmt;

use crate::symbol::{HubHandle, PoolHandle, UnresolvedSymbol};

/// What the resolver must produce for a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionKind {
    /// Resolve a class reference.
    Class,
    /// Resolve and initialize a class about to be instantiated.
    ClassForNew,
    /// Resolve the array class whose component is the referenced type.
    ArrayClass,
    /// Resolve an instance field for a read.
    InstanceFieldForReading,
    /// Resolve an instance field for a write.
    InstanceFieldForWriting,
    /// Resolve a static field for a read.
    StaticFieldForReading,
    /// Resolve a static field for a write.
    StaticFieldForWriting,
    /// Resolve a virtual method.
    VirtualMethod,
    /// Resolve an interface method.
    InterfaceMethod,
    /// Resolve a static method.
    StaticMethod,
    /// Resolve a private/constructor/super method.
    SpecialMethod,
}

impl ResolutionKind {
    /// Whether this kind resolves to a type.
    #[inline]
    pub const fn is_type(self) -> bool {
        matches!(
            self,
            ResolutionKind::Class | ResolutionKind::ClassForNew | ResolutionKind::ArrayClass
        )
    }

    /// Whether this kind resolves to a field.
    #[inline]
    pub const fn is_field(self) -> bool {
        matches!(
            self,
            ResolutionKind::InstanceFieldForReading
                | ResolutionKind::InstanceFieldForWriting
                | ResolutionKind::StaticFieldForReading
                | ResolutionKind::StaticFieldForWriting
        )
    }

    /// Whether this kind resolves to a method.
    #[inline]
    pub const fn is_method(self) -> bool {
        !self.is_type() && !self.is_field()
    }

    /// Whether this kind resolves a static member, which requires the holder
    /// to be initialized.
    #[inline]
    pub const fn requires_initialization(self) -> bool {
        matches!(
            self,
            ResolutionKind::ClassForNew
                | ResolutionKind::StaticFieldForReading
                | ResolutionKind::StaticFieldForWriting
        )
    }
}

/// The reference a guard names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardTarget {
    /// Constant-pool entry.
    InPool {
        /// Symbol table.
        pool: PoolHandle,
        /// Entry index (always > 0).
        cpi: u32,
    },
    /// A type already resolved at compile time. Used where only the guarded
    /// template fits the site: large-rank multi-array allocation, or a
    /// resolved but uninitialized type.
    Preresolved(HubHandle),
}

/// Identity of an unresolved symbolic reference embedded in generated code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionGuard {
    target: GuardTarget,
    kind: ResolutionKind,
}

impl ResolutionGuard {
    /// Create a guard for a pool entry.
    pub fn in_pool(symbol: UnresolvedSymbol, kind: ResolutionKind) -> Self {
        debug_assert!(symbol.cpi > 0, "constant pool index 0 is reserved");
        Self {
            target: GuardTarget::InPool {
                pool: symbol.pool,
                cpi: symbol.cpi,
            },
            kind,
        }
    }

    /// Create a guard for a type known at compile time.
    ///
    /// The resolver still runs for it, so `kind` decides whether the type is
    /// also initialized (`ClassForNew`) or replaced by its array class
    /// (`ArrayClass`).
    pub fn preresolved(hub: HubHandle, kind: ResolutionKind) -> Self {
        debug_assert!(kind.is_type(), "preresolved guards name types");
        Self {
            target: GuardTarget::Preresolved(hub),
            kind,
        }
    }

    /// The named reference.
    #[inline]
    pub fn target(&self) -> GuardTarget {
        self.target
    }

    /// What the resolver must produce.
    #[inline]
    pub fn kind(&self) -> ResolutionKind {
        self.kind
    }
}

impl fmt::Display for ResolutionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            GuardTarget::InPool { pool, cpi } => {
                write!(f, "guard<{:?} pool#{}[{}]>", self.kind, pool.0, cpi)
            }
            GuardTarget::Preresolved(hub) => write!(f, "guard<{:?} hub@{:#x}>", self.kind, hub.0),
        }
    }
}
