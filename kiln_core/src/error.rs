//! Error types and result definitions for Kiln.
//!
//! Errors fall into four groups:
//! - Contract violations (catalog bugs found while building templates)
//! - Codegen errors (a compile driver asked for something unsupported)
//! - Runtime faults (user-visible faults raised by generated code)
//! - Linkage errors (resolution failures, surfaced as runtime faults)

use thiserror::Error;

use crate::kind::ValueKind;

/// The unified result type used throughout Kiln.
pub type KilnResult<T> = Result<T, KilnError>;

/// Umbrella error covering every Kiln error group.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KilnError {
    /// Catalog construction failed.
    #[error(transparent)]
    Contract(#[from] ContractViolation),

    /// A snippet could not be produced for a call site.
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    /// Generated code raised a user-visible fault.
    #[error(transparent)]
    Fault(#[from] RuntimeFault),
}

// =============================================================================
// Contract violations
// =============================================================================

/// A mismatch between the template catalog and the runtime-call registry.
///
/// These indicate a bug in the backend itself and are fatal in production.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// The named runtime service is not registered.
    #[error("runtime call '{0}' is not registered")]
    MissingRuntimeCall(String),

    /// The call site passes a different number of arguments.
    #[error("runtime call '{name}' takes {expected} arguments, call site passes {actual}")]
    ArityMismatch {
        /// Service name.
        name: String,
        /// Declared parameter count.
        expected: usize,
        /// Call-site argument count.
        actual: usize,
    },

    /// A parameter kind differs from the declaration.
    #[error("runtime call '{name}' parameter {index} is {expected}, call site passes {actual}")]
    ParameterKindMismatch {
        /// Service name.
        name: String,
        /// Zero-based parameter index.
        index: usize,
        /// Declared kind.
        expected: ValueKind,
        /// Call-site kind.
        actual: ValueKind,
    },

    /// The result kind differs from the declaration.
    #[error("runtime call '{name}' returns {expected}, call site expects {actual}")]
    ResultKindMismatch {
        /// Service name.
        name: String,
        /// Declared kind.
        expected: ValueKind,
        /// Call-site kind.
        actual: ValueKind,
    },

    /// No hub was supplied for a primitive array kind.
    #[error("no array hub supplied for element kind {0}")]
    MissingArrayHub(ValueKind),
}

// =============================================================================
// Codegen errors
// =============================================================================

/// A compile driver asked for a snippet the catalog cannot provide.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// Catalog construction failed.
    #[error(transparent)]
    Contract(#[from] ContractViolation),

    /// The operation has no template for this kind.
    #[error("{operation} has no template for kind {kind}")]
    InoperableKind {
        /// Operation name.
        operation: &'static str,
        /// Requested kind.
        kind: ValueKind,
    },

    /// Multi-array rank above the supported maximum.
    #[error("multi-dimensional array rank {rank} exceeds maximum {max}")]
    RankTooLarge {
        /// Requested rank.
        rank: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Multi-array rank 0.
    #[error("multi-dimensional array allocation needs at least one dimension")]
    ZeroRank,

    /// Prologue requested for a method that is not resolved.
    #[error("prologue requested for an unresolved method")]
    UnresolvedPrologue,

    /// A resolved method lacks the table index its dispatch needs.
    #[error("{0} target has no dispatch index")]
    MissingDispatchIndex(&'static str),

    /// A bytecode-to-code position map violates its ordering rules.
    #[error("invalid position map: {0}")]
    InvalidPositionMap(&'static str),

    /// The reference-map editor describes a different frame than the
    /// method being installed.
    #[error("reference maps describe a {editor}-byte frame, method frame is {method} bytes")]
    FrameLayoutMismatch {
        /// Frame size of the installed method.
        method: u32,
        /// Frame size the editor reports.
        editor: u32,
    },
}

// =============================================================================
// Runtime faults
// =============================================================================

/// A user-visible fault raised by generated code or a runtime helper.
///
/// Resolved fast paths and unresolved helper paths raise the same variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeFault {
    /// Array allocation with a negative length.
    #[error("NegativeArraySizeException: {0}")]
    NegativeArraySize(i32),

    /// Checked cast failed.
    #[error("ClassCastException: object of type {actual} is not an instance of {expected}")]
    ClassCast {
        /// Identifier of the object's type.
        actual: u32,
        /// Identifier of the target type.
        expected: u32,
    },

    /// Reference array store with an incompatible element.
    #[error("ArrayStoreException: element type {element} not assignable to component {component}")]
    ArrayStore {
        /// Identifier of the stored value's type.
        element: u32,
        /// Identifier of the array component type.
        component: u32,
    },

    /// Array index outside `[0, length)`.
    #[error("ArrayIndexOutOfBoundsException: index {index}, length {length}")]
    IndexOutOfBounds {
        /// Requested index.
        index: i32,
        /// Array length.
        length: i32,
    },

    /// Dereference of the null reference.
    #[error("NullPointerException")]
    NullPointer,

    /// Unlock of a monitor not owned by the current thread.
    #[error("IllegalMonitorStateException")]
    IllegalMonitorState,

    /// A runtime helper received an operand of the wrong shape.
    #[error("InternalError: {0}")]
    Internal(&'static str),

    /// Resolution failed.
    #[error(transparent)]
    Linkage(#[from] LinkageError),
}

/// A symbolic reference that could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkageError {
    /// No type for the referenced name.
    #[error("NoClassDefFoundError: pool entry {cpi}")]
    NoSuchType {
        /// Constant-pool index.
        cpi: u32,
    },

    /// No field for the referenced name.
    #[error("NoSuchFieldError: pool entry {cpi}")]
    NoSuchField {
        /// Constant-pool index.
        cpi: u32,
    },

    /// No method for the referenced name.
    #[error("NoSuchMethodError: pool entry {cpi}")]
    NoSuchMethod {
        /// Constant-pool index.
        cpi: u32,
    },

    /// The entry resolved to something of the wrong category.
    #[error("IncompatibleClassChangeError: {0}")]
    IncompatibleChange(&'static str),

    /// Static initialization failed.
    #[error("ExceptionInInitializerError: type {0}")]
    InitializerFailed(u32),
}
