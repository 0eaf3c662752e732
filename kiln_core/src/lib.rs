//! Kiln core types.
//!
//! Shared vocabulary for the Kiln template JIT:
//!
//! - **Value kinds**: the closed set of machine-level value categories and
//!   the kind-indexed tables templates are stored in.
//! - **Symbols**: the resolved/unresolved surface of types, fields and
//!   methods handed over by the class-metadata front end.
//! - **Guards**: identity objects naming unresolved references embedded in
//!   generated code.
//! - **Errors**: contract violations, codegen bailouts and runtime faults.
//! - **Configuration**: object layout and template options.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod guard;
pub mod kind;
pub mod symbol;

pub use config::{CodegenConfig, ObjectLayout};
pub use error::{CodegenError, ContractViolation, KilnError, KilnResult, LinkageError, RuntimeFault};
pub use guard::{GuardTarget, ResolutionGuard, ResolutionKind};
pub use kind::{KindTable, ValueKind};
pub use symbol::{
    FieldRef, HubHandle, MethodRef, PoolHandle, Representation, ResolvedField, ResolvedMethod,
    ResolvedType, TypeId, TypeRef, UnresolvedSymbol,
};
