//! Runtime services reachable from generated code.
//!
//! - [`calls`]: the static registry of named services and their bodies
//! - [`stubs`]: memoized trampolines from templates to services
//! - [`services`]: the heap, resolver and monitor collaborators
//! - [`mtable`]: the hashed method-table layout shared with the templates

pub mod calls;
pub mod mtable;
pub mod services;
pub mod stubs;
pub mod value;

pub use calls::{RuntimeCall, RuntimeCallRegistry, RuntimeEntry, STANDARD_CALLS};
pub use mtable::{HubImage, HubImageBuilder, MAX_TYPE_ID};
pub use services::{Heap, Memory, MonitorScheme, Resolver, RuntimeServices};
pub use stubs::RuntimeStubCache;
pub use value::RtValue;
