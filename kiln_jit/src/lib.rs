//! Template JIT backend for Kiln.
//!
//! - XIR template language, assembler and evaluator
//! - Runtime services and memoized runtime-call stubs
//! - Template catalog with snippet generators for every operation family
//! - Compiled-method metadata: position maps and lazily sealed reference maps
#![deny(unsafe_op_in_unsafe_fn)]
pub mod method;
pub mod runtime;
pub mod template;
pub mod xir;

pub use method::{CompiledMethod, CompiledMethodParts, PositionMap};
pub use template::TemplateCatalog;
pub use xir::{Snippet, TemplateAssembler, XirArgument, XirTemplate};
