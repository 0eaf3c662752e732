//! Per-method metadata for template-compiled code.
//!
//! A [`CompiledMethod`] carries two pieces of metadata that make the code
//! walkable and debuggable:
//!
//! - the [`PositionMap`] from bytecode offsets to code offsets, written
//!   once by the compiler and immutable from installation;
//! - the reference maps, computed at most once on first demand by a
//!   [`ReferenceMapEditor`] through a lock-free [`ReferenceMapCell`].

mod compiled;
mod frame;
mod position;
mod refmap;
mod stackmap;

pub use compiled::{CompiledMethod, CompiledMethodParts};
pub use frame::JitStackFrameLayout;
pub use position::{CodeTranslation, CodeTranslations, PositionMap};
pub use refmap::{
    JitReferenceMapEditor, ReferenceMapCell, ReferenceMapEditor, ReferenceMaps, StopRecord,
    INLINE_BLOCKS,
};
pub use stackmap::{LiveBits, StackMap, StackMapBuilder, StopMap};
