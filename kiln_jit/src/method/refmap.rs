//! Lazily computed reference maps.
//!
//! Reference maps are expensive to compute and most compiled methods are
//! never walked by the collector, so a method is installed with a
//! [`ReferenceMapEditor`] and the maps are computed on first demand.
//!
//! # Finalization protocol
//!
//! The editor lives behind an [`AtomicPtr`] with three states:
//!
//! - **Pending**: points at the boxed editor.
//! - **In progress**: points at a private marker. Exactly one thread won
//!   the compare-exchange out of Pending and is computing the maps.
//! - **Done**: null. The sealed maps are published in a [`OnceLock`].
//!
//! Callers that lose the race spin until the maps are published. They
//! never block on a lock: finalization runs inside the collector's
//! safepoint protocol, where parking a thread would look like a mutator
//! stopped at a safepoint.

use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;

use smallvec::SmallVec;
use tracing::{trace, warn};

use super::{JitStackFrameLayout, PositionMap, StackMap, StackMapBuilder, StopMap};

// =============================================================================
// Editor interface
// =============================================================================

/// Computes the reference maps of one compiled method.
pub trait ReferenceMapEditor: Send {
    /// Frame shape the maps describe.
    fn frame_layout(&self) -> JitStackFrameLayout;

    /// Whether computing the maps needs heap allocation. Such methods are
    /// finalized when installed rather than during a collection.
    fn requires_allocation(&self) -> bool {
        false
    }

    /// Build the sealed map. Called at most once per method.
    ///
    /// Must not panic: a panic leaves the method in progress forever and
    /// every other caller of [`ReferenceMapCell::finalize`] spins.
    fn fill_in_maps(&self, positions: &PositionMap) -> StackMap;
}

/// Sealed maps plus the frame layout preserved from the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMaps {
    pub stack_map: StackMap,
    pub frame_layout: JitStackFrameLayout,
}

// =============================================================================
// ReferenceMapCell
// =============================================================================

static IN_PROGRESS: u8 = 0;

#[inline]
fn in_progress<E>() -> *mut E {
    ptr::addr_of!(IN_PROGRESS).cast_mut().cast::<E>()
}

/// One-shot, lock-free holder of a method's reference maps.
pub struct ReferenceMapCell<E: ReferenceMapEditor> {
    editor: AtomicPtr<E>,
    sealed: OnceLock<ReferenceMaps>,
    _owns: PhantomData<Box<E>>,
}

impl<E: ReferenceMapEditor> ReferenceMapCell<E> {
    /// Cell in the Pending state.
    pub fn new(editor: E) -> Self {
        Self {
            editor: AtomicPtr::new(Box::into_raw(Box::new(editor))),
            sealed: OnceLock::new(),
            _owns: PhantomData,
        }
    }

    /// Cell that is already Done.
    pub fn sealed(maps: ReferenceMaps) -> Self {
        Self {
            editor: AtomicPtr::new(ptr::null_mut()),
            sealed: OnceLock::from(maps),
            _owns: PhantomData,
        }
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.sealed.get().is_some()
    }

    /// The sealed maps, if finalization has completed.
    #[inline]
    pub fn get(&self) -> Option<&ReferenceMaps> {
        self.sealed.get()
    }

    /// Compute the maps if no other thread has, then return them.
    ///
    /// Safe to call from any number of threads. The editor runs exactly
    /// once; every caller returns the same sealed maps.
    ///
    /// # Panics
    ///
    /// If the editor panics, the panic propagates to the owning caller and
    /// other callers keep spinning.
    pub fn finalize(&self, positions: &PositionMap) -> &ReferenceMaps {
        if let Some(maps) = self.sealed.get() {
            return maps;
        }
        let current = self.editor.load(Ordering::Acquire);
        if !current.is_null()
            && current != in_progress::<E>()
            && self
                .editor
                .compare_exchange(current, in_progress::<E>(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            // SAFETY: `current` came from `Box::into_raw` in `new`, and the
            // successful exchange made this thread its only owner.
            let editor = unsafe { Box::from_raw(current) };
            let maps = ReferenceMaps {
                stack_map: editor.fill_in_maps(positions),
                frame_layout: editor.frame_layout(),
            };
            trace!(stops = maps.stack_map.len(), "reference maps sealed");
            let sealed = self.sealed.get_or_init(|| maps);
            self.editor.store(ptr::null_mut(), Ordering::Release);
            return sealed;
        }
        let mut spins = 0u64;
        loop {
            if let Some(maps) = self.sealed.get() {
                if spins > 0 {
                    trace!(spins, "waited for reference maps");
                }
                return maps;
            }
            spins += 1;
            std::hint::spin_loop();
        }
    }
}

impl<E: ReferenceMapEditor> Drop for ReferenceMapCell<E> {
    fn drop(&mut self) {
        let current = *self.editor.get_mut();
        if !current.is_null() && current != in_progress::<E>() {
            // SAFETY: still Pending, so the box was never taken.
            drop(unsafe { Box::from_raw(current) });
        }
    }
}

impl<E: ReferenceMapEditor> fmt::Debug for ReferenceMapCell<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.sealed.get() {
            Some(_) => "done",
            None if self.editor.load(Ordering::Acquire) == in_progress::<E>() => "in progress",
            None => "pending",
        };
        f.debug_struct("ReferenceMapCell").field("state", &state).finish()
    }
}

// =============================================================================
// JitReferenceMapEditor
// =============================================================================

/// Basic blocks whose entry frames fit without heap scratch space.
pub const INLINE_BLOCKS: usize = 16;

/// Live references at one stop, positioned relative to its bytecode
/// instruction's template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRecord {
    /// Bytecode instruction containing the stop.
    pub bytecode_position: u32,
    /// Offset of the stop from the start of the instruction's template.
    pub template_offset: u32,
    pub register_map: u16,
    pub frame_map: u64,
}

/// Editor for template-compiled methods.
///
/// The compiler records stops per bytecode instruction while emitting
/// templates; the editor turns them into code offsets through the
/// position map once that map is final.
#[derive(Debug, Clone)]
pub struct JitReferenceMapEditor {
    frame_layout: JitStackFrameLayout,
    block_starts: SmallVec<[u32; INLINE_BLOCKS]>,
    stops: Vec<StopRecord>,
}

impl JitReferenceMapEditor {
    pub fn new(
        frame_layout: JitStackFrameLayout,
        block_starts: impl IntoIterator<Item = u32>,
        stops: Vec<StopRecord>,
    ) -> Self {
        let mut block_starts: SmallVec<[u32; INLINE_BLOCKS]> = block_starts.into_iter().collect();
        block_starts.sort_unstable();
        block_starts.dedup();
        Self {
            frame_layout,
            block_starts,
            stops,
        }
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_starts.len()
    }

    #[inline]
    pub fn stops(&self) -> &[StopRecord] {
        &self.stops
    }

    /// Index of the basic block containing `bytecode`.
    fn block_of(&self, bytecode: u32) -> usize {
        self.block_starts
            .partition_point(|&start| start <= bytecode)
            .saturating_sub(1)
    }
}

impl ReferenceMapEditor for JitReferenceMapEditor {
    fn frame_layout(&self) -> JitStackFrameLayout {
        self.frame_layout
    }

    /// Entry frames for every block are kept inline; more blocks than that
    /// spill to the heap.
    fn requires_allocation(&self) -> bool {
        self.block_starts.spilled()
    }

    fn fill_in_maps(&self, positions: &PositionMap) -> StackMap {
        let mut builder = StackMapBuilder::with_capacity(self.stops.len());
        for stop in &self.stops {
            let start = if stop.bytecode_position < positions.bytecode_length() {
                positions.forward(stop.bytecode_position)
            } else {
                0
            };
            if start == 0 {
                warn!(
                    bytecode = stop.bytecode_position,
                    "stop recorded for a position that starts no instruction"
                );
                continue;
            }
            trace!(
                bytecode = stop.bytecode_position,
                block = self.block_of(stop.bytecode_position),
                offset = start + stop.template_offset,
                "stop"
            );
            builder.add(StopMap::new(
                start + stop.template_offset,
                stop.bytecode_position,
                stop.register_map,
                stop.frame_map,
            ));
        }
        builder.finish(positions.code_length(), self.frame_layout.frame_size())
    }
}
