//! The installed form of a template-compiled method.

use kiln_core::{CodegenConfig, CodegenError};
use tracing::debug;

use super::{
    JitReferenceMapEditor, JitStackFrameLayout, PositionMap, ReferenceMapCell, ReferenceMapEditor,
    ReferenceMaps, StackMap,
};

// =============================================================================
// Parts
// =============================================================================

/// Everything the compiler produced for one method, before installation.
#[derive(Debug, Clone, Default)]
pub struct CompiledMethodParts {
    /// Method name, for diagnostics.
    pub name: String,
    /// Native code.
    pub code: Vec<u8>,
    /// Code offsets of the call instructions, direct calls first.
    pub stop_positions: Vec<u32>,
    /// Leading entries of `stop_positions` that are direct calls.
    pub direct_call_count: usize,
    /// Bit `i` set when direct call `i` targets a runtime service entry
    /// point rather than another compiled method.
    pub direct_calls_to_runtime: Option<Vec<u8>>,
    /// Raw bytes of the scalar literal pool.
    pub scalar_literals: Vec<u8>,
    /// Word-sized reference literals.
    pub reference_literals: Vec<u64>,
    /// Size of the adapter code at the optimized-caller entry point.
    pub optimized_caller_adapter_frame_code_size: u32,
    /// Position the adapter code returns to, if there is an adapter.
    pub adapter_return_position: Option<u32>,
}

// =============================================================================
// CompiledMethod
// =============================================================================

/// Code plus the metadata a stack walker needs: positions and lazily
/// computed reference maps.
#[derive(Debug)]
pub struct CompiledMethod<E: ReferenceMapEditor = JitReferenceMapEditor> {
    parts: CompiledMethodParts,
    positions: PositionMap,
    frame_layout: JitStackFrameLayout,
    reference_maps: ReferenceMapCell<E>,
}

impl<E: ReferenceMapEditor> CompiledMethod<E> {
    /// Install a method.
    ///
    /// `editor` is `None` for methods without stops; their maps are sealed
    /// and empty from the start. Otherwise the maps are computed now if the
    /// editor would allocate or the configuration asks for eager maps, and
    /// on first demand otherwise.
    ///
    /// The position map must cover exactly the installed code, and an
    /// editor must describe `frame_layout`.
    pub fn new(
        parts: CompiledMethodParts,
        positions: PositionMap,
        frame_layout: JitStackFrameLayout,
        editor: Option<E>,
        config: &CodegenConfig,
    ) -> Result<Self, CodegenError> {
        if usize::try_from(positions.code_length()).ok() != Some(parts.code.len()) {
            return Err(CodegenError::InvalidPositionMap(
                "code length differs from installed code",
            ));
        }
        let reference_maps = match editor {
            None => ReferenceMapCell::sealed(ReferenceMaps {
                stack_map: StackMap::empty(positions.code_length(), frame_layout.frame_size()),
                frame_layout,
            }),
            Some(editor) => {
                let described = editor.frame_layout();
                if described != frame_layout {
                    return Err(CodegenError::FrameLayoutMismatch {
                        method: frame_layout.frame_size(),
                        editor: described.frame_size(),
                    });
                }
                let eager = editor.requires_allocation() || config.eager_reference_maps;
                let cell = ReferenceMapCell::new(editor);
                if eager {
                    cell.finalize(&positions);
                }
                cell
            }
        };
        debug!(
            method = %parts.name,
            code = parts.code.len(),
            stops = parts.stop_positions.len(),
            finalized = reference_maps.is_finalized(),
            "compiled method installed"
        );
        Ok(Self {
            parts,
            positions,
            frame_layout,
            reference_maps,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.parts.name
    }

    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.parts.code
    }

    #[inline]
    pub fn scalar_literals(&self) -> &[u8] {
        &self.parts.scalar_literals
    }

    #[inline]
    pub fn reference_literals(&self) -> &[u64] {
        &self.parts.reference_literals
    }

    #[inline]
    pub fn positions(&self) -> &PositionMap {
        &self.positions
    }

    #[inline]
    pub fn stop_positions(&self) -> &[u32] {
        &self.parts.stop_positions
    }

    #[inline]
    pub fn direct_call_count(&self) -> usize {
        self.parts.direct_call_count
    }

    #[inline]
    pub fn optimized_caller_adapter_frame_code_size(&self) -> u32 {
        self.parts.optimized_caller_adapter_frame_code_size
    }

    #[inline]
    pub fn adapter_return_position(&self) -> Option<u32> {
        self.parts.adapter_return_position
    }

    /// Frame layout; available whether or not the maps are sealed.
    #[inline]
    pub fn stack_frame_layout(&self) -> JitStackFrameLayout {
        self.frame_layout
    }

    /// Whether direct call `stop_index` goes to a runtime service.
    pub fn is_direct_call_to_runtime(&self, stop_index: usize) -> bool {
        if stop_index >= self.parts.direct_call_count {
            return false;
        }
        self.parts
            .direct_calls_to_runtime
            .as_deref()
            .and_then(|bits| bits.get(stop_index / 8))
            .is_some_and(|byte| byte & (1 << (stop_index % 8)) != 0)
    }

    /// Whether direct call `index` is emitted before the first bytecode,
    /// i.e. belongs to the adapter or prologue.
    pub fn is_direct_callee_in_prologue(&self, index: usize) -> bool {
        index < self.parts.direct_call_count
            && self
                .parts
                .stop_positions
                .get(index)
                .is_some_and(|&stop| stop < self.positions.code_start())
    }

    /// Bytecode instruction containing `code_offset`, if any.
    #[inline]
    pub fn bytecode_position_for(&self, code_offset: u32) -> Option<u32> {
        self.positions.backward(code_offset)
    }

    /// Bytecode instruction of the call that returns to
    /// `return_offset`.
    ///
    /// The call instruction ends at the return address, so the byte before
    /// it is looked up.
    pub fn call_site_bytecode_position(&self, return_offset: u32) -> Option<u32> {
        self.positions.backward(return_offset.checked_sub(1)?)
    }

    /// Seal the reference maps, computing them if no thread has yet.
    pub fn finalize_reference_maps(&self) -> &ReferenceMaps {
        self.reference_maps.finalize(&self.positions)
    }

    #[inline]
    pub fn are_reference_maps_finalized(&self) -> bool {
        self.reference_maps.is_finalized()
    }

    /// Sealed stack map, finalizing first if needed.
    pub fn stack_map(&self) -> &StackMap {
        &self.finalize_reference_maps().stack_map
    }
}
