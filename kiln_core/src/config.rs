//! Code generation configuration.
//!
//! The object layout is supplied by the VM; everything else tunes which
//! templates are built and how compiled-method metadata is finalized.

/// Byte offsets of the object and hub fields baked into templates.
///
/// Arrays are laid out as `[hub word][length i32 + pad][elements...]`. A hub
/// is itself a hybrid object whose word array holds the vtable, itable and
/// the 32-bit method-table redirection region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLayout {
    /// Target word size in bytes.
    ///
    /// Default: 8
    pub word_size: u32,

    /// Offset of the hub pointer in every object.
    ///
    /// Default: 0
    pub hub_offset: i32,

    /// Offset of the 32-bit length in arrays and hybrids.
    ///
    /// Default: 8
    pub array_length_offset: i32,

    /// Offset of element 0 in arrays and of word 0 in hub word arrays.
    ///
    /// Default: 16
    pub first_element_offset: i32,

    // =========================================================================
    // Hub fields
    // =========================================================================
    /// Offset of the component hub in an array hub (0 for non-arrays).
    ///
    /// Default: 16
    pub component_hub_offset: i32,

    /// Offset of the type identifier in a hub.
    ///
    /// Default: 24
    pub type_id_offset: i32,

    /// Offset of the 32-bit method-table length in a hub.
    ///
    /// Default: 28
    pub mtable_length_offset: i32,

    /// Offset of the 32-bit method-table start index in a hub.
    ///
    /// Default: 32
    pub mtable_start_index_offset: i32,

    /// Offset of the hub's first vtable/itable word.
    ///
    /// Default: 40
    pub hub_words_offset: i32,

    // =========================================================================
    // Thread locals
    // =========================================================================
    /// Offset of the exception-thread-locals pointer in the thread locals
    /// block reached through the latch register.
    ///
    /// Default: 64
    pub etla_offset: i32,

    /// Offset of the pending exception object slot in the thread locals.
    ///
    /// Default: 72
    pub exception_object_offset: i32,
}

impl ObjectLayout {
    /// Byte offset of a hub's `index`-th word.
    #[inline]
    pub const fn hub_word_offset(&self, index: u32) -> i32 {
        self.hub_words_offset + (index * self.word_size) as i32
    }

    /// log2 of the word size, used as a load scale.
    #[inline]
    pub const fn word_scale(&self) -> u8 {
        self.word_size.trailing_zeros() as u8
    }
}

impl Default for ObjectLayout {
    fn default() -> Self {
        Self {
            word_size: 8,
            hub_offset: 0,
            array_length_offset: 8,
            first_element_offset: 16,

            component_hub_offset: 16,
            type_id_offset: 24,
            mtable_length_offset: 28,
            mtable_start_index_offset: 32,
            hub_words_offset: 40,

            etla_offset: 64,
            exception_object_offset: 72,
        }
    }
}

/// Highest rank with a dedicated allocation helper.
pub const MAX_FIXED_RANK: usize = 3;

/// Configuration for the template catalog and compiled-method records.
///
/// # Example
///
/// ```ignore
/// use kiln_core::CodegenConfig;
///
/// let config = CodegenConfig {
///     print_templates: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CodegenConfig {
    /// Target object layout.
    pub layout: ObjectLayout,

    // =========================================================================
    // Multi-dimensional arrays
    // =========================================================================
    /// Ranks strictly below this are allocated by a fixed-rank helper when
    /// the array type is resolved.
    ///
    /// Larger ranks, and every unresolved rank, go through the generic
    /// rank-N helper. Fixed-rank helpers exist up to rank 3.
    ///
    /// Default: 2
    pub small_multi_array_rank: usize,

    /// Highest rank for which templates are built at all.
    ///
    /// Default: 6
    pub max_multi_array_rank: usize,

    // =========================================================================
    // Debugging
    // =========================================================================
    /// Trace every template listing as it is built.
    ///
    /// Default: false
    pub print_templates: bool,

    /// Finalize reference maps when a compiled method is created rather
    /// than on first use by the collector.
    ///
    /// Default: false
    pub eager_reference_maps: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            layout: ObjectLayout::default(),
            small_multi_array_rank: 2,
            max_multi_array_rank: 6,
            print_templates: false,
            eager_reference_maps: false,
        }
    }
}

impl CodegenConfig {
    /// Configuration for tests: small rank limits and eager maps so that
    /// finalization bugs surface at record creation.
    pub fn for_testing() -> Self {
        Self {
            max_multi_array_rank: 4,
            eager_reference_maps: true,
            ..Default::default()
        }
    }

    /// Whether a resolved allocation of this rank uses a fixed-rank helper.
    #[inline]
    pub fn is_small_rank(&self, rank: usize) -> bool {
        rank < self.small_multi_array_rank && rank <= MAX_FIXED_RANK
    }
}
