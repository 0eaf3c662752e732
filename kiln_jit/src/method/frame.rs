//! Activation frame shape of template-compiled methods.

/// Frame size and the location of the reference-tracked slot area.
///
/// The reference-map area starts `frame_reference_map_offset` bytes from
/// the frame pointer and spans `frame_reference_map_size` bytes, one
/// [`StopMap`](super::StopMap) frame bit per word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitStackFrameLayout {
    frame_size: u32,
    frame_reference_map_offset: i32,
    frame_reference_map_size: u32,
}

impl JitStackFrameLayout {
    pub const fn new(
        frame_size: u32,
        frame_reference_map_offset: i32,
        frame_reference_map_size: u32,
    ) -> Self {
        Self {
            frame_size,
            frame_reference_map_offset,
            frame_reference_map_size,
        }
    }

    /// Layout for `locals` local slots and `max_stack` operand slots, with
    /// every slot reference-tracked and stored below the frame pointer.
    pub fn for_slots(locals: u32, max_stack: u32, word_size: u32) -> Self {
        let size = (locals + max_stack) * word_size;
        Self::new(size, -(size as i32), size)
    }

    #[inline]
    pub const fn frame_size(&self) -> u32 {
        self.frame_size
    }

    #[inline]
    pub const fn frame_reference_map_offset(&self) -> i32 {
        self.frame_reference_map_offset
    }

    #[inline]
    pub const fn frame_reference_map_size(&self) -> u32 {
        self.frame_reference_map_size
    }

    /// Number of frame slots the reference map covers.
    #[inline]
    pub const fn reference_slots(&self, word_size: u32) -> u32 {
        self.frame_reference_map_size / word_size
    }

    /// Address of the first reference-tracked slot for a frame at
    /// `frame_pointer`.
    #[inline]
    pub fn reference_area(&self, frame_pointer: usize) -> usize {
        frame_pointer.wrapping_add_signed(self.frame_reference_map_offset as isize)
    }
}
