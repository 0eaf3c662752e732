//! Sealed reference maps for a compiled method.
//!
//! A [`StackMap`] records, for every stop in a method (call return sites
//! and safepoint polls), which registers and which frame slots hold object
//! references. Stops are kept sorted by code offset so the collector can
//! find the stop for a return address with a binary search.
//!
//! Frame slots are numbered from the frame reference-map offset of the
//! method's [`JitStackFrameLayout`](super::JitStackFrameLayout), one bit
//! per word.

// =============================================================================
// StopMap
// =============================================================================

/// Live references at one stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopMap {
    /// Code offset of the stop within the method.
    pub code_offset: u32,
    /// Bytecode instruction the stop belongs to.
    pub bytecode_position: u32,
    /// Bit `r` set when register `r` holds a reference.
    pub register_map: u16,
    /// Bit `s` set when frame slot `s` holds a reference.
    pub frame_map: u64,
}

impl StopMap {
    #[inline]
    pub const fn new(code_offset: u32, bytecode_position: u32, register_map: u16, frame_map: u64) -> Self {
        Self {
            code_offset,
            bytecode_position,
            register_map,
            frame_map,
        }
    }

    #[inline]
    pub const fn is_register_live(&self, register: u8) -> bool {
        register < 16 && (self.register_map & (1 << register)) != 0
    }

    #[inline]
    pub const fn is_slot_live(&self, slot: u8) -> bool {
        slot < 64 && (self.frame_map & (1 << slot)) != 0
    }

    /// Number of references the collector must visit at this stop.
    #[inline]
    pub const fn reference_count(&self) -> u32 {
        self.register_map.count_ones() + self.frame_map.count_ones()
    }

    #[inline]
    pub fn live_registers(&self) -> LiveBits {
        LiveBits(self.register_map as u64)
    }

    #[inline]
    pub fn live_slots(&self) -> LiveBits {
        LiveBits(self.frame_map)
    }
}

// =============================================================================
// LiveBits
// =============================================================================

/// Indices of the set bits of a reference bitmap, lowest first.
#[derive(Debug, Clone)]
pub struct LiveBits(u64);

impl Iterator for LiveBits {
    type Item = u8;

    #[inline]
    fn next(&mut self) -> Option<u8> {
        if self.0 == 0 {
            return None;
        }
        let index = self.0.trailing_zeros() as u8;
        self.0 &= self.0 - 1;
        Some(index)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.0.count_ones() as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for LiveBits {}

// =============================================================================
// StackMap
// =============================================================================

/// Reference maps for all stops of one method, sorted by code offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackMap {
    code_size: u32,
    frame_size: u32,
    stops: Box<[StopMap]>,
}

impl StackMap {
    /// Map with no stops, for methods compiled without any.
    pub fn empty(code_size: u32, frame_size: u32) -> Self {
        Self {
            code_size,
            frame_size,
            stops: Box::default(),
        }
    }

    fn from_stops(code_size: u32, frame_size: u32, mut stops: Vec<StopMap>) -> Self {
        stops.sort_by_key(|stop| stop.code_offset);
        debug_assert!(stops.windows(2).all(|w| w[0].code_offset <= w[1].code_offset));
        Self {
            code_size,
            frame_size,
            stops: stops.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    #[inline]
    pub fn stops(&self) -> &[StopMap] {
        &self.stops
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Stop at `offset` exactly.
    pub fn stop_at(&self, offset: u32) -> Option<&StopMap> {
        self.stops
            .binary_search_by_key(&offset, |stop| stop.code_offset)
            .ok()
            .map(|idx| &self.stops[idx])
    }

    /// Stop at `offset`, or the nearest one before it.
    ///
    /// Offsets outside the method's code, or before its first stop, have
    /// no map.
    pub fn lookup_offset(&self, offset: u32) -> Option<&StopMap> {
        if offset >= self.code_size {
            return None;
        }
        match self
            .stops
            .binary_search_by_key(&offset, |stop| stop.code_offset)
        {
            Ok(idx) => Some(&self.stops[idx]),
            Err(0) => None,
            Err(idx) => Some(&self.stops[idx - 1]),
        }
    }

    /// Like [`lookup_offset`](Self::lookup_offset), for an absolute
    /// return address into code loaded at `code_start`.
    pub fn lookup_address(&self, code_start: usize, address: usize) -> Option<&StopMap> {
        let offset = address.checked_sub(code_start)?;
        self.lookup_offset(u32::try_from(offset).ok()?)
    }
}

// =============================================================================
// StackMapBuilder
// =============================================================================

/// Accumulates stops in any order and seals them into a [`StackMap`].
#[derive(Debug, Default)]
pub struct StackMapBuilder {
    stops: Vec<StopMap>,
}

impl StackMapBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stops: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn add(&mut self, stop: StopMap) {
        self.stops.push(stop);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn finish(self, code_size: u32, frame_size: u32) -> StackMap {
        StackMap::from_stops(code_size, frame_size, self.stops)
    }
}
