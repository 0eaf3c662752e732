//! Bytecode-to-native position map.
//!
//! Entry `b` holds the code offset where the template for the bytecode
//! instruction starting at `b` begins, or 0 when `b` is inside an
//! instruction. The final entry (index = bytecode length) holds the offset
//! one past the last byte emitted for the last instruction.
//!
//! Code before `forward(0)` is the adapter and prologue; code at or after
//! the sentinel is out-of-line (slow paths, stubs, epilogue).

use std::fmt;
use std::iter::FusedIterator;
use std::ops::Range;

use kiln_core::CodegenError;

// =============================================================================
// PositionMap
// =============================================================================

/// Immutable mapping between bytecode offsets and native code offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionMap {
    entries: Box<[u32]>,
    code_length: u32,
}

impl PositionMap {
    /// Validate and wrap a position table produced by the compiler.
    ///
    /// `entries` must hold one entry per bytecode offset plus the sentinel,
    /// with a nonzero first entry, nonzero sentinel, non-decreasing nonzero
    /// entries and a sentinel no greater than `code_length`.
    pub fn new(entries: Vec<u32>, code_length: u32) -> Result<Self, CodegenError> {
        if entries.len() < 2 {
            return Err(CodegenError::InvalidPositionMap(
                "needs at least one bytecode and the sentinel",
            ));
        }
        if entries[0] == 0 {
            return Err(CodegenError::InvalidPositionMap(
                "bytecode 0 has no code position",
            ));
        }
        let sentinel = entries[entries.len() - 1];
        if sentinel == 0 {
            return Err(CodegenError::InvalidPositionMap("sentinel entry is zero"));
        }
        if sentinel > code_length {
            return Err(CodegenError::InvalidPositionMap(
                "sentinel lies beyond the end of the code",
            ));
        }
        let mut previous = 0;
        for &entry in entries.iter().filter(|&&e| e != 0) {
            if entry < previous {
                return Err(CodegenError::InvalidPositionMap(
                    "code positions decrease",
                ));
            }
            previous = entry;
        }
        Ok(Self {
            entries: entries.into_boxed_slice(),
            code_length,
        })
    }

    /// Length of the method's bytecode.
    #[inline]
    pub fn bytecode_length(&self) -> u32 {
        (self.entries.len() - 1) as u32
    }

    /// Length of the method's native code.
    #[inline]
    pub fn code_length(&self) -> u32 {
        self.code_length
    }

    /// Code offset of the first bytecode instruction.
    #[inline]
    pub fn code_start(&self) -> u32 {
        self.entries[0]
    }

    /// Code offset one past the last bytecode instruction's template.
    #[inline]
    pub fn sentinel(&self) -> u32 {
        self.entries[self.entries.len() - 1]
    }

    /// Raw entries, sentinel included.
    #[inline]
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Code offset for `bytecode`; 0 when `bytecode` is not an instruction
    /// start.
    ///
    /// # Panics
    ///
    /// Panics if `bytecode` is greater than the bytecode length.
    #[inline]
    pub fn forward(&self, bytecode: u32) -> u32 {
        self.entries[bytecode as usize]
    }

    /// Start of the bytecode instruction whose template contains
    /// `code_offset`.
    ///
    /// Returns `None` for offsets in the adapter or prologue and for offsets
    /// at or past the sentinel. When several instructions start at the same
    /// code position the last of them wins.
    pub fn backward(&self, code_offset: u32) -> Option<u32> {
        if code_offset < self.entries[0] {
            return None;
        }
        let mut found = None;
        for (bytecode, &entry) in self.entries.iter().enumerate() {
            if entry == 0 {
                continue;
            }
            if entry > code_offset {
                return found;
            }
            found = Some(bytecode as u32);
        }
        None
    }

    /// Lazy sequence of translations covering `[0, code_length)` in order.
    pub fn code_translations(&self) -> CodeTranslations<'_> {
        CodeTranslations {
            map: self,
            cursor: 0,
            start_bytecode: 0,
            start_code: 0,
            finished: false,
        }
    }
}

// =============================================================================
// CodeTranslation
// =============================================================================

/// One bytecode range and the native range implementing it.
///
/// A zero `bytecode_length` marks code that implements no bytecode, such
/// as the prologue or trailing out-of-line code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeTranslation {
    /// First bytecode offset; meaningless when `bytecode_length` is 0.
    pub bytecode_position: u32,
    /// Number of bytecode bytes.
    pub bytecode_length: u32,
    /// First code offset; meaningless when `code_length` is 0.
    pub code_position: u32,
    /// Number of code bytes.
    pub code_length: u32,
}

impl CodeTranslation {
    #[inline]
    pub const fn new(
        bytecode_position: u32,
        bytecode_length: u32,
        code_position: u32,
        code_length: u32,
    ) -> Self {
        Self {
            bytecode_position,
            bytecode_length,
            code_position,
            code_length,
        }
    }

    /// Bytecode range, or `None` for non-bytecode code.
    pub fn bytecode_range(&self) -> Option<Range<u32>> {
        (self.bytecode_length != 0)
            .then(|| self.bytecode_position..self.bytecode_position + self.bytecode_length)
    }

    /// Native code range.
    #[inline]
    pub fn code_range(&self) -> Range<u32> {
        self.code_position..self.code_position + self.code_length
    }

    /// Slice of `bytecode` this translation covers.
    pub fn bytecode_block<'b>(&self, bytecode: &'b [u8]) -> Option<&'b [u8]> {
        let range = self.bytecode_range()?;
        bytecode.get(range.start as usize..range.end as usize)
    }
}

impl fmt::Display for CodeTranslation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bytecode_range() {
            Some(r) => write!(f, "[{} - {}]", r.start, r.end - 1)?,
            None => f.write_str("[]")?,
        }
        f.write_str(" -> ")?;
        if self.code_length == 0 {
            f.write_str("[]")
        } else {
            let r = self.code_range();
            write!(f, "[{} - {}]", r.start, r.end - 1)
        }
    }
}

// =============================================================================
// CodeTranslations
// =============================================================================

/// Iterator returned by [`PositionMap::code_translations`].
#[derive(Debug, Clone)]
pub struct CodeTranslations<'a> {
    map: &'a PositionMap,
    cursor: usize,
    start_bytecode: u32,
    start_code: u32,
    finished: bool,
}

impl Iterator for CodeTranslations<'_> {
    type Item = CodeTranslation;

    fn next(&mut self) -> Option<CodeTranslation> {
        if self.finished {
            return None;
        }
        let entries = &self.map.entries;
        if self.cursor == 0 {
            self.cursor = 1;
            self.start_code = entries[0];
            return Some(CodeTranslation::new(0, 0, 0, entries[0]));
        }
        while self.cursor < entries.len() {
            let bytecode = self.cursor as u32;
            let entry = entries[self.cursor];
            self.cursor += 1;
            if entry != 0 {
                let translation = CodeTranslation::new(
                    self.start_bytecode,
                    bytecode - self.start_bytecode,
                    self.start_code,
                    entry - self.start_code,
                );
                self.start_bytecode = bytecode;
                self.start_code = entry;
                return Some(translation);
            }
        }
        self.finished = true;
        let code_length = self.map.code_length;
        (self.start_code < code_length).then(|| {
            CodeTranslation::new(0, 0, self.start_code, code_length - self.start_code)
        })
    }
}

impl FusedIterator for CodeTranslations<'_> {}
