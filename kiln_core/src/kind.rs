//! Value kinds shared by the template catalog and the runtime-call registry.
//!
//! A [`ValueKind`] is the machine-level category of a value flowing through
//! generated code. The set is closed: every template family is indexed by it
//! through a [`KindTable`], never by dynamic dispatch.
//!
//! Two members, [`ValueKind::Jsr`] and [`ValueKind::Illegal`], are sentinels
//! that exist only so the front end can describe every bytecode slot; no
//! template is ever generated for them.

use std::fmt;

// =============================================================================
// ValueKind
// =============================================================================

/// Machine-level category of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueKind {
    /// 8-bit boolean.
    Boolean = 0,
    /// 8-bit signed integer.
    Byte = 1,
    /// 16-bit signed integer.
    Short = 2,
    /// 16-bit unsigned character.
    Char = 3,
    /// 32-bit signed integer.
    Int = 4,
    /// 32-bit IEEE float.
    Float = 5,
    /// 64-bit signed integer.
    Long = 6,
    /// 64-bit IEEE float.
    Double = 7,
    /// Managed reference, traced by the collector.
    Object = 8,
    /// Untraced machine word (addresses, code pointers).
    Word = 9,
    /// No value.
    Void = 10,
    /// Subroutine return address sentinel. Never operable.
    Jsr = 11,
    /// Uninitialized slot sentinel. Never operable.
    Illegal = 12,
}

impl ValueKind {
    /// Number of kinds, sentinels included.
    pub const COUNT: usize = 13;

    /// Every kind in ordinal order.
    pub const ALL: [ValueKind; Self::COUNT] = [
        ValueKind::Boolean,
        ValueKind::Byte,
        ValueKind::Short,
        ValueKind::Char,
        ValueKind::Int,
        ValueKind::Float,
        ValueKind::Long,
        ValueKind::Double,
        ValueKind::Object,
        ValueKind::Word,
        ValueKind::Void,
        ValueKind::Jsr,
        ValueKind::Illegal,
    ];

    /// Ordinal used to index kind tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether templates are generated for this kind at all.
    #[inline]
    pub const fn is_operable(self) -> bool {
        !matches!(self, ValueKind::Jsr | ValueKind::Illegal)
    }

    /// Whether this kind can be the type of a field, array element or
    /// parameter (operable and not void).
    #[inline]
    pub const fn is_storable(self) -> bool {
        self.is_operable() && !matches!(self, ValueKind::Void)
    }

    /// Whether values of this kind are references the collector must trace.
    #[inline]
    pub const fn is_reference(self) -> bool {
        matches!(self, ValueKind::Object)
    }

    /// Whether this is a non-reference storable kind.
    #[inline]
    pub const fn is_primitive(self) -> bool {
        self.is_storable() && !self.is_reference()
    }

    /// Size of a value of this kind in memory, given the target word size.
    ///
    /// Returns 0 for `Void` and the sentinels.
    #[inline]
    pub const fn size_in_bytes(self, word_size: u32) -> u32 {
        match self {
            ValueKind::Boolean | ValueKind::Byte => 1,
            ValueKind::Short | ValueKind::Char => 2,
            ValueKind::Int | ValueKind::Float => 4,
            ValueKind::Long | ValueKind::Double => 8,
            ValueKind::Object | ValueKind::Word => word_size,
            ValueKind::Void | ValueKind::Jsr | ValueKind::Illegal => 0,
        }
    }

    /// Lower-case name used in template names.
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Byte => "byte",
            ValueKind::Short => "short",
            ValueKind::Char => "char",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Long => "long",
            ValueKind::Double => "double",
            ValueKind::Object => "object",
            ValueKind::Word => "word",
            ValueKind::Void => "void",
            ValueKind::Jsr => "jsr",
            ValueKind::Illegal => "illegal",
        }
    }

    /// Iterate over all kinds that can be stored (operable, non-void).
    pub fn storable() -> impl Iterator<Item = ValueKind> {
        Self::ALL.into_iter().filter(|k| k.is_storable())
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// KindTable
// =============================================================================

/// Fixed-size table indexed by [`ValueKind`].
///
/// Slots for kinds a template family does not cover stay `None`.
#[derive(Debug, Clone)]
pub struct KindTable<T> {
    slots: [Option<T>; ValueKind::COUNT],
}

impl<T> KindTable<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Build a table by calling `f` for every kind accepted by `filter`.
    pub fn build<F, P>(filter: P, mut f: F) -> Self
    where
        P: Fn(ValueKind) -> bool,
        F: FnMut(ValueKind) -> T,
    {
        let mut table = Self::new();
        for kind in ValueKind::ALL {
            if filter(kind) {
                table.slots[kind.index()] = Some(f(kind));
            }
        }
        table
    }

    /// Build a table, stopping at the first error.
    pub fn try_build<F, P, E>(filter: P, mut f: F) -> Result<Self, E>
    where
        P: Fn(ValueKind) -> bool,
        F: FnMut(ValueKind) -> Result<T, E>,
    {
        let mut table = Self::new();
        for kind in ValueKind::ALL {
            if filter(kind) {
                table.slots[kind.index()] = Some(f(kind)?);
            }
        }
        Ok(table)
    }

    /// Store a value for `kind`.
    #[inline]
    pub fn set(&mut self, kind: ValueKind, value: T) {
        self.slots[kind.index()] = Some(value);
    }

    /// Look up the value for `kind`.
    #[inline]
    pub fn get(&self, kind: ValueKind) -> Option<&T> {
        self.slots[kind.index()].as_ref()
    }

    /// Iterate over populated entries in kind order.
    pub fn iter(&self) -> impl Iterator<Item = (ValueKind, &T)> {
        ValueKind::ALL
            .into_iter()
            .zip(self.slots.iter())
            .filter_map(|(kind, slot)| slot.as_ref().map(|v| (kind, v)))
    }

    /// Number of populated entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether no entry is populated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for KindTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_match_all() {
        for (i, kind) in ValueKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_sentinels_not_operable() {
        assert!(!ValueKind::Jsr.is_operable());
        assert!(!ValueKind::Illegal.is_operable());
        assert!(ValueKind::Void.is_operable());
        assert!(!ValueKind::Void.is_storable());
    }

    #[test]
    fn test_storable_kinds() {
        let kinds: Vec<_> = ValueKind::storable().collect();
        assert_eq!(kinds.len(), 10);
        assert!(kinds.contains(&ValueKind::Word));
        assert!(!kinds.contains(&ValueKind::Void));
    }

    #[test]
    fn test_sizes() {
        assert_eq!(ValueKind::Boolean.size_in_bytes(8), 1);
        assert_eq!(ValueKind::Char.size_in_bytes(8), 2);
        assert_eq!(ValueKind::Float.size_in_bytes(8), 4);
        assert_eq!(ValueKind::Double.size_in_bytes(8), 8);
        assert_eq!(ValueKind::Object.size_in_bytes(4), 4);
        assert_eq!(ValueKind::Void.size_in_bytes(8), 0);
    }

    #[test]
    fn test_reference_and_primitive() {
        assert!(ValueKind::Object.is_reference());
        assert!(!ValueKind::Object.is_primitive());
        assert!(ValueKind::Word.is_primitive());
        assert!(!ValueKind::Illegal.is_primitive());
    }

    #[test]
    fn test_kind_table_build() {
        let table = KindTable::build(ValueKind::is_storable, |k| k.name().len());
        assert_eq!(table.len(), 10);
        assert_eq!(table.get(ValueKind::Int), Some(&3));
        assert!(table.get(ValueKind::Void).is_none());
        assert!(table.get(ValueKind::Jsr).is_none());
    }

    #[test]
    fn test_kind_table_try_build_stops_on_error() {
        let result: Result<KindTable<u8>, ValueKind> =
            KindTable::try_build(ValueKind::is_operable, |k| {
                if k == ValueKind::Float { Err(k) } else { Ok(0) }
            });
        assert_eq!(result.unwrap_err(), ValueKind::Float);
    }
}
