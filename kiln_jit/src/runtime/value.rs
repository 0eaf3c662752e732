//! Values crossing the boundary between generated code and runtime services.

use std::sync::Arc;

use kiln_core::{ResolutionGuard, ValueKind};

/// A value held in an operand slot or passed to a runtime call.
///
/// Sub-int kinds are widened to `Int` the way they are in registers.
/// References are raw heap addresses; 0 is null.
#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    /// No value.
    Void,
    /// Boolean, byte, short, char or int.
    Int(i32),
    /// Long.
    Long(i64),
    /// Float.
    Float(f32),
    /// Double.
    Double(f64),
    /// Untraced machine word.
    Word(u64),
    /// Managed reference.
    Ref(u64),
    /// Resolution guard embedded as an object constant.
    Guard(Arc<ResolutionGuard>),
}

impl RtValue {
    /// The null reference.
    pub const NULL: RtValue = RtValue::Ref(0);

    /// Decode `bits` as a value of `kind`, widening sub-int kinds.
    pub fn from_bits(kind: ValueKind, bits: u64) -> Self {
        match kind {
            ValueKind::Boolean => RtValue::Int(i32::from(bits as u8 != 0)),
            ValueKind::Byte => RtValue::Int(i32::from(bits as u8 as i8)),
            ValueKind::Short => RtValue::Int(i32::from(bits as u16 as i16)),
            ValueKind::Char => RtValue::Int(i32::from(bits as u16)),
            ValueKind::Int => RtValue::Int(bits as u32 as i32),
            ValueKind::Float => RtValue::Float(f32::from_bits(bits as u32)),
            ValueKind::Long => RtValue::Long(bits as i64),
            ValueKind::Double => RtValue::Double(f64::from_bits(bits)),
            ValueKind::Object => RtValue::Ref(bits),
            ValueKind::Word => RtValue::Word(bits),
            ValueKind::Void | ValueKind::Jsr | ValueKind::Illegal => RtValue::Void,
        }
    }

    /// Raw bits, ints sign-extended. `None` for void and guards.
    pub fn to_bits(&self) -> Option<u64> {
        match *self {
            RtValue::Int(v) => Some(i64::from(v) as u64),
            RtValue::Long(v) => Some(v as u64),
            RtValue::Float(v) => Some(u64::from(v.to_bits())),
            RtValue::Double(v) => Some(v.to_bits()),
            RtValue::Word(v) | RtValue::Ref(v) => Some(v),
            RtValue::Void | RtValue::Guard(_) => None,
        }
    }

    /// The value as an int, if it is one.
    #[inline]
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            RtValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// The value as an address (reference or word).
    #[inline]
    pub fn as_address(&self) -> Option<u64> {
        match *self {
            RtValue::Ref(v) | RtValue::Word(v) => Some(v),
            _ => None,
        }
    }

    /// The embedded guard, if any.
    #[inline]
    pub fn as_guard(&self) -> Option<&Arc<ResolutionGuard>> {
        match self {
            RtValue::Guard(g) => Some(g),
            _ => None,
        }
    }

    /// Whether this is the null reference.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, RtValue::Ref(0))
    }
}
