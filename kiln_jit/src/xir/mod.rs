//! XIR: the machine-level template language.
//!
//! A template is a small straight-line program over typed operands with an
//! inline fast path and an out-of-line slow path. Templates are recorded
//! once through [`TemplateAssembler`] and are immutable afterwards; the
//! compiler binds them to call-site arguments as [`Snippet`]s and lowers
//! them to machine code through the external instruction encoder.
//!
//! The [`eval`] module interprets templates directly, which is how the
//! template semantics are tested without an encoder.

mod assembler;
pub mod eval;
mod snippet;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use kiln_core::ValueKind;
use smallvec::SmallVec;

use crate::runtime::RuntimeCall;

pub use assembler::TemplateAssembler;
pub use snippet::{ObjectConstant, Snippet, ValueId, XirArgument};

/// Register name bound to the safepoint latch (thread locals pointer).
pub const LATCH_REGISTER: &str = "r14";

// =============================================================================
// Operands
// =============================================================================

/// Handle to an operand slot of the template being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XirOperand {
    index: u16,
    kind: ValueKind,
}

impl XirOperand {
    #[inline]
    pub(crate) const fn new(index: u16, kind: ValueKind) -> Self {
        Self { index, kind }
    }

    /// Slot index within the template.
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Value kind of the slot.
    #[inline]
    pub const fn kind(self) -> ValueKind {
        self.kind
    }
}

/// Compile-time constant operand value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XirConstant {
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Machine word.
    Word(u64),
    /// Boolean.
    Boolean(bool),
    /// The null reference.
    Null,
}

impl XirConstant {
    /// Kind of the constant.
    pub const fn kind(self) -> ValueKind {
        match self {
            XirConstant::Int(_) => ValueKind::Int,
            XirConstant::Long(_) => ValueKind::Long,
            XirConstant::Word(_) => ValueKind::Word,
            XirConstant::Boolean(_) => ValueKind::Boolean,
            XirConstant::Null => ValueKind::Object,
        }
    }
}

/// What an operand slot holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperandRole {
    /// The template result.
    Result,
    /// A parameter bound from the snippet arguments.
    Parameter {
        /// Position in the argument list.
        position: u16,
        /// Whether the argument must be a compile-time constant.
        constant: bool,
    },
    /// Scratch value allocated by the register allocator.
    Temp,
    /// Scratch value pinned to a fixed register.
    RegisterTemp {
        /// Register name.
        register: &'static str,
    },
    /// Constant baked into the template.
    Constant(XirConstant),
}

/// Declaration of one operand slot.
#[derive(Debug, Clone)]
pub struct OperandInfo {
    /// Name used in listings.
    pub name: Cow<'static, str>,
    /// Kind of the slot.
    pub kind: ValueKind,
    /// Role of the slot.
    pub role: OperandRole,
}

// =============================================================================
// Labels and addresses
// =============================================================================

/// Which path a label is bound in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelPlacement {
    /// Bound in the fast path.
    Inline,
    /// Bound in the slow path.
    OutOfLine,
}

/// Handle to a branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XirLabel {
    index: u16,
    placement: LabelPlacement,
}

impl XirLabel {
    /// Label index within the template.
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Whether the label is bound in the fast or slow path.
    #[inline]
    pub const fn placement(self) -> LabelPlacement {
        self.placement
    }
}

/// Declaration of a label.
#[derive(Debug, Clone)]
pub struct LabelInfo {
    /// Name used in listings.
    pub name: &'static str,
    /// Fast or slow path.
    pub placement: LabelPlacement,
}

/// Effective address `base + offset + (index << scale) + displacement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XirAddress {
    /// Base pointer.
    pub base: XirOperand,
    /// Optional operand added to the base.
    pub offset: Option<XirOperand>,
    /// Optional scaled index.
    pub index: Option<XirOperand>,
    /// log2 of the index scale.
    pub scale: u8,
    /// Constant displacement.
    pub displacement: i32,
}

impl XirAddress {
    /// `[base]`.
    #[inline]
    pub const fn base(base: XirOperand) -> Self {
        Self {
            base,
            offset: None,
            index: None,
            scale: 0,
            displacement: 0,
        }
    }

    /// `[base + offset]`.
    #[inline]
    pub const fn offset(base: XirOperand, offset: XirOperand) -> Self {
        Self {
            base,
            offset: Some(offset),
            index: None,
            scale: 0,
            displacement: 0,
        }
    }

    /// `[base + (index << scale) + displacement]`.
    #[inline]
    pub const fn indexed(base: XirOperand, index: XirOperand, displacement: i32, scale: u8) -> Self {
        Self {
            base,
            offset: None,
            index: Some(index),
            scale,
            displacement,
        }
    }
}

impl fmt::Display for XirAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[%{}", self.base.index)?;
        if let Some(offset) = self.offset {
            write!(f, " + %{}", offset.index)?;
        }
        if let Some(index) = self.index {
            write!(f, " + %{} << {}", index.index, self.scale)?;
        }
        if self.displacement != 0 {
            write!(f, " + {}", self.displacement)?;
        }
        f.write_str("]")
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// Branch condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// `lhs == rhs`.
    Equal,
    /// `lhs != rhs`.
    NotEqual,
    /// `lhs >= rhs`, unsigned.
    UnsignedGreaterOrEqual,
}

/// One XIR instruction.
#[derive(Debug, Clone)]
pub enum XirOp {
    /// Load `kind` from memory.
    Load {
        kind: ValueKind,
        dst: XirOperand,
        address: XirAddress,
        can_trap: bool,
    },
    /// Store `kind` to memory.
    Store {
        kind: ValueKind,
        address: XirAddress,
        value: XirOperand,
        can_trap: bool,
    },
    /// Register move.
    Mov { dst: XirOperand, src: XirOperand },
    /// Integer addition.
    Add {
        dst: XirOperand,
        lhs: XirOperand,
        rhs: XirOperand,
    },
    /// Integer remainder.
    Mod {
        dst: XirOperand,
        lhs: XirOperand,
        rhs: XirOperand,
    },
    /// Conditional branch.
    Branch {
        condition: Condition,
        target: XirLabel,
        lhs: XirOperand,
        rhs: XirOperand,
    },
    /// Unconditional branch.
    Jump(XirLabel),
    /// Label definition.
    Bind(XirLabel),
    /// Explicit null check.
    NullCheck(XirOperand),
    /// Safepoint poll site.
    Safepoint,
    /// Allocate the method frame.
    PushFrame,
    /// Release the method frame.
    PopFrame,
    /// Stack bang.
    StackOverflowCheck,
    /// Pre-encoded machine code spliced verbatim.
    RawBytes(Box<[u8]>),
    /// Call another template (a runtime-call stub).
    CallStub {
        stub: Arc<XirTemplate>,
        result: Option<XirOperand>,
        args: SmallVec<[XirOperand; 4]>,
    },
    /// Call a runtime service directly. Only stubs contain this.
    CallRuntime {
        call: &'static RuntimeCall,
        result: Option<XirOperand>,
        args: SmallVec<[XirOperand; 4]>,
    },
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[XirOperand]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "%{}", arg.index)?;
    }
    Ok(())
}

impl fmt::Display for XirOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XirOp::Load {
                kind,
                dst,
                address,
                can_trap,
            } => {
                let trap = if *can_trap { " trap" } else { "" };
                write!(f, "%{} = pload<{}>{} {}", dst.index, kind, trap, address)
            }
            XirOp::Store {
                kind,
                address,
                value,
                can_trap,
            } => {
                let trap = if *can_trap { " trap" } else { "" };
                write!(f, "pstore<{}>{} {}, %{}", kind, trap, address, value.index)
            }
            XirOp::Mov { dst, src } => write!(f, "%{} = %{}", dst.index, src.index),
            XirOp::Add { dst, lhs, rhs } => {
                write!(f, "%{} = add %{}, %{}", dst.index, lhs.index, rhs.index)
            }
            XirOp::Mod { dst, lhs, rhs } => {
                write!(f, "%{} = mod %{}, %{}", dst.index, lhs.index, rhs.index)
            }
            XirOp::Branch {
                condition,
                target,
                lhs,
                rhs,
            } => {
                let op = match condition {
                    Condition::Equal => "jeq",
                    Condition::NotEqual => "jneq",
                    Condition::UnsignedGreaterOrEqual => "jugteq",
                };
                write!(f, "{} L{}, %{}, %{}", op, target.index, lhs.index, rhs.index)
            }
            XirOp::Jump(label) => write!(f, "jmp L{}", label.index),
            XirOp::Bind(label) => write!(f, "L{}:", label.index),
            XirOp::NullCheck(op) => write!(f, "nullcheck %{}", op.index),
            XirOp::Safepoint => f.write_str("safepoint"),
            XirOp::PushFrame => f.write_str("pushframe"),
            XirOp::PopFrame => f.write_str("popframe"),
            XirOp::StackOverflowCheck => f.write_str("stackoverflowcheck"),
            XirOp::RawBytes(bytes) => write!(f, "rawbytes[{}]", bytes.len()),
            XirOp::CallStub { stub, result, args } => {
                if let Some(result) = result {
                    write!(f, "%{} = ", result.index)?;
                }
                write!(f, "callstub {}(", stub.name())?;
                write_args(f, args)?;
                f.write_str(")")
            }
            XirOp::CallRuntime { call, result, args } => {
                if let Some(result) = result {
                    write!(f, "%{} = ", result.index)?;
                }
                write!(f, "callruntime {}(", call.name)?;
                write_args(f, args)?;
                f.write_str(")")
            }
        }
    }
}

// =============================================================================
// XirTemplate
// =============================================================================

/// An immutable, named code template.
#[derive(Debug)]
pub struct XirTemplate {
    pub(crate) name: Cow<'static, str>,
    pub(crate) result: Option<XirOperand>,
    pub(crate) operands: Box<[OperandInfo]>,
    pub(crate) parameters: Box<[XirOperand]>,
    pub(crate) labels: Box<[LabelInfo]>,
    pub(crate) fast_path: Box<[XirOp]>,
    pub(crate) slow_path: Box<[XirOp]>,
    pub(crate) is_stub: bool,
}

impl XirTemplate {
    /// Template name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Result operand, if the template produces a value.
    #[inline]
    pub fn result(&self) -> Option<XirOperand> {
        self.result
    }

    /// Kind of the result, `Void` if none.
    #[inline]
    pub fn result_kind(&self) -> ValueKind {
        self.result.map_or(ValueKind::Void, XirOperand::kind)
    }

    /// Parameters in argument order.
    #[inline]
    pub fn parameters(&self) -> &[XirOperand] {
        &self.parameters
    }

    /// Whether the `i`-th parameter must be bound to a constant.
    pub fn is_constant_parameter(&self, i: usize) -> bool {
        self.parameters.get(i).is_some_and(|p| {
            matches!(
                self.operands[p.index()].role,
                OperandRole::Parameter { constant: true, .. }
            )
        })
    }

    /// Declaration of an operand.
    #[inline]
    pub fn operand(&self, operand: XirOperand) -> &OperandInfo {
        &self.operands[operand.index()]
    }

    /// Every operand declaration.
    #[inline]
    pub fn operands(&self) -> &[OperandInfo] {
        &self.operands
    }

    /// Every label declaration.
    #[inline]
    pub fn labels(&self) -> &[LabelInfo] {
        &self.labels
    }

    /// Inline instructions.
    #[inline]
    pub fn fast_path(&self) -> &[XirOp] {
        &self.fast_path
    }

    /// Out-of-line instructions.
    #[inline]
    pub fn slow_path(&self) -> &[XirOp] {
        &self.slow_path
    }

    /// Whether this template is a runtime-call stub.
    #[inline]
    pub fn is_stub(&self) -> bool {
        self.is_stub
    }

    /// Iterate over both paths, fast path first.
    pub fn instructions(&self) -> impl Iterator<Item = &XirOp> {
        self.fast_path.iter().chain(self.slow_path.iter())
    }

    /// Stubs called anywhere in the template.
    pub fn stub_calls(&self) -> impl Iterator<Item = &Arc<XirTemplate>> {
        self.instructions().filter_map(|op| match op {
            XirOp::CallStub { stub, .. } => Some(stub),
            _ => None,
        })
    }

    /// Whether the template calls the stub for runtime service `name`.
    pub fn calls_runtime(&self, name: &str) -> bool {
        self.stub_calls().any(|stub| {
            stub.instructions()
                .any(|op| matches!(op, XirOp::CallRuntime { call, .. } if call.name == name))
        })
    }

    /// Number of scratch operands.
    pub fn temp_count(&self) -> usize {
        self.operands
            .iter()
            .filter(|o| matches!(o.role, OperandRole::Temp | OperandRole::RegisterTemp { .. }))
            .count()
    }
}

impl fmt::Display for XirTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "template {}", self.name)?;
        for (i, op) in self.operands.iter().enumerate() {
            let role = match op.role {
                OperandRole::Result => "result".to_string(),
                OperandRole::Parameter { constant: true, .. } => "const param".to_string(),
                OperandRole::Parameter { .. } => "param".to_string(),
                OperandRole::Temp => "temp".to_string(),
                OperandRole::RegisterTemp { register } => format!("temp@{register}"),
                OperandRole::Constant(c) => format!("const {c:?}"),
            };
            writeln!(f, "  %{i} {} : {} ({role})", op.name, op.kind)?;
        }
        for op in self.fast_path.iter() {
            writeln!(f, "    {op}")?;
        }
        if !self.slow_path.is_empty() {
            writeln!(f, "  slow:")?;
            for op in self.slow_path.iter() {
                writeln!(f, "    {op}")?;
            }
        }
        Ok(())
    }
}
