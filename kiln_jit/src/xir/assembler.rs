//! Recording assembler for XIR templates.

use std::borrow::Cow;
use std::sync::Arc;

use kiln_core::ValueKind;
use smallvec::SmallVec;

use super::{
    Condition, LabelInfo, LabelPlacement, OperandInfo, OperandRole, XirAddress, XirConstant,
    XirLabel, XirOp, XirOperand, XirTemplate,
};
use crate::runtime::RuntimeCall;

/// Records one template at a time.
///
/// Call [`restart`](Self::restart) (or [`restart_void`](Self::restart_void)),
/// declare operands, emit instructions, then finish. Binding an out-of-line
/// label switches emission to the slow path; binding an inline label
/// switches back.
#[derive(Debug, Default)]
pub struct TemplateAssembler {
    operands: Vec<OperandInfo>,
    parameters: Vec<XirOperand>,
    labels: Vec<LabelInfo>,
    fast_path: Vec<XirOp>,
    slow_path: Vec<XirOp>,
    result: Option<XirOperand>,
    out_of_line: bool,
}

impl TemplateAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Template lifecycle
    // =========================================================================

    /// Start a template producing a value of `kind`; returns the result.
    pub fn restart(&mut self, kind: ValueKind) -> XirOperand {
        debug_assert!(kind.is_storable(), "template result must be storable");
        self.reset();
        let result = self.declare("result", kind, OperandRole::Result);
        self.result = Some(result);
        result
    }

    /// Start a template without a result.
    pub fn restart_void(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.operands.clear();
        self.parameters.clear();
        self.labels.clear();
        self.fast_path.clear();
        self.slow_path.clear();
        self.result = None;
        self.out_of_line = false;
    }

    /// Finish with the result declared by `restart`.
    pub fn finish_template(&mut self, name: impl Into<Cow<'static, str>>) -> XirTemplate {
        let result = self.result;
        self.finish(result, name.into(), false)
    }

    /// Finish with an explicit result operand (a parameter or temp).
    pub fn finish_template_with_result(
        &mut self,
        result: XirOperand,
        name: impl Into<Cow<'static, str>>,
    ) -> XirTemplate {
        self.finish(Some(result), name.into(), false)
    }

    /// Finish a runtime-call stub.
    pub fn finish_stub(&mut self, name: impl Into<Cow<'static, str>>) -> XirTemplate {
        let result = self.result;
        self.finish(result, name.into(), true)
    }

    fn finish(
        &mut self,
        result: Option<XirOperand>,
        name: Cow<'static, str>,
        is_stub: bool,
    ) -> XirTemplate {
        debug_assert!(
            self.labels_bound(),
            "template {name} has an unbound label"
        );
        let template = XirTemplate {
            name,
            result,
            operands: std::mem::take(&mut self.operands).into_boxed_slice(),
            parameters: std::mem::take(&mut self.parameters).into_boxed_slice(),
            labels: std::mem::take(&mut self.labels).into_boxed_slice(),
            fast_path: std::mem::take(&mut self.fast_path).into_boxed_slice(),
            slow_path: std::mem::take(&mut self.slow_path).into_boxed_slice(),
            is_stub,
        };
        self.reset();
        template
    }

    fn labels_bound(&self) -> bool {
        (0..self.labels.len()).all(|i| {
            self.fast_path
                .iter()
                .chain(self.slow_path.iter())
                .any(|op| matches!(op, XirOp::Bind(l) if l.index() == i))
        })
    }

    // =========================================================================
    // Operands
    // =========================================================================

    fn declare(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        kind: ValueKind,
        role: OperandRole,
    ) -> XirOperand {
        let index = u16::try_from(self.operands.len()).unwrap_or(u16::MAX);
        self.operands.push(OperandInfo {
            name: name.into(),
            kind,
            role,
        });
        XirOperand::new(index, kind)
    }

    fn parameter(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        kind: ValueKind,
        constant: bool,
    ) -> XirOperand {
        let position = self.parameters.len() as u16;
        let op = self.declare(name, kind, OperandRole::Parameter { position, constant });
        self.parameters.push(op);
        op
    }

    /// Declare a parameter bound to a runtime value.
    pub fn create_input_parameter(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        kind: ValueKind,
    ) -> XirOperand {
        self.parameter(name, kind, false)
    }

    /// Declare a parameter that must be bound to a compile-time constant.
    pub fn create_constant_input_parameter(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        kind: ValueKind,
    ) -> XirOperand {
        self.parameter(name, kind, true)
    }

    /// Declare a scratch operand.
    pub fn create_temp(&mut self, name: &'static str, kind: ValueKind) -> XirOperand {
        self.declare(name, kind, OperandRole::Temp)
    }

    /// Declare a scratch operand pinned to `register`.
    pub fn create_register_temp(
        &mut self,
        name: &'static str,
        kind: ValueKind,
        register: &'static str,
    ) -> XirOperand {
        self.declare(name, kind, OperandRole::RegisterTemp { register })
    }

    fn constant(&mut self, value: XirConstant) -> XirOperand {
        self.declare("const", value.kind(), OperandRole::Constant(value))
    }

    /// Integer constant.
    pub fn i(&mut self, value: i32) -> XirOperand {
        self.constant(XirConstant::Int(value))
    }

    /// Long constant.
    pub fn l(&mut self, value: i64) -> XirOperand {
        self.constant(XirConstant::Long(value))
    }

    /// Word constant.
    pub fn w(&mut self, value: u64) -> XirOperand {
        self.constant(XirConstant::Word(value))
    }

    /// Boolean constant.
    pub fn b(&mut self, value: bool) -> XirOperand {
        self.constant(XirConstant::Boolean(value))
    }

    /// The null reference.
    pub fn null_object(&mut self) -> XirOperand {
        self.constant(XirConstant::Null)
    }

    // =========================================================================
    // Labels
    // =========================================================================

    fn label(&mut self, name: &'static str, placement: LabelPlacement) -> XirLabel {
        let index = self.labels.len() as u16;
        self.labels.push(LabelInfo { name, placement });
        XirLabel { index, placement }
    }

    /// Label bound in the fast path.
    pub fn create_inline_label(&mut self, name: &'static str) -> XirLabel {
        self.label(name, LabelPlacement::Inline)
    }

    /// Label bound in the slow path.
    pub fn create_out_of_line_label(&mut self, name: &'static str) -> XirLabel {
        self.label(name, LabelPlacement::OutOfLine)
    }

    /// Bind an inline label and resume emitting into the fast path.
    pub fn bind_inline(&mut self, label: XirLabel) {
        debug_assert_eq!(label.placement(), LabelPlacement::Inline);
        self.out_of_line = false;
        self.fast_path.push(XirOp::Bind(label));
    }

    /// Bind an out-of-line label and emit into the slow path from here on.
    pub fn bind_out_of_line(&mut self, label: XirLabel) {
        debug_assert_eq!(label.placement(), LabelPlacement::OutOfLine);
        self.out_of_line = true;
        self.slow_path.push(XirOp::Bind(label));
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    #[inline]
    fn emit(&mut self, op: XirOp) {
        if self.out_of_line {
            self.slow_path.push(op);
        } else {
            self.fast_path.push(op);
        }
    }

    /// `dst = [base]`.
    pub fn pload_direct(&mut self, kind: ValueKind, dst: XirOperand, base: XirOperand, can_trap: bool) {
        self.emit(XirOp::Load {
            kind,
            dst,
            address: XirAddress::base(base),
            can_trap,
        });
    }

    /// `dst = [base + offset]`.
    pub fn pload(
        &mut self,
        kind: ValueKind,
        dst: XirOperand,
        base: XirOperand,
        offset: XirOperand,
        can_trap: bool,
    ) {
        self.emit(XirOp::Load {
            kind,
            dst,
            address: XirAddress::offset(base, offset),
            can_trap,
        });
    }

    /// `dst = [base + (index << scale) + displacement]`.
    #[allow(clippy::too_many_arguments)]
    pub fn pload_indexed(
        &mut self,
        kind: ValueKind,
        dst: XirOperand,
        base: XirOperand,
        index: XirOperand,
        displacement: i32,
        scale: u8,
        can_trap: bool,
    ) {
        self.emit(XirOp::Load {
            kind,
            dst,
            address: XirAddress::indexed(base, index, displacement, scale),
            can_trap,
        });
    }

    /// `[base + offset] = value`.
    pub fn pstore(
        &mut self,
        kind: ValueKind,
        base: XirOperand,
        offset: XirOperand,
        value: XirOperand,
        can_trap: bool,
    ) {
        self.emit(XirOp::Store {
            kind,
            address: XirAddress::offset(base, offset),
            value,
            can_trap,
        });
    }

    /// `[base + (index << scale) + displacement] = value`.
    #[allow(clippy::too_many_arguments)]
    pub fn pstore_indexed(
        &mut self,
        kind: ValueKind,
        base: XirOperand,
        index: XirOperand,
        value: XirOperand,
        displacement: i32,
        scale: u8,
        can_trap: bool,
    ) {
        self.emit(XirOp::Store {
            kind,
            address: XirAddress::indexed(base, index, displacement, scale),
            value,
            can_trap,
        });
    }

    /// `dst = src`.
    pub fn mov(&mut self, dst: XirOperand, src: XirOperand) {
        self.emit(XirOp::Mov { dst, src });
    }

    /// `dst = lhs + rhs`.
    pub fn add(&mut self, dst: XirOperand, lhs: XirOperand, rhs: XirOperand) {
        self.emit(XirOp::Add { dst, lhs, rhs });
    }

    /// `dst = lhs % rhs`.
    pub fn modulo(&mut self, dst: XirOperand, lhs: XirOperand, rhs: XirOperand) {
        self.emit(XirOp::Mod { dst, lhs, rhs });
    }

    fn branch(&mut self, condition: Condition, target: XirLabel, lhs: XirOperand, rhs: XirOperand) {
        self.emit(XirOp::Branch {
            condition,
            target,
            lhs,
            rhs,
        });
    }

    /// Jump to `target` if `lhs == rhs`.
    pub fn jeq(&mut self, target: XirLabel, lhs: XirOperand, rhs: XirOperand) {
        self.branch(Condition::Equal, target, lhs, rhs);
    }

    /// Jump to `target` if `lhs != rhs`.
    pub fn jneq(&mut self, target: XirLabel, lhs: XirOperand, rhs: XirOperand) {
        self.branch(Condition::NotEqual, target, lhs, rhs);
    }

    /// Jump to `target` if `lhs >= rhs` as unsigned values.
    pub fn jugteq(&mut self, target: XirLabel, lhs: XirOperand, rhs: XirOperand) {
        self.branch(Condition::UnsignedGreaterOrEqual, target, lhs, rhs);
    }

    /// Jump to `target`.
    pub fn jmp(&mut self, target: XirLabel) {
        self.emit(XirOp::Jump(target));
    }

    /// Trap if `operand` is null.
    pub fn null_check(&mut self, operand: XirOperand) {
        self.emit(XirOp::NullCheck(operand));
    }

    /// Record a safepoint.
    pub fn safepoint(&mut self) {
        self.emit(XirOp::Safepoint);
    }

    /// Allocate the method frame.
    pub fn push_frame(&mut self) {
        self.emit(XirOp::PushFrame);
    }

    /// Release the method frame.
    pub fn pop_frame(&mut self) {
        self.emit(XirOp::PopFrame);
    }

    /// Probe the stack for overflow.
    pub fn stack_overflow_check(&mut self) {
        self.emit(XirOp::StackOverflowCheck);
    }

    /// Splice pre-encoded machine code.
    pub fn raw_bytes(&mut self, bytes: &[u8]) {
        self.emit(XirOp::RawBytes(bytes.into()));
    }

    /// Call a stub template.
    pub fn call_stub(
        &mut self,
        stub: &Arc<XirTemplate>,
        result: Option<XirOperand>,
        args: &[XirOperand],
    ) {
        self.emit(XirOp::CallStub {
            stub: Arc::clone(stub),
            result,
            args: SmallVec::from_slice(args),
        });
    }

    /// Call a runtime service.
    pub fn call_runtime(
        &mut self,
        call: &'static RuntimeCall,
        result: Option<XirOperand>,
        args: &[XirOperand],
    ) {
        self.emit(XirOp::CallRuntime {
            call,
            result,
            args: SmallVec::from_slice(args),
        });
    }
}
