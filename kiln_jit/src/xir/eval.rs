//! Direct interpretation of XIR templates.
//!
//! The evaluator runs a template the way the lowered machine code would:
//! fast path first, branching into out-of-line code and back. Loads and
//! stores go through the heap's [`Memory`](crate::runtime::Memory), stub
//! calls recurse, and runtime calls invoke the registered service bodies.

use kiln_core::{RuntimeFault, ValueKind};
use thiserror::Error;

use super::{
    Condition, OperandRole, Snippet, XirAddress, XirArgument, XirConstant, XirLabel, XirOp,
    XirOperand, XirTemplate, LATCH_REGISTER,
};
use crate::runtime::{RtValue, RuntimeServices};
use crate::xir::ObjectConstant;

/// Upper bound on executed instructions per template.
const STEP_LIMIT: usize = 10_000;

/// Why a template did not complete.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The template raised a user-visible fault.
    #[error(transparent)]
    Fault(#[from] RuntimeFault),

    /// Execution ran past the end of an out-of-line block.
    #[error("fell off the end of out-of-line code in {0}")]
    FellOffSlowPath(String),

    /// The step limit was exceeded.
    #[error("step limit exceeded in {0}")]
    StepLimit(String),

    /// Integer remainder by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Wrong number of arguments for the template.
    #[error("template takes {expected} arguments, got {actual}")]
    ArgumentCount {
        /// Parameter count.
        expected: usize,
        /// Supplied count.
        actual: usize,
    },

    /// The template did something no lowering could encode.
    #[error("malformed template: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    Fast,
    Slow,
}

/// Interprets templates against a set of runtime services.
#[derive(Debug)]
pub struct XirEvaluator<'a> {
    services: &'a RuntimeServices<'a>,
    latch: u64,
}

impl<'a> XirEvaluator<'a> {
    /// Create an evaluator. `latch` is the value of the safepoint latch
    /// register.
    pub fn new(services: &'a RuntimeServices<'a>, latch: u64) -> Self {
        Self { services, latch }
    }

    /// Run a snippet. `Value(ValueId(i))` arguments read `inputs[i]`.
    pub fn run(&self, snippet: &Snippet, inputs: &[RtValue]) -> Result<RtValue, EvalError> {
        let args = snippet
            .arguments()
            .iter()
            .map(|arg| match arg {
                XirArgument::Int(v) => Ok(RtValue::Int(*v)),
                XirArgument::Long(v) => Ok(RtValue::Long(*v)),
                XirArgument::Word(v) => Ok(RtValue::Word(*v)),
                XirArgument::Object(ObjectConstant::Null) => Ok(RtValue::NULL),
                XirArgument::Object(ObjectConstant::Hub(hub)) => Ok(RtValue::Ref(hub.0)),
                XirArgument::Guard(guard) => Ok(RtValue::Guard(guard.clone())),
                XirArgument::Value(id) => inputs
                    .get(id.0 as usize)
                    .cloned()
                    .ok_or_else(|| EvalError::Malformed(format!("no input for v{}", id.0))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.execute(snippet.template(), &args)
    }

    /// Run `template` with its parameters bound to `args`.
    pub fn execute(&self, template: &XirTemplate, args: &[RtValue]) -> Result<RtValue, EvalError> {
        if args.len() != template.parameters().len() {
            return Err(EvalError::ArgumentCount {
                expected: template.parameters().len(),
                actual: args.len(),
            });
        }
        Frame::new(self, template, args).run()
    }
}

// =============================================================================
// Frame
// =============================================================================

struct Frame<'e, 't> {
    eval: &'e XirEvaluator<'e>,
    template: &'t XirTemplate,
    slots: Vec<RtValue>,
    /// Position of each label's `Bind`.
    labels: Vec<Option<(Path, usize)>>,
}

impl<'e, 't> Frame<'e, 't> {
    fn new(eval: &'e XirEvaluator<'e>, template: &'t XirTemplate, args: &[RtValue]) -> Self {
        let mut slots = vec![RtValue::Void; template.operands().len()];
        for (i, info) in template.operands().iter().enumerate() {
            slots[i] = match info.role {
                OperandRole::Parameter { position, .. } => args[position as usize].clone(),
                OperandRole::Constant(c) => constant_value(c),
                OperandRole::RegisterTemp { register } if register == LATCH_REGISTER => {
                    RtValue::Word(eval.latch)
                }
                _ => RtValue::Void,
            };
        }

        let mut labels = vec![None; template.labels().len()];
        for (path, ops) in [(Path::Fast, template.fast_path()), (Path::Slow, template.slow_path())] {
            for (i, op) in ops.iter().enumerate() {
                if let XirOp::Bind(label) = op {
                    labels[label.index()] = Some((path, i));
                }
            }
        }

        Self {
            eval,
            template,
            slots,
            labels,
        }
    }

    fn run(mut self) -> Result<RtValue, EvalError> {
        let mut path = Path::Fast;
        let mut pc = 0;
        for _ in 0..STEP_LIMIT {
            let ops = match path {
                Path::Fast => self.template.fast_path(),
                Path::Slow => self.template.slow_path(),
            };
            let Some(op) = ops.get(pc) else {
                return match path {
                    Path::Fast => Ok(self.result()),
                    Path::Slow => Err(EvalError::FellOffSlowPath(self.template.name().to_string())),
                };
            };
            pc += 1;
            match self.step(op)? {
                Flow::Next => {}
                Flow::Bind if path == Path::Slow => {
                    return Err(EvalError::FellOffSlowPath(self.template.name().to_string()));
                }
                Flow::Bind => {}
                Flow::Jump(label) => {
                    let (target_path, index) = self.labels[label.index()].ok_or_else(|| {
                        EvalError::Malformed(format!("unbound label L{}", label.index()))
                    })?;
                    path = target_path;
                    pc = index + 1;
                }
            }
        }
        Err(EvalError::StepLimit(self.template.name().to_string()))
    }

    fn result(&self) -> RtValue {
        self.template
            .result()
            .map_or(RtValue::Void, |r| self.slots[r.index()].clone())
    }

    #[inline]
    fn get(&self, op: XirOperand) -> &RtValue {
        &self.slots[op.index()]
    }

    #[inline]
    fn set(&mut self, op: XirOperand, value: RtValue) {
        self.slots[op.index()] = value;
    }

    fn bits(&self, op: XirOperand) -> Result<u64, EvalError> {
        self.get(op).to_bits().ok_or_else(|| {
            EvalError::Malformed(format!(
                "operand %{} ({}) has no bit pattern",
                op.index(),
                self.template.operand(op).name
            ))
        })
    }

    fn address(&self, address: &XirAddress, can_trap: bool) -> Result<u64, EvalError> {
        let base = self.bits(address.base)?;
        if base == 0 {
            if can_trap {
                return Err(RuntimeFault::NullPointer.into());
            }
            return Err(EvalError::Malformed(format!(
                "untrapped access through null in {}",
                self.template.name()
            )));
        }
        let mut effective = base.wrapping_add_signed(address.displacement.into());
        if let Some(offset) = address.offset {
            effective = effective.wrapping_add(self.bits(offset)?);
        }
        if let Some(index) = address.index {
            effective = effective.wrapping_add(self.bits(index)? << address.scale);
        }
        Ok(effective)
    }

    fn operands(&self, args: &[XirOperand]) -> Vec<RtValue> {
        args.iter().map(|&a| self.get(a).clone()).collect()
    }

    fn step(&mut self, op: &XirOp) -> Result<Flow, EvalError> {
        let memory = self.eval.services.heap;
        match op {
            XirOp::Load {
                kind,
                dst,
                address,
                can_trap,
            } => {
                let value = memory.load(*kind, self.address(address, *can_trap)?)?;
                self.set(*dst, value);
            }
            XirOp::Store {
                kind,
                address,
                value,
                can_trap,
            } => {
                let address = self.address(address, *can_trap)?;
                memory.store(*kind, address, self.get(*value))?;
            }
            XirOp::Mov { dst, src } => {
                let value = self.get(*src).clone();
                self.set(*dst, value);
            }
            XirOp::Add { dst, lhs, rhs } => {
                let sum = self.bits(*lhs)?.wrapping_add(self.bits(*rhs)?);
                self.set(*dst, RtValue::from_bits(dst.kind(), sum));
            }
            XirOp::Mod { dst, lhs, rhs } => {
                let (a, b) = (self.bits(*lhs)?, self.bits(*rhs)?);
                let rem = if dst.kind() == ValueKind::Int {
                    (a as i32).checked_rem(b as i32).map(|r| i64::from(r) as u64)
                } else {
                    (a as i64).checked_rem(b as i64).map(|r| r as u64)
                };
                let rem = rem.ok_or(EvalError::DivisionByZero)?;
                self.set(*dst, RtValue::from_bits(dst.kind(), rem));
            }
            XirOp::Branch {
                condition,
                target,
                lhs,
                rhs,
            } => {
                if self.compare(*condition, *lhs, *rhs)? {
                    return Ok(Flow::Jump(*target));
                }
            }
            XirOp::Jump(label) => return Ok(Flow::Jump(*label)),
            XirOp::Bind(_) => return Ok(Flow::Bind),
            XirOp::NullCheck(operand) => {
                if self.bits(*operand)? == 0 {
                    return Err(RuntimeFault::NullPointer.into());
                }
            }
            XirOp::Safepoint
            | XirOp::PushFrame
            | XirOp::PopFrame
            | XirOp::StackOverflowCheck
            | XirOp::RawBytes(_) => {}
            XirOp::CallStub { stub, result, args } => {
                let value = self.eval.execute(stub, &self.operands(args))?;
                if let Some(result) = result {
                    self.set(*result, value);
                }
            }
            XirOp::CallRuntime { call, result, args } => {
                let value = self.eval.services.invoke(call, &self.operands(args))?;
                if let Some(result) = result {
                    self.set(*result, value);
                }
            }
        }
        Ok(Flow::Next)
    }

    fn compare(&self, condition: Condition, lhs: XirOperand, rhs: XirOperand) -> Result<bool, EvalError> {
        let (a, b) = (self.bits(lhs)?, self.bits(rhs)?);
        Ok(match condition {
            Condition::Equal => a == b,
            Condition::NotEqual => a != b,
            Condition::UnsignedGreaterOrEqual => {
                if lhs.kind() == ValueKind::Int && rhs.kind() == ValueKind::Int {
                    a as u32 >= b as u32
                } else {
                    a >= b
                }
            }
        })
    }
}

enum Flow {
    Next,
    Bind,
    Jump(XirLabel),
}

fn constant_value(constant: XirConstant) -> RtValue {
    match constant {
        XirConstant::Int(v) => RtValue::Int(v),
        XirConstant::Long(v) => RtValue::Long(v),
        XirConstant::Word(v) => RtValue::Word(v),
        XirConstant::Boolean(v) => RtValue::Int(i32::from(v)),
        XirConstant::Null => RtValue::NULL,
    }
}
