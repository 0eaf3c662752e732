//! Method frame, safepoint, monitor and exception templates.

use std::sync::Arc;

use kiln_core::{CodegenError, ContractViolation, MethodRef, ValueKind};

use super::{CatalogBuilder, TemplateCatalog};
use crate::xir::{Snippet, TemplateAssembler, XirArgument, XirTemplate, LATCH_REGISTER};

const NO_ARGUMENTS: [XirArgument; 0] = [];

impl CatalogBuilder<'_> {
    pub(super) fn build_safepoint(&mut self) -> Arc<XirTemplate> {
        self.asm.restart_void();
        let latch = self
            .asm
            .create_register_temp("latch", ValueKind::Word, LATCH_REGISTER);
        self.asm.safepoint();
        self.asm.pload_direct(ValueKind::Word, latch, latch, false);
        self.finish("safepoint".to_string())
    }

    pub(super) fn build_epilogue(&mut self) -> Arc<XirTemplate> {
        self.asm.restart_void();
        self.asm.pop_frame();
        self.finish("epilogue".to_string())
    }

    /// Read and clear the pending exception of the current thread.
    pub(super) fn build_exception_object(&mut self) -> Arc<XirTemplate> {
        let layout = self.config.layout;
        let result = self.asm.restart(ValueKind::Object);
        let latch = self
            .asm
            .create_register_temp("latch", ValueKind::Word, LATCH_REGISTER);
        let etla = self.asm.create_temp("etla", ValueKind::Word);
        self.asm.safepoint();
        self.asm.pload_direct(ValueKind::Word, latch, latch, true);

        let etla_offset = self.asm.i(layout.etla_offset);
        let exception_offset = self.asm.i(layout.exception_object_offset);
        let zero = self.asm.w(0);
        self.asm.pload(ValueKind::Word, etla, latch, etla_offset, false);
        self.asm.pload(ValueKind::Object, result, etla, exception_offset, false);
        self.asm.pstore(ValueKind::Word, etla, exception_offset, zero, false);
        self.finish("exceptionobject".to_string())
    }

    pub(super) fn build_monitor(
        &mut self,
        service: &str,
        name: &'static str,
    ) -> Result<Arc<XirTemplate>, ContractViolation> {
        self.asm.restart_void();
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        self.call_runtime_through_stub(service, None, &[object])?;
        Ok(self.finish(name.to_string()))
    }
}

impl TemplateCatalog {
    /// Method entry: splice the call adapter, push the frame and bang the
    /// stack.
    ///
    /// Built per method with its own assembler, so concurrent compilations
    /// never share recording state. `adapter` is the pre-encoded argument
    /// adapter for the method's signature, if the platform needs one.
    pub fn gen_prologue(
        &self,
        method: &MethodRef,
        adapter: Option<&[u8]>,
    ) -> Result<Snippet, CodegenError> {
        let MethodRef::Resolved(callee) = method else {
            return Err(CodegenError::UnresolvedPrologue);
        };
        let mut asm = TemplateAssembler::new();
        asm.restart_void();
        if let Some(bytes) = adapter {
            asm.raw_bytes(bytes);
        }
        asm.push_frame();
        if !callee.is_vm_entry_point {
            asm.stack_overflow_check();
        }
        let template = asm.finish_template("prologue");
        if self.config.print_templates {
            tracing::trace!("{template}");
        }
        Ok(Snippet::new(Arc::new(template), NO_ARGUMENTS))
    }

    /// Method exit.
    pub fn gen_epilogue(&self) -> Snippet {
        Snippet::new(self.epilogue.clone(), NO_ARGUMENTS)
    }

    /// Safepoint poll.
    pub fn gen_safepoint(&self) -> Snippet {
        Snippet::new(self.safepoint.clone(), NO_ARGUMENTS)
    }

    /// The exception being dispatched to the current handler.
    pub fn gen_exception_object(&self) -> Snippet {
        Snippet::new(self.exception_object.clone(), NO_ARGUMENTS)
    }

    /// Lock `object`.
    pub fn gen_monitor_enter(&self, object: XirArgument) -> Snippet {
        Snippet::new(self.monitor_enter.clone(), [object])
    }

    /// Unlock `object`.
    pub fn gen_monitor_exit(&self, object: XirArgument) -> Snippet {
        Snippet::new(self.monitor_exit.clone(), [object])
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::catalog;
    use super::*;
    use crate::xir::{OperandRole, ValueId, XirOp};
    use kiln_core::{PoolHandle, ResolvedMethod, UnresolvedSymbol};

    fn method(is_vm_entry_point: bool) -> MethodRef {
        MethodRef::Resolved(ResolvedMethod {
            holder_id: 4,
            vtable_index: None,
            itable_index: None,
            entry_point: 0x7000,
            is_vm_entry_point,
            argument_words: 2,
        })
    }

    #[test]
    fn test_prologue_shape() {
        let catalog = catalog();
        let snippet = catalog.gen_prologue(&method(false), Some(&[0x90u8, 0x90][..])).unwrap();
        assert!(matches!(
            snippet.template().fast_path(),
            [XirOp::RawBytes(b), XirOp::PushFrame, XirOp::StackOverflowCheck] if b.len() == 2
        ));
        assert!(snippet.arguments().is_empty());
    }

    #[test]
    fn test_vm_entry_point_skips_stack_check() {
        let catalog = catalog();
        let snippet = catalog.gen_prologue(&method(true), None).unwrap();
        assert!(matches!(snippet.template().fast_path(), [XirOp::PushFrame]));
    }

    #[test]
    fn test_prologue_per_method() {
        let catalog = catalog();
        let a = catalog.gen_prologue(&method(false), None).unwrap();
        let b = catalog.gen_prologue(&method(false), None).unwrap();
        assert!(!Arc::ptr_eq(a.template(), b.template()));
    }

    #[test]
    fn test_unresolved_prologue() {
        let catalog = catalog();
        let unresolved = MethodRef::Unresolved(UnresolvedSymbol {
            pool: PoolHandle(1),
            cpi: 1,
        });
        assert_eq!(
            catalog.gen_prologue(&unresolved, None).unwrap_err(),
            CodegenError::UnresolvedPrologue
        );
    }

    #[test]
    fn test_safepoint_reads_latch() {
        let catalog = catalog();
        let snippet = catalog.gen_safepoint();
        let template = snippet.template();
        assert!(template.operands().iter().any(|o| matches!(
            o.role,
            OperandRole::RegisterTemp { register } if register == LATCH_REGISTER
        )));
        assert!(matches!(
            template.fast_path(),
            [XirOp::Safepoint, XirOp::Load { kind: ValueKind::Word, .. }]
        ));
    }

    #[test]
    fn test_exception_object_clears_slot() {
        let catalog = catalog();
        let template = catalog.gen_exception_object().template().clone();
        assert_eq!(template.result_kind(), ValueKind::Object);
        assert!(matches!(
            template.fast_path().last(),
            Some(XirOp::Store { kind: ValueKind::Word, .. })
        ));
    }

    #[test]
    fn test_monitors() {
        let catalog = catalog();
        let object = XirArgument::Value(ValueId(1));
        let enter = catalog.gen_monitor_enter(object.clone());
        let exit = catalog.gen_monitor_exit(object);
        assert!(enter.template().calls_runtime("monitor_enter"));
        assert!(exit.template().calls_runtime("monitor_exit"));
        assert_eq!(exit.template().name(), "monitorexit");
        assert!(matches!(catalog.gen_epilogue().template().fast_path(), [XirOp::PopFrame]));
    }
}
