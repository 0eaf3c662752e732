//! Invoke templates.
//!
//! Each template computes the entry point to call; the compiler emits the
//! call itself. Virtual dispatch reads the receiver's vtable, interface
//! dispatch probes the hashed method table.

use kiln_core::{
    CodegenError, ContractViolation, MethodRef, ResolutionGuard, ResolutionKind, ValueKind,
};

use super::{CatalogBuilder, InvokeSpecialTemplates, TemplateCatalog, XirPair};
use crate::xir::{Snippet, XirArgument, XirOperand};

impl CatalogBuilder<'_> {
    /// `result = [[receiver + hub] + vtable_offset]`.
    fn emit_vtable_load(&mut self, result: XirOperand, receiver: XirOperand, vtable_offset: XirOperand) {
        let hub = self.asm.create_temp("hub", ValueKind::Object);
        self.emit_load_hub(receiver, hub, true);
        self.asm.pload(ValueKind::Word, result, hub, vtable_offset, false);
    }

    /// Entry point of method `method_index` of interface `interface_id` in
    /// the receiver's method table.
    fn emit_itable_load(
        &mut self,
        result: XirOperand,
        receiver: XirOperand,
        interface_id: XirOperand,
        method_index: XirOperand,
    ) {
        let layout = self.config.layout;
        let hub = self.asm.create_temp("hub", ValueKind::Object);
        self.emit_load_hub(receiver, hub, true);
        let slot = self.emit_mtable_redirect(hub, interface_id);
        self.asm.add(slot, slot, method_index);
        self.asm.pload_indexed(
            ValueKind::Word,
            result,
            hub,
            slot,
            layout.hub_words_offset,
            layout.word_scale(),
            false,
        );
    }

    pub(super) fn build_invoke_virtual(&mut self) -> Result<XirPair, ContractViolation> {
        let result = self.asm.restart(ValueKind::Word);
        let receiver = self.asm.create_input_parameter("receiver", ValueKind::Object);
        let vtable_offset = self.asm.create_constant_input_parameter("vtableOffset", ValueKind::Int);
        self.emit_vtable_load(result, receiver, vtable_offset);
        let resolved = self.finish("invokevirtual".to_string());

        let result = self.asm.restart(ValueKind::Word);
        let receiver = self.asm.create_input_parameter("receiver", ValueKind::Object);
        let guard = self.asm.create_constant_input_parameter("guard", ValueKind::Object);
        let vtable_offset = self.asm.create_temp("vtableOffset", ValueKind::Int);
        self.call_runtime_through_stub("resolve_virtual_method", Some(vtable_offset), &[guard])?;
        self.emit_vtable_load(result, receiver, vtable_offset);
        let unresolved = self.finish("invokevirtual-unresolved".to_string());

        Ok(XirPair::new(resolved, unresolved))
    }

    pub(super) fn build_invoke_interface(&mut self) -> Result<XirPair, ContractViolation> {
        let result = self.asm.restart(ValueKind::Word);
        let receiver = self.asm.create_input_parameter("receiver", ValueKind::Object);
        let interface_id = self.asm.create_constant_input_parameter("interfaceID", ValueKind::Int);
        let method_index = self.asm.create_constant_input_parameter("methodIndex", ValueKind::Int);
        self.emit_itable_load(result, receiver, interface_id, method_index);
        let resolved = self.finish("invokeinterface".to_string());

        let result = self.asm.restart(ValueKind::Word);
        let receiver = self.asm.create_input_parameter("receiver", ValueKind::Object);
        let guard = self.asm.create_input_parameter("guard", ValueKind::Object);
        let interface_id = self.asm.create_temp("interfaceID", ValueKind::Int);
        let method_index = self.asm.create_temp("methodIndex", ValueKind::Int);
        self.call_runtime_through_stub("resolve_interface_method", Some(method_index), &[guard])?;
        self.call_runtime_through_stub("resolve_interface_id", Some(interface_id), &[guard])?;
        self.emit_itable_load(result, receiver, interface_id, method_index);
        let unresolved = self.finish("invokeinterface-unresolved".to_string());

        Ok(XirPair::new(resolved, unresolved))
    }

    pub(super) fn build_invoke_special(&mut self) -> Result<InvokeSpecialTemplates, ContractViolation> {
        self.asm.restart_void();
        let addr = self.asm.create_constant_input_parameter("addr", ValueKind::Word);
        let receiver = self.asm.create_input_parameter("receiver", ValueKind::Object);
        self.asm.null_check(receiver);
        let resolved = self.finish_with_result(addr, "invokespecial".to_string());

        self.asm.restart_void();
        let addr = self.asm.create_constant_input_parameter("addr", ValueKind::Word);
        let resolved_null_check_eliminated =
            self.finish_with_result(addr, "invokespecial-nce".to_string());

        self.asm.restart_void();
        let guard = self.asm.create_constant_input_parameter("guard", ValueKind::Object);
        let addr = self.asm.create_temp("addr", ValueKind::Word);
        self.call_runtime_through_stub("resolve_special_method", Some(addr), &[guard])?;
        let unresolved = self.finish_with_result(addr, "invokespecial-unresolved".to_string());

        Ok(InvokeSpecialTemplates {
            resolved,
            resolved_null_check_eliminated,
            unresolved,
        })
    }

    pub(super) fn build_invoke_static(&mut self) -> Result<XirPair, ContractViolation> {
        self.asm.restart_void();
        let addr = self.asm.create_constant_input_parameter("addr", ValueKind::Word);
        let resolved = self.finish_with_result(addr, "invokestatic".to_string());

        self.asm.restart_void();
        let guard = self.asm.create_constant_input_parameter("guard", ValueKind::Object);
        let addr = self.asm.create_temp("addr", ValueKind::Word);
        self.call_runtime_through_stub("resolve_static_method", Some(addr), &[guard])?;
        let unresolved = self.finish_with_result(addr, "invokestatic-unresolved".to_string());

        Ok(XirPair::new(resolved, unresolved))
    }
}

// =============================================================================
// Snippet generation
// =============================================================================

fn method_guard(method: &MethodRef, kind: ResolutionKind) -> Option<XirArgument> {
    match method {
        MethodRef::Resolved(_) => None,
        MethodRef::Unresolved(symbol) => {
            Some(XirArgument::guard(ResolutionGuard::in_pool(*symbol, kind)))
        }
    }
}

impl TemplateCatalog {
    /// Entry point of a virtual call on `receiver`.
    pub fn gen_invoke_virtual(
        &self,
        receiver: XirArgument,
        method: &MethodRef,
    ) -> Result<Snippet, CodegenError> {
        let pair = &self.invoke_virtual;
        match method {
            MethodRef::Resolved(m) => {
                let index = m
                    .vtable_index
                    .ok_or(CodegenError::MissingDispatchIndex("invokevirtual"))?;
                let offset = self.config.layout.hub_word_offset(index);
                Ok(Snippet::new(
                    pair.resolved.clone(),
                    [receiver, XirArgument::Int(offset)],
                ))
            }
            MethodRef::Unresolved(_) => {
                let guard = method_guard(method, ResolutionKind::VirtualMethod);
                Ok(Snippet::new(
                    pair.unresolved.clone(),
                    std::iter::once(receiver).chain(guard),
                ))
            }
        }
    }

    /// Entry point of an interface call on `receiver`.
    pub fn gen_invoke_interface(
        &self,
        receiver: XirArgument,
        method: &MethodRef,
    ) -> Result<Snippet, CodegenError> {
        let pair = &self.invoke_interface;
        match method {
            MethodRef::Resolved(m) => {
                let index = m
                    .itable_index
                    .ok_or(CodegenError::MissingDispatchIndex("invokeinterface"))?;
                Ok(Snippet::new(
                    pair.resolved.clone(),
                    [
                        receiver,
                        XirArgument::Int(m.holder_id as i32),
                        XirArgument::Int(index as i32),
                    ],
                ))
            }
            MethodRef::Unresolved(_) => {
                let guard = method_guard(method, ResolutionKind::InterfaceMethod);
                Ok(Snippet::new(
                    pair.unresolved.clone(),
                    std::iter::once(receiver).chain(guard),
                ))
            }
        }
    }

    /// Entry point of a private, constructor or super call.
    ///
    /// The resolved variant null-checks `receiver` unless the compiler has
    /// proven it non-null.
    pub fn gen_invoke_special(
        &self,
        receiver: XirArgument,
        method: &MethodRef,
        requires_null_check: bool,
    ) -> Snippet {
        let templates = &self.invoke_special;
        match method {
            MethodRef::Resolved(m) if requires_null_check => Snippet::new(
                templates.resolved.clone(),
                [XirArgument::Word(m.entry_point), receiver],
            ),
            MethodRef::Resolved(m) => Snippet::new(
                templates.resolved_null_check_eliminated.clone(),
                [XirArgument::Word(m.entry_point)],
            ),
            MethodRef::Unresolved(_) => Snippet::new(
                templates.unresolved.clone(),
                method_guard(method, ResolutionKind::SpecialMethod),
            ),
        }
    }

    /// Entry point of a static call.
    pub fn gen_invoke_static(&self, method: &MethodRef) -> Snippet {
        match method {
            MethodRef::Resolved(m) => Snippet::new(
                self.invoke_static.resolved.clone(),
                [XirArgument::Word(m.entry_point)],
            ),
            MethodRef::Unresolved(_) => Snippet::new(
                self.invoke_static.unresolved.clone(),
                method_guard(method, ResolutionKind::StaticMethod),
            ),
        }
    }
}
