//! Object templates: instance allocation, class constants and type tests.
//!
//! Type tests come in three resolved flavors. A leaf type (final, not an
//! array, not an interface) is tested by comparing hubs. Everything else
//! compares hubs first and then probes the hashed method table for the
//! type's identifier. Unresolved tests call into the runtime.

use std::sync::Arc;

use kiln_core::{
    ContractViolation, Representation, ResolutionKind, ResolvedType, TypeRef, ValueKind,
};

use super::{type_guard, CatalogBuilder, NewInstanceTemplates, TemplateCatalog, XirPair};
use crate::runtime::MAX_TYPE_ID;
use crate::xir::{Snippet, XirArgument, XirLabel, XirOperand, XirTemplate};

/// Runtime service producing each representation of a resolved type.
fn representation_service(representation: Representation) -> (&'static str, &'static str) {
    match representation {
        Representation::JavaClass => ("resolve_class_object", "javaclass"),
        Representation::ObjectHub => ("resolve_hub", "hub"),
        Representation::StaticFields => ("resolve_static_tuple", "statictuple"),
        Representation::TypeInfo => ("resolve_type_info", "typeinfo"),
    }
}

impl CatalogBuilder<'_> {
    pub(super) fn build_new_instance(&mut self) -> Result<NewInstanceTemplates, ContractViolation> {
        let result = self.asm.restart(ValueKind::Object);
        let hub = self.asm.create_constant_input_parameter("hub", ValueKind::Object);
        self.call_runtime_through_stub("allocate_object", Some(result), &[hub])?;
        let resolved = self.finish("new".to_string());

        let result = self.asm.restart(ValueKind::Object);
        let hub = self.asm.create_constant_input_parameter("hub", ValueKind::Object);
        self.call_runtime_through_stub("allocate_hybrid", Some(result), &[hub])?;
        let resolved_hybrid = self.finish("new-hybrid".to_string());

        let result = self.asm.restart(ValueKind::Object);
        let guard = self.asm.create_constant_input_parameter("guard", ValueKind::Object);
        let hub = self.asm.create_temp("hub", ValueKind::Object);
        self.call_runtime_through_stub("resolve_new", Some(hub), &[guard])?;
        self.call_runtime_through_stub("allocate_object", Some(result), &[hub])?;
        let unresolved = self.finish("new-unresolved".to_string());

        Ok(NewInstanceTemplates {
            resolved,
            resolved_hybrid,
            unresolved,
        })
    }

    pub(super) fn build_resolve_class(
        &mut self,
        representation: Representation,
    ) -> Result<Arc<XirTemplate>, ContractViolation> {
        let (service, label) = representation_service(representation);
        let result = self.asm.restart(ValueKind::Object);
        let guard = self.asm.create_constant_input_parameter("guard", ValueKind::Object);
        self.call_runtime_through_stub(service, Some(result), &[guard])?;
        Ok(self.finish(format!("resolve-{label}")))
    }

    /// Jump to `fail` unless the hub at `hub` lists type `id`, or equals
    /// `checked_hub`, in which case fall through to `pass`.
    fn emit_subtype_probe(
        &mut self,
        hub: XirOperand,
        id: XirOperand,
        checked_hub: XirOperand,
        pass: XirLabel,
        fail: XirLabel,
    ) {
        let layout = self.config.layout;
        self.asm.jeq(pass, hub, checked_hub);
        let slot = self.emit_mtable_redirect(hub, id);
        self.asm.pload_indexed(
            ValueKind::Int,
            slot,
            hub,
            slot,
            layout.hub_words_offset,
            layout.word_scale(),
            false,
        );
        self.asm.jneq(fail, slot, id);
    }

    fn build_unresolved_checkcast(&mut self) -> Result<Arc<XirTemplate>, ContractViolation> {
        self.asm.restart_void();
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let guard = self.asm.create_input_parameter("guard", ValueKind::Object);
        let pass = self.asm.create_inline_label("pass");
        let null = self.asm.null_object();
        self.asm.jeq(pass, object, null);
        self.call_runtime_through_stub("unresolved_checkcast", None, &[object, guard])?;
        self.asm.bind_inline(pass);
        Ok(self.finish_with_result(object, "checkcast-unresolved".to_string()))
    }

    pub(super) fn build_checkcast_for_leaf(&mut self) -> Result<XirPair, ContractViolation> {
        self.asm.restart_void();
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let checked_hub = self.asm.create_constant_input_parameter("checkedHub", ValueKind::Object);
        let hub = self.asm.create_temp("hub", ValueKind::Object);
        let pass = self.asm.create_inline_label("pass");
        let fail = self.asm.create_out_of_line_label("fail");
        let null = self.asm.null_object();
        self.asm.jeq(pass, object, null);
        self.emit_load_hub(object, hub, false);
        self.asm.jneq(fail, hub, checked_hub);
        self.asm.bind_inline(pass);

        self.asm.bind_out_of_line(fail);
        self.call_runtime_through_stub("throw_class_cast_exception", None, &[checked_hub, object])?;
        let resolved = self.finish_with_result(object, "checkcast-leaf".to_string());

        let unresolved = self.build_unresolved_checkcast()?;
        Ok(XirPair::new(resolved, unresolved))
    }

    pub(super) fn build_checkcast_for_interface(&mut self) -> Result<XirPair, ContractViolation> {
        self.asm.restart_void();
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let id = self.asm.create_constant_input_parameter("interfaceID", ValueKind::Int);
        let checked_hub = self.asm.create_constant_input_parameter("checkedHub", ValueKind::Object);
        let hub = self.asm.create_temp("hub", ValueKind::Object);
        let pass = self.asm.create_inline_label("pass");
        let fail = self.asm.create_out_of_line_label("fail");
        let null = self.asm.null_object();
        self.asm.jeq(pass, object, null);
        self.emit_load_hub(object, hub, false);
        self.emit_subtype_probe(hub, id, checked_hub, pass, fail);
        self.asm.bind_inline(pass);

        self.asm.bind_out_of_line(fail);
        self.call_runtime_through_stub("throw_class_cast_exception", None, &[checked_hub, object])?;
        let resolved = self.finish_with_result(object, "checkcast-interface".to_string());

        let unresolved = self.build_unresolved_checkcast()?;
        Ok(XirPair::new(resolved, unresolved))
    }

    fn build_unresolved_instanceof(&mut self) -> Result<Arc<XirTemplate>, ContractViolation> {
        let result = self.asm.restart(ValueKind::Boolean);
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let guard = self.asm.create_input_parameter("guard", ValueKind::Object);
        let pass = self.asm.create_inline_label("pass");
        let fail = self.asm.create_inline_label("fail");
        let null = self.asm.null_object();
        self.asm.jeq(fail, object, null);
        self.call_runtime_through_stub("unresolved_instance_of", Some(result), &[object, guard])?;
        self.asm.jmp(pass);
        self.asm.bind_inline(fail);
        let f = self.asm.b(false);
        self.asm.mov(result, f);
        self.asm.bind_inline(pass);
        Ok(self.finish("instanceof-unresolved".to_string()))
    }

    pub(super) fn build_instanceof_for_leaf(&mut self) -> Result<XirPair, ContractViolation> {
        let result = self.asm.restart(ValueKind::Boolean);
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let checked_hub = self.asm.create_constant_input_parameter("checkedHub", ValueKind::Object);
        let hub = self.asm.create_temp("hub", ValueKind::Object);
        let fail = self.asm.create_inline_label("fail");
        let f = self.asm.b(false);
        let t = self.asm.b(true);
        self.asm.mov(result, f);
        let null = self.asm.null_object();
        self.asm.jeq(fail, object, null);
        self.emit_load_hub(object, hub, false);
        self.asm.jneq(fail, hub, checked_hub);
        self.asm.mov(result, t);
        self.asm.bind_inline(fail);
        let resolved = self.finish("instanceof-leaf".to_string());

        let unresolved = self.build_unresolved_instanceof()?;
        Ok(XirPair::new(resolved, unresolved))
    }

    pub(super) fn build_instanceof_for_interface(&mut self) -> Result<XirPair, ContractViolation> {
        let result = self.asm.restart(ValueKind::Boolean);
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let id = self.asm.create_constant_input_parameter("interfaceID", ValueKind::Int);
        let checked_hub = self.asm.create_constant_input_parameter("checkedHub", ValueKind::Object);
        let hub = self.asm.create_temp("hub", ValueKind::Object);
        let pass = self.asm.create_inline_label("pass");
        let fail = self.asm.create_inline_label("fail");
        let f = self.asm.b(false);
        let t = self.asm.b(true);
        self.asm.mov(result, f);
        let null = self.asm.null_object();
        self.asm.jeq(fail, object, null);
        self.emit_load_hub(object, hub, false);
        self.emit_subtype_probe(hub, id, checked_hub, pass, fail);
        self.asm.bind_inline(pass);
        self.asm.mov(result, t);
        self.asm.bind_inline(fail);
        let resolved = self.finish("instanceof-interface".to_string());

        let unresolved = self.build_unresolved_instanceof()?;
        Ok(XirPair::new(resolved, unresolved))
    }
}

// =============================================================================
// Snippet generation
// =============================================================================

/// Which resolved test a type needs.
enum TypeTest {
    Leaf,
    Class,
    Interface,
}

fn type_test(ty: &ResolvedType) -> TypeTest {
    if ty.is_interface {
        TypeTest::Interface
    } else if ty.is_leaf() {
        TypeTest::Leaf
    } else {
        TypeTest::Class
    }
}

impl TemplateCatalog {
    /// Allocate an instance of `ty`.
    ///
    /// Types that are unresolved, or resolved but not yet initialized, go
    /// through the guarded template so that the first execution runs the
    /// static initializer.
    pub fn gen_new_instance(&self, ty: &TypeRef) -> Snippet {
        let templates = &self.new_instance;
        match ty {
            TypeRef::Resolved(t) if t.is_initialized => {
                let template = if t.is_hybrid {
                    &templates.resolved_hybrid
                } else {
                    &templates.resolved
                };
                Snippet::new(template.clone(), [XirArgument::hub(t.hub)])
            }
            _ => Snippet::new(
                templates.unresolved.clone(),
                [type_guard(ty, ResolutionKind::ClassForNew)],
            ),
        }
    }

    /// Materialize `representation` of `ty`.
    pub fn gen_resolve_class(&self, ty: &TypeRef, representation: Representation) -> Snippet {
        let template = &self.resolve_class[representation.index()];
        Snippet::new(template.clone(), [type_guard(ty, ResolutionKind::Class)])
    }

    /// Checked cast of `object` to `ty`. The snippet's result is `object`.
    pub fn gen_check_cast(&self, object: XirArgument, ty: &TypeRef) -> Snippet {
        self.type_test_snippet(
            object,
            ty,
            [
                &self.checkcast_leaf,
                &self.checkcast_class,
                &self.checkcast_interface,
            ],
        )
    }

    /// Whether `object` is a non-null instance of `ty`.
    pub fn gen_instance_of(&self, object: XirArgument, ty: &TypeRef) -> Snippet {
        self.type_test_snippet(
            object,
            ty,
            [
                &self.instanceof_leaf,
                &self.instanceof_class,
                &self.instanceof_interface,
            ],
        )
    }

    fn type_test_snippet(
        &self,
        object: XirArgument,
        ty: &TypeRef,
        [leaf, class, interface]: [&XirPair; 3],
    ) -> Snippet {
        match ty {
            TypeRef::Resolved(t) => {
                let hub = XirArgument::hub(t.hub);
                debug_assert!(t.id <= MAX_TYPE_ID, "type id {} does not fit an int", t.id);
                let id = XirArgument::Int(t.id as i32);
                match type_test(t) {
                    TypeTest::Leaf => Snippet::new(leaf.resolved.clone(), [object, hub]),
                    TypeTest::Class => Snippet::new(class.resolved.clone(), [object, id, hub]),
                    TypeTest::Interface => {
                        Snippet::new(interface.resolved.clone(), [object, id, hub])
                    }
                }
            }
            TypeRef::Unresolved(_) => Snippet::new(
                interface.unresolved.clone(),
                [object, type_guard(ty, ResolutionKind::Class)],
            ),
        }
    }
}
