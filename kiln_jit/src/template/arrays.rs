//! Array templates: element access, length and allocation.

use std::sync::Arc;

use kiln_core::{
    CodegenError, ContractViolation, KindTable, ObjectLayout, ResolutionKind, TypeRef, ValueKind,
};

use super::{type_guard, CatalogBuilder, TemplateCatalog, XirPair};
use crate::xir::{Snippet, XirArgument, XirLabel, XirOperand, XirTemplate};

/// log2 of the element size of `kind`.
fn element_scale(kind: ValueKind, layout: &ObjectLayout) -> u8 {
    kind.size_in_bytes(layout.word_size).trailing_zeros() as u8
}

impl CatalogBuilder<'_> {
    /// Load the length of `array` and branch to a fresh out-of-line label
    /// when `index` is outside `[0, length)`.
    fn bounds_check(&mut self, array: XirOperand, index: XirOperand) -> XirLabel {
        let layout = self.config.layout;
        let length = self.asm.create_temp("length", ValueKind::Int);
        let fail = self.asm.create_out_of_line_label("fail");
        let length_offset = self.asm.i(layout.array_length_offset);
        self.asm.pload(ValueKind::Int, length, array, length_offset, true);
        self.asm.jugteq(fail, index, length);
        fail
    }

    pub(super) fn build_array_load(
        &mut self,
        kind: ValueKind,
    ) -> Result<Arc<XirTemplate>, ContractViolation> {
        let layout = self.config.layout;
        let result = self.asm.restart(kind);
        let array = self.asm.create_input_parameter("array", ValueKind::Object);
        let index = self.asm.create_input_parameter("index", ValueKind::Int);
        let fail = self.bounds_check(array, index);
        self.asm.pload_indexed(
            kind,
            result,
            array,
            index,
            layout.first_element_offset,
            element_scale(kind, &layout),
            false,
        );

        self.asm.bind_out_of_line(fail);
        self.call_runtime_through_stub(
            "throw_array_index_out_of_bounds_exception",
            None,
            &[array, index],
        )?;
        Ok(self.finish(format!("arrayload<{kind}>")))
    }

    pub(super) fn build_array_store(
        &mut self,
        kind: ValueKind,
    ) -> Result<Arc<XirTemplate>, ContractViolation> {
        let layout = self.config.layout;
        self.asm.restart_void();
        let array = self.asm.create_input_parameter("array", ValueKind::Object);
        let index = self.asm.create_input_parameter("index", ValueKind::Int);
        let value = self.asm.create_input_parameter("value", kind);
        let fail = self.bounds_check(array, index);

        let store_check = if kind == ValueKind::Object {
            let store = self.asm.create_inline_label("store");
            let slow_store_check = self.asm.create_out_of_line_label("slowStoreCheck");
            let component_hub = self.asm.create_temp("componentHub", ValueKind::Object);
            let value_hub = self.asm.create_temp("valueHub", ValueKind::Object);

            let null = self.asm.null_object();
            self.asm.jeq(store, value, null);
            let hub_offset = self.asm.i(layout.hub_offset);
            let component_offset = self.asm.i(layout.component_hub_offset);
            self.asm.pload(ValueKind::Object, component_hub, array, hub_offset, false);
            self.asm
                .pload(ValueKind::Object, component_hub, component_hub, component_offset, false);
            self.asm.pload(ValueKind::Object, value_hub, value, hub_offset, false);
            self.asm.jneq(slow_store_check, component_hub, value_hub);
            self.asm.bind_inline(store);
            Some((store, slow_store_check, component_hub, value_hub))
        } else {
            None
        };

        self.asm.pstore_indexed(
            kind,
            array,
            index,
            value,
            layout.first_element_offset,
            element_scale(kind, &layout),
            false,
        );
        if kind == ValueKind::Object {
            self.add_write_barrier(array, value)?;
        }

        self.asm.bind_out_of_line(fail);
        self.call_runtime_through_stub(
            "throw_array_index_out_of_bounds_exception",
            None,
            &[array, index],
        )?;
        if let Some((store, slow_store_check, component_hub, value_hub)) = store_check {
            self.asm.bind_out_of_line(slow_store_check);
            self.call_runtime_through_stub(
                "array_hub_store_check",
                None,
                &[component_hub, value_hub],
            )?;
            self.asm.jmp(store);
        }
        Ok(self.finish(format!("arraystore<{kind}>")))
    }

    pub(super) fn build_array_length(&mut self) -> Arc<XirTemplate> {
        let result = self.asm.restart(ValueKind::Int);
        let array = self.asm.create_input_parameter("array", ValueKind::Object);
        let length_offset = self.asm.i(self.config.layout.array_length_offset);
        self.asm.pload(ValueKind::Int, result, array, length_offset, true);
        self.finish("arraylength".to_string())
    }

    pub(super) fn build_new_array(&mut self, kind: ValueKind) -> Result<XirPair, ContractViolation> {
        if kind != ValueKind::Object {
            let result = self.asm.restart(ValueKind::Object);
            let hub = self.asm.create_constant_input_parameter("hub", ValueKind::Object);
            let length = self.asm.create_input_parameter("length", ValueKind::Int);
            self.call_runtime_through_stub("allocate_primitive_array", Some(result), &[hub, length])?;
            let template = self.finish(format!("newarray<{kind}>"));
            return Ok(XirPair::new(template.clone(), template));
        }

        let result = self.asm.restart(ValueKind::Object);
        let hub = self.asm.create_constant_input_parameter("hub", ValueKind::Object);
        let length = self.asm.create_input_parameter("length", ValueKind::Int);
        self.call_runtime_through_stub("allocate_object_array", Some(result), &[hub, length])?;
        let resolved = self.finish("anewarray".to_string());

        let result = self.asm.restart(ValueKind::Object);
        let guard = self.asm.create_constant_input_parameter("guard", ValueKind::Object);
        let length = self.asm.create_input_parameter("length", ValueKind::Int);
        let hub = self.asm.create_temp("hub", ValueKind::Object);
        self.call_runtime_through_stub("resolve_new_array", Some(hub), &[guard])?;
        self.call_runtime_through_stub("allocate_object_array", Some(result), &[hub, length])?;
        let unresolved = self.finish("anewarray-unresolved".to_string());

        Ok(XirPair::new(resolved, unresolved))
    }

    pub(super) fn build_new_multi_array(&mut self, rank: usize) -> Result<XirPair, ContractViolation> {
        let unresolved = {
            let result = self.asm.restart(ValueKind::Object);
            let lengths: Vec<_> = (0..rank)
                .map(|i| self.asm.create_input_parameter(format!("lengths[{i}]"), ValueKind::Int))
                .collect();
            let guard = self.asm.create_constant_input_parameter("guard", ValueKind::Object);
            let length_array = self.asm.create_temp("lengthArray", ValueKind::Object);
            let rank_constant = self.asm.i(rank as i32);
            self.call_runtime_through_stub("allocate_int_array", Some(length_array), &[rank_constant])?;
            let first = self.config.layout.first_element_offset;
            for (i, &length) in lengths.iter().enumerate() {
                let offset = self.asm.i(first + 4 * i as i32);
                self.asm.pstore(ValueKind::Int, length_array, offset, length, false);
            }
            self.call_runtime_through_stub(
                "allocate_multi_array_n",
                Some(result),
                &[guard, length_array],
            )?;
            self.finish(format!("multianewarray<{rank}>-unresolved"))
        };

        if !self.config.is_small_rank(rank) {
            return Ok(XirPair::new(unresolved.clone(), unresolved));
        }

        let result = self.asm.restart(ValueKind::Object);
        let lengths: Vec<_> = (0..rank)
            .map(|i| self.asm.create_input_parameter(format!("lengths[{i}]"), ValueKind::Int))
            .collect();
        let hub = self.asm.create_constant_input_parameter("hub", ValueKind::Object);
        let mut args = vec![hub];
        args.extend(lengths);
        self.call_runtime_through_stub(&format!("allocate_multi_array{rank}"), Some(result), &args)?;
        let resolved = self.finish(format!("multianewarray<{rank}>"));

        Ok(XirPair::new(resolved, unresolved))
    }
}

// =============================================================================
// Snippet generation
// =============================================================================

fn element_template<'t, T>(
    table: &'t KindTable<T>,
    operation: &'static str,
    kind: ValueKind,
) -> Result<&'t T, CodegenError> {
    table
        .get(kind)
        .ok_or(CodegenError::InoperableKind { operation, kind })
}

impl TemplateCatalog {
    /// Bounds-checked element load.
    pub fn gen_array_load(
        &self,
        array: XirArgument,
        index: XirArgument,
        kind: ValueKind,
    ) -> Result<Snippet, CodegenError> {
        let template = element_template(&self.array_load, "arrayload", kind)?;
        Ok(Snippet::new(template.clone(), [array, index]))
    }

    /// Bounds-checked element store, store-checked for references.
    pub fn gen_array_store(
        &self,
        array: XirArgument,
        index: XirArgument,
        value: XirArgument,
        kind: ValueKind,
    ) -> Result<Snippet, CodegenError> {
        let template = element_template(&self.array_store, "arraystore", kind)?;
        Ok(Snippet::new(template.clone(), [array, index, value]))
    }

    /// Length of `array`. Traps on null.
    pub fn gen_array_length(&self, array: XirArgument) -> Snippet {
        Snippet::new(self.array_length.clone(), [array])
    }

    /// Allocate a one-dimensional array of `kind`.
    ///
    /// Primitive kinds use the preregistered array hub. Reference arrays use
    /// the array type's hub when it is resolved, and otherwise resolve the
    /// array class of `component` at first execution.
    pub fn gen_new_array(
        &self,
        length: XirArgument,
        kind: ValueKind,
        component: &TypeRef,
        array: &TypeRef,
    ) -> Result<Snippet, CodegenError> {
        let pair = element_template(&self.new_array, "newarray", kind)?;
        if kind != ValueKind::Object {
            let hub = self
                .array_hub(kind)
                .ok_or(CodegenError::Contract(ContractViolation::MissingArrayHub(kind)))?;
            return Ok(Snippet::new(pair.resolved.clone(), [XirArgument::hub(hub), length]));
        }
        Ok(match array {
            TypeRef::Resolved(ty) => {
                Snippet::new(pair.resolved.clone(), [XirArgument::hub(ty.hub), length])
            }
            TypeRef::Unresolved(_) => Snippet::new(
                pair.unresolved.clone(),
                [type_guard(component, ResolutionKind::ArrayClass), length],
            ),
        })
    }

    /// Allocate a multi-dimensional array, `lengths[0]` outermost.
    pub fn gen_new_multi_array(
        &self,
        lengths: &[XirArgument],
        ty: &TypeRef,
    ) -> Result<Snippet, CodegenError> {
        let rank = lengths.len();
        if rank == 0 {
            return Err(CodegenError::ZeroRank);
        }
        let pair = self
            .new_multi_array_templates(rank)
            .ok_or(CodegenError::RankTooLarge {
                rank,
                max: self.config.max_multi_array_rank,
            })?;
        let mut arguments = lengths.to_vec();
        Ok(match ty {
            TypeRef::Resolved(resolved) if self.config.is_small_rank(rank) => {
                arguments.push(XirArgument::hub(resolved.hub));
                Snippet::new(pair.resolved.clone(), arguments)
            }
            _ => {
                arguments.push(type_guard(ty, ResolutionKind::Class));
                Snippet::new(pair.unresolved.clone(), arguments)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::is_preresolved;
    use super::super::test_support::catalog;
    use super::*;
    use crate::xir::{ValueId, XirOp};
    use kiln_core::{HubHandle, PoolHandle, ResolvedType, UnresolvedSymbol};

    fn v(i: u32) -> XirArgument {
        XirArgument::Value(ValueId(i))
    }

    fn resolved_array(hub: u64) -> TypeRef {
        TypeRef::Resolved(ResolvedType {
            id: 40,
            hub: HubHandle(hub),
            is_interface: false,
            is_final: true,
            is_array: true,
            is_hybrid: false,
            is_initialized: true,
        })
    }

    fn unresolved_type(cpi: u32) -> TypeRef {
        TypeRef::Unresolved(UnresolvedSymbol {
            pool: PoolHandle(2),
            cpi,
        })
    }

    #[test]
    fn test_element_scale() {
        let layout = ObjectLayout::default();
        assert_eq!(element_scale(ValueKind::Byte, &layout), 0);
        assert_eq!(element_scale(ValueKind::Char, &layout), 1);
        assert_eq!(element_scale(ValueKind::Float, &layout), 2);
        assert_eq!(element_scale(ValueKind::Object, &layout), 3);
    }

    #[test]
    fn test_array_load_bounds_check_shape() {
        let catalog = catalog();
        let snippet = catalog.gen_array_load(v(0), v(1), ValueKind::Short).unwrap();
        let template = snippet.template();
        assert_eq!(template.name(), "arrayload<short>");
        assert!(matches!(
            template.fast_path(),
            [
                XirOp::Load { kind: ValueKind::Int, can_trap: true, .. },
                XirOp::Branch { .. },
                XirOp::Load { kind: ValueKind::Short, can_trap: false, .. },
            ]
        ));
        assert!(template.calls_runtime("throw_array_index_out_of_bounds_exception"));
    }

    #[test]
    fn test_store_check_only_for_references() {
        let catalog = catalog();
        for kind in ValueKind::storable() {
            let snippet = catalog.gen_array_store(v(0), v(1), v(2), kind).unwrap();
            assert_eq!(
                snippet.template().calls_runtime("array_hub_store_check"),
                kind == ValueKind::Object,
                "{kind}"
            );
        }
    }

    #[test]
    fn test_primitive_new_array_uses_registered_hub() {
        let catalog = catalog();
        let snippet = catalog
            .gen_new_array(v(0), ValueKind::Int, &unresolved_type(3), &unresolved_type(4))
            .unwrap();
        let expected = catalog.array_hub(ValueKind::Int).unwrap();
        assert_eq!(snippet.arguments()[0], XirArgument::hub(expected));
        assert!(snippet.template().calls_runtime("allocate_primitive_array"));
    }

    #[test]
    fn test_reference_new_array_variants() {
        let catalog = catalog();
        let resolved = catalog
            .gen_new_array(v(0), ValueKind::Object, &unresolved_type(3), &resolved_array(0x900))
            .unwrap();
        assert_eq!(resolved.template().name(), "anewarray");
        assert_eq!(resolved.arguments()[0], XirArgument::hub(HubHandle(0x900)));

        let unresolved = catalog
            .gen_new_array(v(0), ValueKind::Object, &unresolved_type(3), &unresolved_type(4))
            .unwrap();
        assert_eq!(unresolved.template().name(), "anewarray-unresolved");
        match &unresolved.arguments()[0] {
            XirArgument::Guard(g) => assert_eq!(g.kind(), ResolutionKind::ArrayClass),
            other => panic!("expected guard, got {other}"),
        }

        let component = catalog
            .gen_new_array(v(0), ValueKind::Object, &resolved_array(0x800), &unresolved_type(4))
            .unwrap();
        assert!(is_preresolved(&component.arguments()[0]));
    }

    #[test]
    fn test_multi_array_rank_selection() {
        let catalog = catalog();
        let small = catalog
            .gen_new_multi_array(&[v(0)], &resolved_array(0x900))
            .unwrap();
        assert_eq!(small.template().name(), "multianewarray<1>");
        assert!(small.template().calls_runtime("allocate_multi_array1"));
        assert_eq!(small.arguments().last(), Some(&XirArgument::hub(HubHandle(0x900))));

        let large = catalog
            .gen_new_multi_array(&[v(0), v(1), v(2)], &resolved_array(0x900))
            .unwrap();
        assert_eq!(large.template().name(), "multianewarray<3>-unresolved");
        assert!(large.template().calls_runtime("allocate_multi_array_n"));
        assert!(is_preresolved(large.arguments().last().unwrap()));

        let unresolved = catalog
            .gen_new_multi_array(&[v(0)], &unresolved_type(9))
            .unwrap();
        assert_eq!(unresolved.template().name(), "multianewarray<1>-unresolved");
    }

    #[test]
    fn test_multi_array_rank_limits() {
        let catalog = catalog();
        assert_eq!(
            catalog.gen_new_multi_array(&[], &unresolved_type(9)).unwrap_err(),
            CodegenError::ZeroRank
        );
        let lengths = vec![v(0); 7];
        assert_eq!(
            catalog.gen_new_multi_array(&lengths, &unresolved_type(9)).unwrap_err(),
            CodegenError::RankTooLarge { rank: 7, max: 6 }
        );
    }
}
