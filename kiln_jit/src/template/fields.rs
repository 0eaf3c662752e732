//! Field access templates.
//!
//! Instance and static fields share one shape: a load or store at
//! `object + offset`. For statics the object is the holder's static tuple,
//! and resolving the guard also initializes the holder.

use kiln_core::{
    CodegenError, ContractViolation, FieldRef, ResolutionGuard, ResolutionKind, ValueKind,
};

use super::{CatalogBuilder, TemplateCatalog, XirPair};
use crate::xir::{Snippet, XirArgument};

impl CatalogBuilder<'_> {
    pub(super) fn build_get_field(
        &mut self,
        kind: ValueKind,
        is_static: bool,
    ) -> Result<XirPair, ContractViolation> {
        let op = if is_static { "getstatic" } else { "getfield" };

        let result = self.asm.restart(kind);
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let offset = self.asm.create_constant_input_parameter("offset", ValueKind::Int);
        self.asm.pload(kind, result, object, offset, true);
        let resolved = self.finish(format!("{op}<{kind}>"));

        let result = self.asm.restart(kind);
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let guard = self.asm.create_input_parameter("guard", ValueKind::Object);
        let offset = self.asm.create_temp("offset", ValueKind::Int);
        let resolver = if is_static {
            "resolve_get_static"
        } else {
            "resolve_get_field"
        };
        self.call_runtime_through_stub(resolver, Some(offset), &[guard])?;
        self.asm.pload(kind, result, object, offset, true);
        let unresolved = self.finish(format!("{op}<{kind}>-unresolved"));

        Ok(XirPair::new(resolved, unresolved))
    }

    pub(super) fn build_put_field(
        &mut self,
        kind: ValueKind,
        is_static: bool,
    ) -> Result<XirPair, ContractViolation> {
        let op = if is_static { "putstatic" } else { "putfield" };

        self.asm.restart_void();
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let value = self.asm.create_input_parameter("value", kind);
        let offset = self.asm.create_constant_input_parameter("offset", ValueKind::Int);
        self.asm.pstore(kind, object, offset, value, true);
        if kind == ValueKind::Object {
            self.add_write_barrier(object, value)?;
        }
        let resolved = self.finish(format!("{op}<{kind}>"));

        self.asm.restart_void();
        let object = self.asm.create_input_parameter("object", ValueKind::Object);
        let value = self.asm.create_input_parameter("value", kind);
        let guard = self.asm.create_input_parameter("guard", ValueKind::Object);
        let offset = self.asm.create_temp("offset", ValueKind::Int);
        let resolver = if is_static {
            "resolve_put_static"
        } else {
            "resolve_put_field"
        };
        self.call_runtime_through_stub(resolver, Some(offset), &[guard])?;
        self.asm.pstore(kind, object, offset, value, true);
        if kind == ValueKind::Object {
            self.add_write_barrier(object, value)?;
        }
        let unresolved = self.finish(format!("{op}<{kind}>-unresolved"));

        Ok(XirPair::new(resolved, unresolved))
    }
}

// =============================================================================
// Snippet generation
// =============================================================================

fn field_pair<'t>(
    table: &'t kiln_core::KindTable<XirPair>,
    operation: &'static str,
    kind: ValueKind,
) -> Result<&'t XirPair, CodegenError> {
    table
        .get(kind)
        .ok_or(CodegenError::InoperableKind { operation, kind })
}

fn read_snippet(
    pair: &XirPair,
    object: XirArgument,
    field: &FieldRef,
    guard_kind: ResolutionKind,
) -> Snippet {
    match field {
        FieldRef::Resolved(f) => {
            Snippet::new(pair.resolved.clone(), [object, XirArgument::Int(f.offset)])
        }
        FieldRef::Unresolved { symbol, .. } => {
            let guard = XirArgument::guard(ResolutionGuard::in_pool(*symbol, guard_kind));
            Snippet::new(pair.unresolved.clone(), [object, guard])
        }
    }
}

fn write_snippet(
    pair: &XirPair,
    object: XirArgument,
    field: &FieldRef,
    value: XirArgument,
    guard_kind: ResolutionKind,
) -> Snippet {
    match field {
        FieldRef::Resolved(f) => Snippet::new(
            pair.resolved.clone(),
            [object, value, XirArgument::Int(f.offset)],
        ),
        FieldRef::Unresolved { symbol, .. } => {
            let guard = XirArgument::guard(ResolutionGuard::in_pool(*symbol, guard_kind));
            Snippet::new(pair.unresolved.clone(), [object, value, guard])
        }
    }
}

impl TemplateCatalog {
    /// Read an instance field of `receiver`.
    pub fn gen_get_field(
        &self,
        receiver: XirArgument,
        field: &FieldRef,
    ) -> Result<Snippet, CodegenError> {
        let pair = field_pair(&self.get_field, "getfield", field.kind())?;
        Ok(read_snippet(
            pair,
            receiver,
            field,
            ResolutionKind::InstanceFieldForReading,
        ))
    }

    /// Write `value` to an instance field of `receiver`.
    pub fn gen_put_field(
        &self,
        receiver: XirArgument,
        field: &FieldRef,
        value: XirArgument,
    ) -> Result<Snippet, CodegenError> {
        let pair = field_pair(&self.put_field, "putfield", field.kind())?;
        Ok(write_snippet(
            pair,
            receiver,
            field,
            value,
            ResolutionKind::InstanceFieldForWriting,
        ))
    }

    /// Read a static field from the holder's static tuple.
    pub fn gen_get_static(
        &self,
        static_tuple: XirArgument,
        field: &FieldRef,
    ) -> Result<Snippet, CodegenError> {
        let pair = field_pair(&self.get_static, "getstatic", field.kind())?;
        Ok(read_snippet(
            pair,
            static_tuple,
            field,
            ResolutionKind::StaticFieldForReading,
        ))
    }

    /// Write `value` to a static field in the holder's static tuple.
    pub fn gen_put_static(
        &self,
        static_tuple: XirArgument,
        field: &FieldRef,
        value: XirArgument,
    ) -> Result<Snippet, CodegenError> {
        let pair = field_pair(&self.put_static, "putstatic", field.kind())?;
        Ok(write_snippet(
            pair,
            static_tuple,
            field,
            value,
            ResolutionKind::StaticFieldForWriting,
        ))
    }
}
