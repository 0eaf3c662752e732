//! The template catalog and snippet generator.
//!
//! [`TemplateCatalog::build`] records every template once: per-kind field,
//! array and allocation templates, the invoke family, type tests, monitors
//! and the method frame templates. Afterwards the catalog is immutable and
//! shared by reference across compiling threads, which ask it for a
//! [`Snippet`] at each operation site through the `gen_*` methods.
//!
//! Guarded operations come in pairs. The resolved template takes the
//! compile-time-known offset, descriptor or address as a constant; the
//! unresolved one takes a [`ResolutionGuard`] and asks a runtime helper for
//! the missing value before doing the same work.

mod arrays;
mod calls;
mod control;
mod fields;
mod objects;

use std::sync::Arc;

use kiln_core::{
    CodegenConfig, ContractViolation, HubHandle, KindTable, Representation,
    ResolutionGuard, ResolutionKind, TypeRef, ValueKind,
};

use crate::runtime::{RuntimeCallRegistry, RuntimeStubCache};
use crate::xir::{TemplateAssembler, XirArgument, XirOperand, XirTemplate};

// =============================================================================
// Template groups
// =============================================================================

/// Resolved and unresolved variants of one operation.
#[derive(Debug, Clone)]
pub struct XirPair {
    /// Template taking compile-time constants.
    pub resolved: Arc<XirTemplate>,
    /// Template taking a resolution guard.
    pub unresolved: Arc<XirTemplate>,
}

impl XirPair {
    fn new(resolved: Arc<XirTemplate>, unresolved: Arc<XirTemplate>) -> Self {
        Self {
            resolved,
            unresolved,
        }
    }
}

/// `invokespecial` variants.
#[derive(Debug, Clone)]
pub struct InvokeSpecialTemplates {
    /// Resolved, with a receiver null check.
    pub resolved: Arc<XirTemplate>,
    /// Resolved, receiver known non-null.
    pub resolved_null_check_eliminated: Arc<XirTemplate>,
    /// Unresolved.
    pub unresolved: Arc<XirTemplate>,
}

/// `new` variants.
#[derive(Debug, Clone)]
pub struct NewInstanceTemplates {
    /// Resolved tuple allocation.
    pub resolved: Arc<XirTemplate>,
    /// Resolved hybrid allocation.
    pub resolved_hybrid: Arc<XirTemplate>,
    /// Unresolved (or uninitialized) type.
    pub unresolved: Arc<XirTemplate>,
}

// =============================================================================
// TemplateCatalog
// =============================================================================

/// Every template, built once per target configuration.
#[derive(Debug)]
pub struct TemplateCatalog {
    config: CodegenConfig,
    array_hubs: KindTable<HubHandle>,

    get_field: KindTable<XirPair>,
    put_field: KindTable<XirPair>,
    get_static: KindTable<XirPair>,
    put_static: KindTable<XirPair>,

    array_load: KindTable<Arc<XirTemplate>>,
    array_store: KindTable<Arc<XirTemplate>>,
    array_length: Arc<XirTemplate>,
    new_array: KindTable<XirPair>,
    /// Indexed by `rank - 1`.
    new_multi_array: Vec<XirPair>,

    invoke_virtual: XirPair,
    invoke_interface: XirPair,
    invoke_special: InvokeSpecialTemplates,
    invoke_static: XirPair,

    new_instance: NewInstanceTemplates,
    resolve_class: Vec<Arc<XirTemplate>>,

    checkcast_leaf: XirPair,
    checkcast_class: XirPair,
    checkcast_interface: XirPair,
    instanceof_leaf: XirPair,
    instanceof_class: XirPair,
    instanceof_interface: XirPair,

    monitor_enter: Arc<XirTemplate>,
    monitor_exit: Arc<XirTemplate>,
    safepoint: Arc<XirTemplate>,
    epilogue: Arc<XirTemplate>,
    exception_object: Arc<XirTemplate>,

    stubs: Vec<Arc<XirTemplate>>,
}

impl TemplateCatalog {
    /// Build the catalog against the standard runtime-call registry.
    ///
    /// `array_hubs` must hold the hub of the array class for every storable
    /// kind (`Object` maps to `Object[]`).
    pub fn build(
        config: &CodegenConfig,
        array_hubs: KindTable<HubHandle>,
    ) -> Result<Self, ContractViolation> {
        Self::build_with_registry(config, array_hubs, RuntimeCallRegistry::standard())
    }

    /// Build the catalog, aborting the process on a contract violation.
    pub fn build_or_abort(config: &CodegenConfig, array_hubs: KindTable<HubHandle>) -> Self {
        match Self::build(config, array_hubs) {
            Ok(catalog) => catalog,
            Err(violation) => {
                tracing::error!(%violation, "template catalog construction failed");
                std::process::abort();
            }
        }
    }

    /// Build the catalog against an explicit registry.
    pub fn build_with_registry(
        config: &CodegenConfig,
        array_hubs: KindTable<HubHandle>,
        registry: RuntimeCallRegistry,
    ) -> Result<Self, ContractViolation> {
        if let Some(kind) = ValueKind::storable().find(|&k| array_hubs.get(k).is_none()) {
            return Err(ContractViolation::MissingArrayHub(kind));
        }

        let mut b = CatalogBuilder::new(config, registry);
        let storable = ValueKind::is_storable;

        let epilogue = b.build_epilogue();
        let get_field = KindTable::try_build(storable, |k| b.build_get_field(k, false))?;
        let put_field = KindTable::try_build(storable, |k| b.build_put_field(k, false))?;
        let get_static = KindTable::try_build(storable, |k| b.build_get_field(k, true))?;
        let put_static = KindTable::try_build(storable, |k| b.build_put_field(k, true))?;
        let array_load = KindTable::try_build(storable, |k| b.build_array_load(k))?;
        let array_store = KindTable::try_build(storable, |k| b.build_array_store(k))?;
        let new_array = KindTable::try_build(storable, |k| b.build_new_array(k))?;

        let invoke_virtual = b.build_invoke_virtual()?;
        let invoke_interface = b.build_invoke_interface()?;
        let invoke_special = b.build_invoke_special()?;
        let invoke_static = b.build_invoke_static()?;

        let new_multi_array = (1..=config.max_multi_array_rank)
            .map(|rank| b.build_new_multi_array(rank))
            .collect::<Result<Vec<_>, _>>()?;

        let resolve_class = Representation::ALL
            .iter()
            .map(|&r| b.build_resolve_class(r))
            .collect::<Result<Vec<_>, _>>()?;

        let safepoint = b.build_safepoint();
        let array_length = b.build_array_length();
        let monitor_enter = b.build_monitor("monitor_enter", "monitorenter")?;
        let monitor_exit = b.build_monitor("monitor_exit", "monitorexit")?;
        let new_instance = b.build_new_instance()?;

        let checkcast_leaf = b.build_checkcast_for_leaf()?;
        // Class tests share the interface probe.
        let checkcast_class = b.build_checkcast_for_interface()?;
        let checkcast_interface = b.build_checkcast_for_interface()?;
        let instanceof_leaf = b.build_instanceof_for_leaf()?;
        let instanceof_class = b.build_instanceof_for_interface()?;
        let instanceof_interface = b.build_instanceof_for_interface()?;

        let exception_object = b.build_exception_object();

        let templates = b.templates;
        let stubs = b.stubs.into_stubs();
        tracing::debug!(templates, stubs = stubs.len(), "template catalog built");

        Ok(Self {
            config: config.clone(),
            array_hubs,
            get_field,
            put_field,
            get_static,
            put_static,
            array_load,
            array_store,
            array_length,
            new_array,
            new_multi_array,
            invoke_virtual,
            invoke_interface,
            invoke_special,
            invoke_static,
            new_instance,
            resolve_class,
            checkcast_leaf,
            checkcast_class,
            checkcast_interface,
            instanceof_leaf,
            instanceof_class,
            instanceof_interface,
            monitor_enter,
            monitor_exit,
            safepoint,
            epilogue,
            exception_object,
            stubs,
        })
    }

    /// Every runtime-call stub generated while building.
    pub fn stubs(&self) -> &[Arc<XirTemplate>] {
        &self.stubs
    }

    /// Configuration the catalog was built for.
    pub fn config(&self) -> &CodegenConfig {
        &self.config
    }

    /// Instance field read templates.
    pub fn get_field_templates(&self, kind: ValueKind) -> Option<&XirPair> {
        self.get_field.get(kind)
    }

    /// Instance field write templates.
    pub fn put_field_templates(&self, kind: ValueKind) -> Option<&XirPair> {
        self.put_field.get(kind)
    }

    /// Static field read templates.
    pub fn get_static_templates(&self, kind: ValueKind) -> Option<&XirPair> {
        self.get_static.get(kind)
    }

    /// Static field write templates.
    pub fn put_static_templates(&self, kind: ValueKind) -> Option<&XirPair> {
        self.put_static.get(kind)
    }

    /// Array allocation templates.
    pub fn new_array_templates(&self, kind: ValueKind) -> Option<&XirPair> {
        self.new_array.get(kind)
    }

    /// Multi-dimensional allocation templates for `rank`.
    pub fn new_multi_array_templates(&self, rank: usize) -> Option<&XirPair> {
        rank.checked_sub(1).and_then(|i| self.new_multi_array.get(i))
    }

    /// Every resolved/unresolved pair in the catalog, labelled.
    pub fn pairs(&self) -> impl Iterator<Item = (String, &XirPair)> {
        let per_kind = [
            ("getfield", &self.get_field),
            ("putfield", &self.put_field),
            ("getstatic", &self.get_static),
            ("putstatic", &self.put_static),
            ("newarray", &self.new_array),
        ]
        .into_iter()
        .flat_map(|(op, table)| table.iter().map(move |(k, p)| (format!("{op}<{k}>"), p)));
        let single = [
            ("invokevirtual", &self.invoke_virtual),
            ("invokeinterface", &self.invoke_interface),
            ("invokestatic", &self.invoke_static),
            ("checkcast-leaf", &self.checkcast_leaf),
            ("checkcast-class", &self.checkcast_class),
            ("checkcast-interface", &self.checkcast_interface),
            ("instanceof-leaf", &self.instanceof_leaf),
            ("instanceof-class", &self.instanceof_class),
            ("instanceof-interface", &self.instanceof_interface),
        ]
        .into_iter()
        .map(|(op, p)| (op.to_string(), p));
        let multi = self
            .new_multi_array
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("multianewarray<{}>", i + 1), p));
        per_kind.chain(single).chain(multi)
    }

    fn array_hub(&self, kind: ValueKind) -> Option<HubHandle> {
        self.array_hubs.get(kind).copied()
    }
}

// =============================================================================
// Guards
// =============================================================================

/// Guard naming a type, for a resolved or unresolved reference.
fn type_guard(ty: &TypeRef, kind: ResolutionKind) -> XirArgument {
    let guard = match ty {
        TypeRef::Unresolved(symbol) => ResolutionGuard::in_pool(*symbol, kind),
        TypeRef::Resolved(resolved) => ResolutionGuard::preresolved(resolved.hub, kind),
    };
    XirArgument::guard(guard)
}

/// Whether an argument names a preresolved type.
#[cfg(test)]
pub(crate) fn is_preresolved(arg: &XirArgument) -> bool {
    matches!(
        arg,
        XirArgument::Guard(g) if matches!(g.target(), kiln_core::GuardTarget::Preresolved(_))
    )
}

// =============================================================================
// CatalogBuilder
// =============================================================================

/// State used while recording templates. Single-threaded.
pub(crate) struct CatalogBuilder<'c> {
    asm: TemplateAssembler,
    stubs: RuntimeStubCache,
    config: &'c CodegenConfig,
    templates: usize,
}

impl<'c> CatalogBuilder<'c> {
    fn new(config: &'c CodegenConfig, registry: RuntimeCallRegistry) -> Self {
        Self {
            asm: TemplateAssembler::new(),
            stubs: RuntimeStubCache::new(registry),
            config,
            templates: 0,
        }
    }

    /// Emit a call to service `name` through its stub.
    fn call_runtime_through_stub(
        &mut self,
        name: &str,
        result: Option<XirOperand>,
        args: &[XirOperand],
    ) -> Result<(), ContractViolation> {
        let result_kind = result.map_or(ValueKind::Void, XirOperand::kind);
        let kinds: smallvec::SmallVec<[ValueKind; 4]> = args.iter().map(|a| a.kind()).collect();
        let stub = self.stubs.stub_for(name, result_kind, &kinds)?;
        self.asm.call_stub(&stub, result, args);
        Ok(())
    }

    fn add_write_barrier(
        &mut self,
        object: XirOperand,
        value: XirOperand,
    ) -> Result<(), ContractViolation> {
        self.call_runtime_through_stub("write_barrier", None, &[object, value])
    }

    fn finish(&mut self, name: String) -> Arc<XirTemplate> {
        let template = self.asm.finish_template(name);
        self.record(template)
    }

    fn finish_with_result(&mut self, result: XirOperand, name: String) -> Arc<XirTemplate> {
        let template = self.asm.finish_template_with_result(result, name);
        self.record(template)
    }

    fn record(&mut self, template: XirTemplate) -> Arc<XirTemplate> {
        if self.config.print_templates {
            tracing::trace!("{template}");
        }
        self.templates += 1;
        Arc::new(template)
    }

    /// Load `hub`'s method-table redirection for type `id`: the word index
    /// of the block that type `id` would occupy. The caller re-checks the
    /// block's first word when the hub may not implement the type.
    fn emit_mtable_redirect(&mut self, hub: XirOperand, id: XirOperand) -> XirOperand {
        let layout = self.config.layout;
        let scratch = self.asm.create_temp("mtableTemp", ValueKind::Int);
        let slot = self.asm.create_temp("a", ValueKind::Int);
        let length_offset = self.asm.i(layout.mtable_length_offset);
        let start_offset = self.asm.i(layout.mtable_start_index_offset);
        self.asm.pload(ValueKind::Int, scratch, hub, length_offset, false);
        self.asm.modulo(slot, id, scratch);
        self.asm.pload(ValueKind::Int, scratch, hub, start_offset, false);
        self.asm.add(slot, slot, scratch);
        self.asm
            .pload_indexed(ValueKind::Int, slot, hub, slot, layout.hub_words_offset, 2, false);
        slot
    }

    /// Load the hub of `object`, trapping on null.
    fn emit_load_hub(&mut self, object: XirOperand, hub: XirOperand, can_trap: bool) {
        let hub_offset = self.asm.i(self.config.layout.hub_offset);
        self.asm.pload(ValueKind::Object, hub, object, hub_offset, can_trap);
    }
}
