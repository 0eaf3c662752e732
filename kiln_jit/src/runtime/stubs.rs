//! Runtime-call stub cache.

use std::sync::Arc;

use kiln_core::{ContractViolation, ValueKind};
use rustc_hash::FxHashMap;

use super::calls::{RuntimeCall, RuntimeCallRegistry};
use crate::xir::{TemplateAssembler, XirTemplate};

/// Memoized trampolines from generated code to runtime services.
///
/// Only used while the catalog is built, on one thread.
#[derive(Debug)]
pub struct RuntimeStubCache {
    registry: RuntimeCallRegistry,
    by_name: FxHashMap<&'static str, Arc<XirTemplate>>,
    stubs: Vec<Arc<XirTemplate>>,
}

impl RuntimeStubCache {
    /// Create an empty cache over `registry`.
    pub fn new(registry: RuntimeCallRegistry) -> Self {
        Self {
            registry,
            by_name: FxHashMap::default(),
            stubs: Vec::new(),
        }
    }

    /// The stub calling service `name` from a site that passes `args` and
    /// expects `result`.
    ///
    /// Every request is checked against the registered signature, including
    /// requests served from the cache.
    pub fn stub_for(
        &mut self,
        name: &str,
        result: ValueKind,
        args: &[ValueKind],
    ) -> Result<Arc<XirTemplate>, ContractViolation> {
        let call = self
            .registry
            .lookup(name)
            .ok_or_else(|| ContractViolation::MissingRuntimeCall(name.to_string()))?;
        check_signature(call, result, args)?;

        if let Some(stub) = self.by_name.get(call.name) {
            return Ok(Arc::clone(stub));
        }
        let stub = Arc::new(build_stub(call));
        tracing::debug!(call = call.name, params = call.params.len(), "generated runtime stub");
        self.by_name.insert(call.name, Arc::clone(&stub));
        self.stubs.push(Arc::clone(&stub));
        Ok(stub)
    }

    /// Every stub generated so far, in generation order.
    pub fn stubs(&self) -> &[Arc<XirTemplate>] {
        &self.stubs
    }

    /// Consume the cache, returning the generated stubs.
    pub fn into_stubs(self) -> Vec<Arc<XirTemplate>> {
        self.stubs
    }
}

fn check_signature(
    call: &RuntimeCall,
    result: ValueKind,
    args: &[ValueKind],
) -> Result<(), ContractViolation> {
    if call.params.len() != args.len() {
        return Err(ContractViolation::ArityMismatch {
            name: call.name.to_string(),
            expected: call.params.len(),
            actual: args.len(),
        });
    }
    if let Some((index, (&expected, &actual))) = call
        .params
        .iter()
        .zip(args)
        .enumerate()
        .find(|(_, (declared, passed))| declared != passed)
    {
        return Err(ContractViolation::ParameterKindMismatch {
            name: call.name.to_string(),
            index,
            expected,
            actual,
        });
    }
    if call.result != result {
        return Err(ContractViolation::ResultKindMismatch {
            name: call.name.to_string(),
            expected: call.result,
            actual: result,
        });
    }
    Ok(())
}

fn build_stub(call: &'static RuntimeCall) -> XirTemplate {
    let mut asm = TemplateAssembler::new();
    let result = match call.result {
        ValueKind::Void => {
            asm.restart_void();
            None
        }
        kind => Some(asm.restart(kind)),
    };
    let params: Vec<_> = call
        .params
        .iter()
        .enumerate()
        .map(|(i, &kind)| asm.create_input_parameter(format!("rt_args[{i}]"), kind))
        .collect();
    asm.call_runtime(call, result, &params);
    asm.finish_stub(format!("stub-{}", call.name))
}
