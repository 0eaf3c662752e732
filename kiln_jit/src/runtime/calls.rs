//! The static runtime-call registry.
//!
//! Every service generated code may call is listed here by name with its
//! declared signature. Templates reference services by name; the stub cache
//! checks each reference against this table.

use std::fmt;

use kiln_core::{
    HubHandle, LinkageError, Representation, ResolutionGuard, ResolvedType, RuntimeFault, ValueKind,
};
use rustc_hash::FxHashMap;

use super::services::RuntimeServices;
use super::value::RtValue;

/// Body of a runtime service.
pub type RuntimeEntry = fn(&RuntimeServices<'_>, &[RtValue]) -> Result<RtValue, RuntimeFault>;

/// A named runtime service with its declared signature.
pub struct RuntimeCall {
    /// Service name.
    pub name: &'static str,
    /// Declared parameter kinds.
    pub params: &'static [ValueKind],
    /// Declared result kind.
    pub result: ValueKind,
    /// Service body.
    pub entry: RuntimeEntry,
}

impl fmt::Debug for RuntimeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeCall")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("result", &self.result)
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Name-indexed view of a call table.
#[derive(Debug)]
pub struct RuntimeCallRegistry {
    calls: &'static [RuntimeCall],
    index: FxHashMap<&'static str, usize>,
}

impl RuntimeCallRegistry {
    /// The services every VM provides.
    pub fn standard() -> Self {
        Self::from_calls(STANDARD_CALLS)
    }

    /// Index an arbitrary table. Later entries shadow earlier ones.
    pub fn from_calls(calls: &'static [RuntimeCall]) -> Self {
        let index = calls.iter().enumerate().map(|(i, c)| (c.name, i)).collect();
        Self { calls, index }
    }

    /// Look up a service by name.
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<&'static RuntimeCall> {
        let calls = self.calls;
        self.index.get(name).map(|&i| &calls[i])
    }

    /// Every registered service.
    pub fn calls(&self) -> &'static [RuntimeCall] {
        self.calls
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no service is registered.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

use ValueKind::{Boolean, Int, Object, Void, Word};

const fn call(
    name: &'static str,
    params: &'static [ValueKind],
    result: ValueKind,
    entry: RuntimeEntry,
) -> RuntimeCall {
    RuntimeCall {
        name,
        params,
        result,
        entry,
    }
}

/// The standard service table.
pub static STANDARD_CALLS: &[RuntimeCall] = &[
    // Resolution
    call("resolve_type_info", &[Object], Object, resolve_type_info),
    call("resolve_class_object", &[Object], Object, resolve_class_object),
    call("resolve_hub", &[Object], Object, resolve_hub),
    call("resolve_static_tuple", &[Object], Object, resolve_static_tuple),
    call("resolve_new", &[Object], Object, resolve_new),
    call("resolve_new_array", &[Object], Object, resolve_new_array),
    call("resolve_get_field", &[Object], Int, resolve_field_offset),
    call("resolve_put_field", &[Object], Int, resolve_field_offset),
    call("resolve_get_static", &[Object], Int, resolve_static_offset),
    call("resolve_put_static", &[Object], Int, resolve_static_offset),
    call("resolve_static_method", &[Object], Word, resolve_linked_method),
    call("resolve_special_method", &[Object], Word, resolve_linked_method),
    call("resolve_virtual_method", &[Object], Int, resolve_virtual_method),
    call("resolve_interface_method", &[Object], Int, resolve_interface_method),
    call("resolve_interface_id", &[Object], Int, resolve_interface_id),
    // Allocation
    call("allocate_primitive_array", &[Object, Int], Object, allocate_array),
    call("allocate_object_array", &[Object, Int], Object, allocate_array),
    call("allocate_object", &[Object], Object, allocate_object),
    call("allocate_hybrid", &[Object], Object, allocate_hybrid),
    call("allocate_int_array", &[Int], Object, allocate_int_array),
    call("allocate_multi_array1", &[Object, Int], Object, allocate_multi_array),
    call("allocate_multi_array2", &[Object, Int, Int], Object, allocate_multi_array),
    call("allocate_multi_array3", &[Object, Int, Int, Int], Object, allocate_multi_array),
    call("allocate_multi_array_n", &[Object, Object], Object, allocate_multi_array_n),
    // Type checks
    call("unresolved_checkcast", &[Object, Object], Void, unresolved_checkcast),
    call("unresolved_instance_of", &[Object, Object], Boolean, unresolved_instance_of),
    call("array_hub_store_check", &[Object, Object], Void, array_hub_store_check),
    // Throws
    call("throw_class_cast_exception", &[Object, Object], Void, throw_class_cast),
    call("throw_null_pointer_exception", &[], Void, throw_null_pointer),
    call("throw_array_index_out_of_bounds_exception", &[Object, Int], Void, throw_index_out_of_bounds),
    // Monitors and barriers
    call("monitor_enter", &[Object], Void, monitor_enter),
    call("monitor_exit", &[Object], Void, monitor_exit),
    call("write_barrier", &[Object, Object], Void, write_barrier),
];

// =============================================================================
// Argument decoding
// =============================================================================

fn int_arg(args: &[RtValue], i: usize) -> Result<i32, RuntimeFault> {
    args.get(i)
        .and_then(RtValue::as_int)
        .ok_or(RuntimeFault::Internal("expected an int argument"))
}

fn ref_arg(args: &[RtValue], i: usize) -> Result<u64, RuntimeFault> {
    args.get(i)
        .and_then(RtValue::as_address)
        .ok_or(RuntimeFault::Internal("expected a reference argument"))
}

fn hub_arg(args: &[RtValue], i: usize) -> Result<HubHandle, RuntimeFault> {
    match ref_arg(args, i)? {
        0 => Err(RuntimeFault::Internal("null hub")),
        hub => Ok(HubHandle(hub)),
    }
}

fn guard_arg(args: &[RtValue], i: usize) -> Result<&ResolutionGuard, RuntimeFault> {
    args.get(i)
        .and_then(RtValue::as_guard)
        .map(|g| g.as_ref())
        .ok_or(RuntimeFault::Internal("expected a guard argument"))
}

// =============================================================================
// Resolution
// =============================================================================

fn initialized(rt: &RuntimeServices<'_>, mut ty: ResolvedType) -> Result<ResolvedType, LinkageError> {
    if !ty.is_initialized {
        rt.resolver.initialize(&ty)?;
        ty.is_initialized = true;
    }
    Ok(ty)
}

fn resolve_type(rt: &RuntimeServices<'_>, guard: &ResolutionGuard) -> Result<ResolvedType, LinkageError> {
    let ty = rt.resolver.resolve_type(guard)?;
    if guard.kind().requires_initialization() {
        return initialized(rt, ty);
    }
    Ok(ty)
}

fn representation(
    rt: &RuntimeServices<'_>,
    args: &[RtValue],
    representation: Representation,
) -> Result<RtValue, RuntimeFault> {
    let ty = resolve_type(rt, guard_arg(args, 0)?)?;
    Ok(RtValue::Ref(rt.resolver.representation(&ty, representation)))
}

fn resolve_type_info(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    representation(rt, args, Representation::TypeInfo)
}

fn resolve_class_object(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    representation(rt, args, Representation::JavaClass)
}

fn resolve_hub(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let ty = resolve_type(rt, guard_arg(args, 0)?)?;
    Ok(RtValue::Ref(ty.hub.0))
}

fn resolve_static_tuple(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let ty = initialized(rt, resolve_type(rt, guard_arg(args, 0)?)?)?;
    Ok(RtValue::Ref(rt.resolver.representation(&ty, Representation::StaticFields)))
}

fn resolve_new(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let ty = initialized(rt, resolve_type(rt, guard_arg(args, 0)?)?)?;
    Ok(RtValue::Ref(ty.hub.0))
}

fn resolve_new_array(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let ty = resolve_type(rt, guard_arg(args, 0)?)?;
    if !ty.is_array {
        return Err(LinkageError::IncompatibleChange("expected an array class").into());
    }
    Ok(RtValue::Ref(ty.hub.0))
}

fn resolve_field_offset(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let (_, field) = rt.resolver.resolve_field(guard_arg(args, 0)?)?;
    Ok(RtValue::Int(field.offset))
}

fn resolve_static_offset(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let (holder, field) = rt.resolver.resolve_field(guard_arg(args, 0)?)?;
    initialized(rt, holder)?;
    Ok(RtValue::Int(field.offset))
}

fn resolve_linked_method(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let method = rt.resolver.resolve_method(guard_arg(args, 0)?)?;
    Ok(RtValue::Word(rt.resolver.link(&method)?))
}

fn resolve_virtual_method(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let method = rt.resolver.resolve_method(guard_arg(args, 0)?)?;
    let index = method
        .vtable_index
        .ok_or(LinkageError::IncompatibleChange("method has no vtable slot"))?;
    Ok(RtValue::Int(rt.layout.hub_word_offset(index)))
}

fn resolve_interface_method(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let method = rt.resolver.resolve_method(guard_arg(args, 0)?)?;
    let index = method
        .itable_index
        .ok_or(LinkageError::IncompatibleChange("method is not an interface method"))?;
    Ok(RtValue::Int(index as i32))
}

fn resolve_interface_id(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let method = rt.resolver.resolve_method(guard_arg(args, 0)?)?;
    Ok(RtValue::Int(method.holder_id as i32))
}

// =============================================================================
// Allocation
// =============================================================================

fn checked_length(length: i32) -> Result<i32, RuntimeFault> {
    if length < 0 {
        return Err(RuntimeFault::NegativeArraySize(length));
    }
    Ok(length)
}

fn allocate_array(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let hub = hub_arg(args, 0)?;
    let length = checked_length(int_arg(args, 1)?)?;
    Ok(RtValue::Ref(rt.heap.allocate_array(hub, length)?))
}

fn allocate_object(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    Ok(RtValue::Ref(rt.heap.allocate_tuple(hub_arg(args, 0)?)?))
}

fn allocate_hybrid(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    Ok(RtValue::Ref(rt.heap.allocate_hybrid(hub_arg(args, 0)?)?))
}

fn allocate_int_array(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let length = checked_length(int_arg(args, 0)?)?;
    Ok(RtValue::Ref(rt.heap.allocate_array(rt.int_array_hub, length)?))
}

/// Allocate nested arrays, `lengths[0]` outermost.
fn new_multi_array(rt: &RuntimeServices<'_>, hub: HubHandle, lengths: &[i32]) -> Result<u64, RuntimeFault> {
    let Some((&length, rest)) = lengths.split_first() else {
        return Err(RuntimeFault::Internal("multi-array without dimensions"));
    };
    let array = rt.heap.allocate_array(hub, length)?;
    if !rest.is_empty() && length > 0 {
        let component = rt.heap.component_hub(&rt.layout, hub)?;
        let word = i64::from(rt.layout.word_size);
        let first = array.wrapping_add_signed(rt.layout.first_element_offset.into());
        for i in 0..i64::from(length) {
            let element = new_multi_array(rt, component, rest)?;
            rt.heap
                .store(ValueKind::Object, first.wrapping_add_signed(i * word), &RtValue::Ref(element))?;
            rt.heap.write_barrier(array, element);
        }
    }
    Ok(array)
}

fn allocate_multi_array(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let hub = hub_arg(args, 0)?;
    let mut lengths = [0i32; kiln_core::config::MAX_FIXED_RANK];
    let rank = args.len() - 1;
    for (i, length) in lengths.iter_mut().take(rank).enumerate() {
        *length = int_arg(args, i + 1)?;
    }
    if let Some(&negative) = lengths[..rank].iter().find(|&&l| l < 0) {
        return Err(RuntimeFault::NegativeArraySize(negative));
    }
    Ok(RtValue::Ref(new_multi_array(rt, hub, &lengths[..rank])?))
}

fn allocate_multi_array_n(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let guard = guard_arg(args, 0)?;
    let dims = ref_arg(args, 1)?;
    let rank = rt.heap.array_length(&rt.layout, dims)?;
    let first = dims.wrapping_add_signed(rt.layout.first_element_offset.into());
    let lengths = (0..i64::from(rank))
        .map(|i| {
            rt.heap
                .load(ValueKind::Int, first.wrapping_add_signed(i * 4))?
                .as_int()
                .ok_or(RuntimeFault::Internal("dimension array holds a non-int"))
        })
        .collect::<Result<Vec<i32>, RuntimeFault>>()?;
    if let Some(&negative) = lengths.iter().find(|&&l| l < 0) {
        return Err(RuntimeFault::NegativeArraySize(negative));
    }
    let ty = resolve_type(rt, guard)?;
    Ok(RtValue::Ref(new_multi_array(rt, ty.hub, &lengths)?))
}

// =============================================================================
// Type checks
// =============================================================================

fn is_instance(rt: &RuntimeServices<'_>, object: u64, ty: &ResolvedType) -> Result<bool, RuntimeFault> {
    let hub = rt.heap.hub_of(&rt.layout, object)?;
    Ok(hub == ty.hub || rt.heap.is_subtype(&rt.layout, hub, ty.id)?)
}

fn unresolved_checkcast(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let object = ref_arg(args, 0)?;
    let ty = resolve_type(rt, guard_arg(args, 1)?)?;
    if !is_instance(rt, object, &ty)? {
        let hub = rt.heap.hub_of(&rt.layout, object)?;
        return Err(RuntimeFault::ClassCast {
            actual: rt.heap.type_id_of(&rt.layout, hub)?,
            expected: ty.id,
        });
    }
    Ok(RtValue::Void)
}

fn unresolved_instance_of(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let object = ref_arg(args, 0)?;
    let ty = resolve_type(rt, guard_arg(args, 1)?)?;
    Ok(RtValue::Int(i32::from(is_instance(rt, object, &ty)?)))
}

fn array_hub_store_check(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let component = hub_arg(args, 0)?;
    let element = hub_arg(args, 1)?;
    let component_id = rt.heap.type_id_of(&rt.layout, component)?;
    if !rt.heap.is_subtype(&rt.layout, element, component_id)? {
        return Err(RuntimeFault::ArrayStore {
            element: rt.heap.type_id_of(&rt.layout, element)?,
            component: component_id,
        });
    }
    Ok(RtValue::Void)
}

// =============================================================================
// Throws
// =============================================================================

fn throw_class_cast(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let expected = rt.heap.type_id_of(&rt.layout, hub_arg(args, 0)?)?;
    let hub = rt.heap.hub_of(&rt.layout, ref_arg(args, 1)?)?;
    Err(RuntimeFault::ClassCast {
        actual: rt.heap.type_id_of(&rt.layout, hub)?,
        expected,
    })
}

fn throw_null_pointer(_: &RuntimeServices<'_>, _: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    Err(RuntimeFault::NullPointer)
}

fn throw_index_out_of_bounds(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    let length = rt.heap.array_length(&rt.layout, ref_arg(args, 0)?)?;
    Err(RuntimeFault::IndexOutOfBounds {
        index: int_arg(args, 1)?,
        length,
    })
}

// =============================================================================
// Monitors and barriers
// =============================================================================

fn non_null(object: u64) -> Result<u64, RuntimeFault> {
    match object {
        0 => Err(RuntimeFault::NullPointer),
        object => Ok(object),
    }
}

fn monitor_enter(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    rt.monitors.monitor_enter(non_null(ref_arg(args, 0)?)?)?;
    Ok(RtValue::Void)
}

fn monitor_exit(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    rt.monitors.monitor_exit(non_null(ref_arg(args, 0)?)?)?;
    Ok(RtValue::Void)
}

fn write_barrier(rt: &RuntimeServices<'_>, args: &[RtValue]) -> Result<RtValue, RuntimeFault> {
    rt.heap.write_barrier(ref_arg(args, 0)?, ref_arg(args, 1)?);
    Ok(RtValue::Void)
}
