//! Template semantics, executed through the XIR evaluator against a
//! simulated heap.

mod support;

use kiln_core::{
    CodegenConfig, FieldRef, MethodRef, Representation, ResolvedMethod, RuntimeFault,
    TypeRef, ValueKind,
};
use kiln_jit::runtime::{Heap, Memory, RtValue};
use kiln_jit::xir::eval::{EvalError, XirEvaluator};
use kiln_jit::xir::{ValueId, XirArgument};
use support::{symbol, SimVm, DOG_VTABLE, PET_ID, PET_METHODS};

fn v(i: u32) -> XirArgument {
    XirArgument::Value(ValueId(i))
}

fn sample(kind: ValueKind, reference: u64) -> RtValue {
    match kind {
        ValueKind::Boolean => RtValue::Int(1),
        ValueKind::Byte => RtValue::Int(-5),
        ValueKind::Short => RtValue::Int(-300),
        ValueKind::Char => RtValue::Int(0xFFFE),
        ValueKind::Int => RtValue::Int(123_456),
        ValueKind::Float => RtValue::Float(1.5),
        ValueKind::Long => RtValue::Long(-1 << 40),
        ValueKind::Double => RtValue::Double(2.25),
        ValueKind::Object => RtValue::Ref(reference),
        ValueKind::Word => RtValue::Word(0xDEAD_BEEF_0000),
        _ => RtValue::Void,
    }
}

fn method(vtable_index: Option<u32>, itable_index: Option<u32>, holder_id: u32) -> ResolvedMethod {
    ResolvedMethod {
        holder_id,
        vtable_index,
        itable_index,
        entry_point: 0x7000,
        is_vm_entry_point: false,
        argument_words: 1,
    }
}

// =============================================================================
// Fields
// =============================================================================

#[test]
fn test_fields_round_trip_through_both_paths() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let bag = vm.new_object(&vm.bag);
    let dog = vm.new_object(&vm.dog);

    for (cpi, kind) in (1..).zip(ValueKind::storable()) {
        let field = vm.bag_field(kind);
        vm.register_field(cpi, &vm.bag, field);
        let resolved = FieldRef::Resolved(field);
        let unresolved = FieldRef::Unresolved {
            symbol: symbol(cpi),
            kind,
        };
        let value = sample(kind, dog);

        let put = catalog.gen_put_field(v(0), &resolved, v(1)).unwrap();
        eval.run(&put, &[RtValue::Ref(bag), value.clone()]).unwrap();
        let get = catalog.gen_get_field(v(0), &unresolved).unwrap();
        assert_eq!(eval.run(&get, &[RtValue::Ref(bag)]).unwrap(), value, "{kind}");

        let put = catalog.gen_put_field(v(0), &unresolved, v(1)).unwrap();
        eval.run(&put, &[RtValue::Ref(bag), value.clone()]).unwrap();
        let get = catalog.gen_get_field(v(0), &resolved).unwrap();
        assert_eq!(eval.run(&get, &[RtValue::Ref(bag)]).unwrap(), value, "{kind}");
    }
}

#[test]
fn test_only_reference_writes_hit_the_barrier() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let bag = vm.new_object(&vm.bag);
    let dog = vm.new_object(&vm.dog);

    let int_field = FieldRef::Resolved(vm.bag_field(ValueKind::Int));
    let put = catalog.gen_put_field(v(0), &int_field, v(1)).unwrap();
    eval.run(&put, &[RtValue::Ref(bag), RtValue::Int(9)]).unwrap();
    assert!(vm.barriers().is_empty());

    let object_field = FieldRef::Resolved(vm.bag_field(ValueKind::Object));
    let put = catalog.gen_put_field(v(0), &object_field, v(1)).unwrap();
    eval.run(&put, &[RtValue::Ref(bag), RtValue::Ref(dog)]).unwrap();
    assert_eq!(vm.barriers(), vec![(bag, dog)]);
}

#[test]
fn test_field_access_through_null_faults() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let field = FieldRef::Resolved(vm.bag_field(ValueKind::Long));
    let get = catalog.gen_get_field(v(0), &field).unwrap();
    assert_eq!(
        eval.run(&get, &[RtValue::NULL]),
        Err(EvalError::Fault(RuntimeFault::NullPointer))
    );
}

#[test]
fn test_unresolved_static_access_initializes_holder() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let holder = vm.uninitialized(&vm.bag);
    let field = vm.bag_field(ValueKind::Double);
    vm.register_field(3, &holder, field);
    let statics = vm.static_tuple(&vm.bag);

    let unresolved = FieldRef::Unresolved {
        symbol: symbol(3),
        kind: ValueKind::Double,
    };
    let put = catalog.gen_put_static(v(0), &unresolved, v(1)).unwrap();
    eval.run(&put, &[RtValue::Ref(statics), RtValue::Double(-0.5)])
        .unwrap();
    assert!(vm.initializations() >= 1);

    let get = catalog
        .gen_get_static(v(0), &FieldRef::Resolved(field))
        .unwrap();
    assert_eq!(
        eval.run(&get, &[RtValue::Ref(statics)]).unwrap(),
        RtValue::Double(-0.5)
    );
}

#[test]
fn test_unknown_field_is_a_linkage_fault() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let bag = vm.new_object(&vm.bag);
    let unresolved = FieldRef::Unresolved {
        symbol: symbol(99),
        kind: ValueKind::Int,
    };
    let get = catalog.gen_get_field(v(0), &unresolved).unwrap();
    assert!(matches!(
        eval.run(&get, &[RtValue::Ref(bag)]),
        Err(EvalError::Fault(RuntimeFault::Linkage(_)))
    ));
}

// =============================================================================
// Arrays
// =============================================================================

#[test]
fn test_array_bounds() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let array = vm.new_array_of(vm.array_hub(ValueKind::Short), 3);

    let store = catalog
        .gen_array_store(v(0), v(1), v(2), ValueKind::Short)
        .unwrap();
    let load = catalog.gen_array_load(v(0), v(1), ValueKind::Short).unwrap();
    for i in 0..3 {
        eval.run(&store, &[RtValue::Ref(array), RtValue::Int(i), RtValue::Int(-i - 1)])
            .unwrap();
    }
    for i in 0..3 {
        assert_eq!(
            eval.run(&load, &[RtValue::Ref(array), RtValue::Int(i)]).unwrap(),
            RtValue::Int(-i - 1)
        );
    }
    for index in [3, -1, i32::MAX] {
        assert_eq!(
            eval.run(&load, &[RtValue::Ref(array), RtValue::Int(index)]),
            Err(EvalError::Fault(RuntimeFault::IndexOutOfBounds { index, length: 3 }))
        );
    }
    let length = catalog.gen_array_length(v(0));
    assert_eq!(eval.run(&length, &[RtValue::Ref(array)]).unwrap(), RtValue::Int(3));
    assert_eq!(
        eval.run(&length, &[RtValue::NULL]),
        Err(EvalError::Fault(RuntimeFault::NullPointer))
    );
}

#[test]
fn test_reference_array_store_check() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let store = catalog
        .gen_array_store(v(0), v(1), v(2), ValueKind::Object)
        .unwrap();
    let load = catalog.gen_array_load(v(0), v(1), ValueKind::Object).unwrap();
    let dog = vm.new_object(&vm.dog);
    let cat = vm.new_object(&vm.cat);

    // Exact component match takes the fast path.
    let dogs = vm.new_array_of(vm.dog_array.hub, 2);
    eval.run(&store, &[RtValue::Ref(dogs), RtValue::Int(0), RtValue::Ref(dog)])
        .unwrap();
    assert_eq!(vm.barriers(), vec![(dogs, dog)]);

    // Subtype passes the out-of-line check and stores.
    let animals = vm.new_array_of(vm.animal_array.hub, 2);
    eval.run(&store, &[RtValue::Ref(animals), RtValue::Int(1), RtValue::Ref(dog)])
        .unwrap();
    assert_eq!(
        eval.run(&load, &[RtValue::Ref(animals), RtValue::Int(1)]).unwrap(),
        RtValue::Ref(dog)
    );

    // Null needs no check.
    eval.run(&store, &[RtValue::Ref(dogs), RtValue::Int(1), RtValue::NULL])
        .unwrap();

    // Unrelated type is rejected and nothing is stored.
    assert_eq!(
        eval.run(&store, &[RtValue::Ref(dogs), RtValue::Int(1), RtValue::Ref(cat)]),
        Err(EvalError::Fault(RuntimeFault::ArrayStore {
            element: vm.cat.id,
            component: vm.dog.id,
        }))
    );
    assert_eq!(
        eval.run(&load, &[RtValue::Ref(dogs), RtValue::Int(1)]).unwrap(),
        RtValue::NULL
    );
}

// =============================================================================
// Allocation
// =============================================================================

#[test]
fn test_new_instance_paths() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());

    let resolved = catalog.gen_new_instance(&TypeRef::Resolved(vm.dog.clone()));
    let object = eval.run(&resolved, &[]).unwrap().as_address().unwrap();
    assert_eq!(vm.hub_of(&vm.layout, object).unwrap(), vm.dog.hub);

    let uninitialized = vm.uninitialized(&vm.cat);
    let ty = vm.register_type(4, &uninitialized);
    let guarded = catalog.gen_new_instance(&TypeRef::Resolved(uninitialized));
    let object = eval.run(&guarded, &[]).unwrap().as_address().unwrap();
    assert_eq!(vm.hub_of(&vm.layout, object).unwrap(), vm.cat.hub);
    assert_eq!(vm.initializations(), 1);

    // Once initialized, the pool entry no longer needs the initializer.
    let object = eval
        .run(&catalog.gen_new_instance(&ty), &[])
        .unwrap()
        .as_address()
        .unwrap();
    assert_eq!(vm.hub_of(&vm.layout, object).unwrap(), vm.cat.hub);
    assert_eq!(vm.initializations(), 1);
}

#[test]
fn test_new_arrays() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let none = TypeRef::Unresolved(symbol(50));

    let ints = catalog
        .gen_new_array(v(0), ValueKind::Int, &none, &none)
        .unwrap();
    let array = eval.run(&ints, &[RtValue::Int(4)]).unwrap().as_address().unwrap();
    assert_eq!(vm.array_length(&vm.layout, array).unwrap(), 4);
    assert_eq!(vm.hub_of(&vm.layout, array).unwrap(), vm.array_hub(ValueKind::Int));

    vm.register_array_of(8, &vm.dog_array);
    let component = TypeRef::Unresolved(symbol(8));
    let unresolved = catalog
        .gen_new_array(v(0), ValueKind::Object, &component, &none)
        .unwrap();
    let array = eval.run(&unresolved, &[RtValue::Int(2)]).unwrap().as_address().unwrap();
    assert_eq!(vm.hub_of(&vm.layout, array).unwrap(), vm.dog_array.hub);

    let resolved = catalog
        .gen_new_array(
            v(0),
            ValueKind::Object,
            &TypeRef::Resolved(vm.dog.clone()),
            &TypeRef::Resolved(vm.dog_array.clone()),
        )
        .unwrap();
    let array = eval.run(&resolved, &[RtValue::Int(0)]).unwrap().as_address().unwrap();
    assert_eq!(vm.array_length(&vm.layout, array).unwrap(), 0);
}

#[test]
fn test_multi_arrays() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());

    // Rank 3 of a resolved type goes through the rank-N helper with a
    // preresolved guard.
    let snippet = catalog
        .gen_new_multi_array(&[v(0), v(1), v(2)], &TypeRef::Resolved(vm.int_3d.clone()))
        .unwrap();
    let outer = eval
        .run(&snippet, &[RtValue::Int(2), RtValue::Int(3), RtValue::Int(4)])
        .unwrap()
        .as_address()
        .unwrap();
    assert_eq!(vm.array_length(&vm.layout, outer).unwrap(), 2);
    let middle = vm
        .load(ValueKind::Object, vm.element_address(outer, ValueKind::Object, 1))
        .unwrap()
        .as_address()
        .unwrap();
    assert_eq!(vm.hub_of(&vm.layout, middle).unwrap(), vm.int_2d.hub);
    assert_eq!(vm.array_length(&vm.layout, middle).unwrap(), 3);
    let inner = vm
        .load(ValueKind::Object, vm.element_address(middle, ValueKind::Object, 2))
        .unwrap()
        .as_address()
        .unwrap();
    assert_eq!(vm.hub_of(&vm.layout, inner).unwrap(), vm.array_hub(ValueKind::Int));
    assert_eq!(vm.array_length(&vm.layout, inner).unwrap(), 4);

    // Rank 1 of a resolved type uses the fixed-rank helper.
    let snippet = catalog
        .gen_new_multi_array(&[v(0)], &TypeRef::Resolved(vm.int_2d.clone()))
        .unwrap();
    assert!(snippet.template().calls_runtime("allocate_multi_array1"));
    let array = eval.run(&snippet, &[RtValue::Int(5)]).unwrap().as_address().unwrap();
    assert_eq!(vm.array_length(&vm.layout, array).unwrap(), 5);

    // Unresolved rank 2.
    let ty = vm.register_type(12, &vm.int_2d);
    let snippet = catalog.gen_new_multi_array(&[v(0), v(1)], &ty).unwrap();
    let array = eval
        .run(&snippet, &[RtValue::Int(1), RtValue::Int(0)])
        .unwrap()
        .as_address()
        .unwrap();
    assert_eq!(vm.hub_of(&vm.layout, array).unwrap(), vm.int_2d.hub);
}

// =============================================================================
// Class resolution
// =============================================================================

#[test]
fn test_resolve_class_representations() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let ty = vm.register_type(20, &vm.bag);
    let hub = vm.bag.hub.0;

    let expected = [
        (Representation::ObjectHub, hub),
        (Representation::JavaClass, hub | 1 << 40),
        (Representation::TypeInfo, hub | 2 << 40),
        (Representation::StaticFields, vm.static_tuple(&vm.bag)),
    ];
    for (representation, address) in expected {
        let snippet = catalog.gen_resolve_class(&ty, representation);
        assert_eq!(
            eval.run(&snippet, &[]).unwrap().as_address(),
            Some(address),
            "{representation:?}"
        );
    }
}

// =============================================================================
// Invokes
// =============================================================================

#[test]
fn test_virtual_dispatch() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let dog = vm.new_object(&vm.dog);
    let cat = vm.new_object(&vm.cat);
    let speak = method(Some(2), None, vm.animal.id);
    vm.register_method(30, speak.clone());

    let resolved = catalog
        .gen_invoke_virtual(v(0), &MethodRef::Resolved(speak))
        .unwrap();
    let unresolved = catalog
        .gen_invoke_virtual(v(0), &MethodRef::Unresolved(symbol(30)))
        .unwrap();
    for snippet in [&resolved, &unresolved] {
        assert_eq!(
            eval.run(snippet, &[RtValue::Ref(dog)]).unwrap(),
            RtValue::Word(DOG_VTABLE[2])
        );
        assert_eq!(eval.run(snippet, &[RtValue::Ref(cat)]).unwrap(), RtValue::Word(0xC008));
        assert_eq!(
            eval.run(snippet, &[RtValue::NULL]),
            Err(EvalError::Fault(RuntimeFault::NullPointer))
        );
    }
}

#[test]
fn test_interface_dispatch() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let dog = vm.new_object(&vm.dog);

    for (cpi, index) in [(31u32, 1u32), (32, 2)] {
        let pet_method = method(None, Some(index), PET_ID);
        vm.register_method(cpi, pet_method.clone());
        let expected = RtValue::Word(PET_METHODS[index as usize - 1]);

        let resolved = catalog
            .gen_invoke_interface(v(0), &MethodRef::Resolved(pet_method))
            .unwrap();
        assert_eq!(eval.run(&resolved, &[RtValue::Ref(dog)]).unwrap(), expected);

        let unresolved = catalog
            .gen_invoke_interface(v(0), &MethodRef::Unresolved(symbol(cpi)))
            .unwrap();
        assert_eq!(eval.run(&unresolved, &[RtValue::Ref(dog)]).unwrap(), expected);
    }
}

#[test]
fn test_special_and_static_calls() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let dog = vm.new_object(&vm.dog);
    let target = method(None, None, vm.dog.id);
    vm.register_method(40, target.clone());
    let resolved = MethodRef::Resolved(target);
    let unresolved = MethodRef::Unresolved(symbol(40));

    let checked = catalog.gen_invoke_special(v(0), &resolved, true);
    assert_eq!(eval.run(&checked, &[RtValue::Ref(dog)]).unwrap(), RtValue::Word(0x7000));
    assert_eq!(
        eval.run(&checked, &[RtValue::NULL]),
        Err(EvalError::Fault(RuntimeFault::NullPointer))
    );
    let unchecked = catalog.gen_invoke_special(v(0), &resolved, false);
    assert_eq!(eval.run(&unchecked, &[]).unwrap(), RtValue::Word(0x7000));
    let linked = catalog.gen_invoke_special(v(0), &unresolved, true);
    assert_eq!(eval.run(&linked, &[]).unwrap(), RtValue::Word(0x7000));

    for m in [&resolved, &unresolved] {
        let snippet = catalog.gen_invoke_static(m);
        assert_eq!(eval.run(&snippet, &[]).unwrap(), RtValue::Word(0x7000));
    }
}

// =============================================================================
// Frames, monitors and exceptions
// =============================================================================

#[test]
fn test_monitors() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let dog = vm.new_object(&vm.dog);

    let enter = catalog.gen_monitor_enter(v(0));
    let exit = catalog.gen_monitor_exit(v(0));
    eval.run(&enter, &[RtValue::Ref(dog)]).unwrap();
    eval.run(&enter, &[RtValue::Ref(dog)]).unwrap();
    assert_eq!(vm.lock_count(dog), 2);
    eval.run(&exit, &[RtValue::Ref(dog)]).unwrap();
    eval.run(&exit, &[RtValue::Ref(dog)]).unwrap();
    assert_eq!(vm.lock_count(dog), 0);
    assert_eq!(
        eval.run(&exit, &[RtValue::Ref(dog)]),
        Err(EvalError::Fault(RuntimeFault::IllegalMonitorState))
    );
    assert_eq!(
        eval.run(&enter, &[RtValue::NULL]),
        Err(EvalError::Fault(RuntimeFault::NullPointer))
    );
}

#[test]
fn test_exception_object_is_taken_once() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let exception = vm.new_object(&vm.cat);
    vm.raise(exception);

    let snippet = catalog.gen_exception_object();
    assert_eq!(eval.run(&snippet, &[]).unwrap(), RtValue::Ref(exception));
    assert_eq!(vm.pending_exception(), 0);
    assert_eq!(eval.run(&snippet, &[]).unwrap(), RtValue::NULL);
}

#[test]
fn test_frame_templates_run() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let entry = MethodRef::Resolved(method(None, None, 1));

    let prologue = catalog.gen_prologue(&entry, Some(&[0x55u8][..])).unwrap();
    assert_eq!(eval.run(&prologue, &[]).unwrap(), RtValue::Void);
    assert_eq!(eval.run(&catalog.gen_safepoint(), &[]).unwrap(), RtValue::Void);
    assert_eq!(eval.run(&catalog.gen_epilogue(), &[]).unwrap(), RtValue::Void);
}

#[test]
fn test_layout_changes_flow_into_templates() {
    let layout = kiln_core::ObjectLayout {
        hub_words_offset: 48,
        ..Default::default()
    };
    let vm = SimVm::with_layout(layout);
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let dog = vm.new_object(&vm.dog);
    let speak = method(Some(2), None, vm.animal.id);
    let snippet = catalog
        .gen_invoke_virtual(v(0), &MethodRef::Resolved(speak))
        .unwrap();
    assert_eq!(eval.run(&snippet, &[RtValue::Ref(dog)]).unwrap(), RtValue::Word(DOG_VTABLE[2]));
}
