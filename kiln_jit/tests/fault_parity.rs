//! The resolved and unresolved flavors of an operation raise the same
//! faults.

mod support;

use kiln_core::{CodegenConfig, FieldRef, RuntimeFault, TypeRef, ValueKind};
use kiln_jit::runtime::{Heap, RtValue};
use kiln_jit::xir::eval::{EvalError, XirEvaluator};
use kiln_jit::xir::{Snippet, ValueId, XirArgument};
use support::{symbol, SimVm};

fn v(i: u32) -> XirArgument {
    XirArgument::Value(ValueId(i))
}

fn fault(fault: RuntimeFault) -> Result<RtValue, EvalError> {
    Err(EvalError::Fault(fault))
}

#[test]
fn test_negative_array_size() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    vm.register_array_of(1, &vm.dog_array);
    let any = TypeRef::Unresolved(symbol(99));

    let snippets: Vec<Snippet> = vec![
        catalog.gen_new_array(v(0), ValueKind::Int, &any, &any).unwrap(),
        catalog
            .gen_new_array(
                v(0),
                ValueKind::Object,
                &TypeRef::Resolved(vm.dog.clone()),
                &TypeRef::Resolved(vm.dog_array.clone()),
            )
            .unwrap(),
        catalog
            .gen_new_array(v(0), ValueKind::Object, &TypeRef::Unresolved(symbol(1)), &any)
            .unwrap(),
        catalog
            .gen_new_multi_array(&[v(0)], &TypeRef::Resolved(vm.int_2d.clone()))
            .unwrap(),
        catalog
            .gen_new_multi_array(&[v(0)], &vm.register_type(2, &vm.int_2d))
            .unwrap(),
    ];
    for snippet in &snippets {
        assert_eq!(
            eval.run(snippet, &[RtValue::Int(-7)]),
            fault(RuntimeFault::NegativeArraySize(-7)),
            "{}",
            snippet.template().name()
        );
    }
}

#[test]
fn test_negative_inner_dimension() {
    let vm = SimVm::new();
    let config = CodegenConfig {
        small_multi_array_rank: 3,
        ..CodegenConfig::default()
    };
    let catalog = vm.catalog(&config);
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());

    let fixed = catalog
        .gen_new_multi_array(&[v(0), v(1)], &TypeRef::Resolved(vm.int_2d.clone()))
        .unwrap();
    assert!(fixed.template().calls_runtime("allocate_multi_array2"));
    let generic = catalog
        .gen_new_multi_array(&[v(0), v(1)], &vm.register_type(3, &vm.int_2d))
        .unwrap();
    assert!(generic.template().calls_runtime("allocate_multi_array_n"));

    for snippet in [&fixed, &generic] {
        assert_eq!(
            eval.run(snippet, &[RtValue::Int(2), RtValue::Int(-1)]),
            fault(RuntimeFault::NegativeArraySize(-1))
        );
    }
}

#[test]
fn test_class_cast() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let cat = vm.new_object(&vm.cat);
    let expected = fault(RuntimeFault::ClassCast {
        actual: vm.cat.id,
        expected: vm.dog.id,
    });

    let resolved = catalog.gen_check_cast(v(0), &TypeRef::Resolved(vm.dog.clone()));
    let unresolved = catalog.gen_check_cast(v(0), &vm.register_type(1, &vm.dog));
    assert_eq!(eval.run(&resolved, &[RtValue::Ref(cat)]), expected);
    assert_eq!(eval.run(&unresolved, &[RtValue::Ref(cat)]), expected);
}

#[test]
fn test_null_field_access() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let field = vm.bag_field(ValueKind::Object);
    vm.register_field(1, &vm.bag, field);
    let unresolved = FieldRef::Unresolved {
        symbol: symbol(1),
        kind: ValueKind::Object,
    };

    for field in [FieldRef::Resolved(field), unresolved] {
        let get = catalog.gen_get_field(v(0), &field).unwrap();
        assert_eq!(eval.run(&get, &[RtValue::NULL]), fault(RuntimeFault::NullPointer));
        let put = catalog.gen_put_field(v(0), &field, v(1)).unwrap();
        assert_eq!(
            eval.run(&put, &[RtValue::NULL, RtValue::NULL]),
            fault(RuntimeFault::NullPointer)
        );
    }
    assert!(vm.barriers().is_empty());
}

#[test]
fn test_index_out_of_bounds_by_kind() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());

    for kind in ValueKind::storable() {
        let hub = vm.array_hub(kind);
        let array = vm.new_array_of(hub, 2);
        assert_eq!(vm.array_length(&vm.layout, array).unwrap(), 2);
        let load = catalog.gen_array_load(v(0), v(1), kind).unwrap();
        for index in [2, -1] {
            assert_eq!(
                eval.run(&load, &[RtValue::Ref(array), RtValue::Int(index)]),
                fault(RuntimeFault::IndexOutOfBounds { index, length: 2 }),
                "{kind}"
            );
        }
    }
}

#[test]
fn test_bounds_check_precedes_store_check() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let dogs = vm.new_array_of(vm.dog_array.hub, 1);
    let cat = vm.new_object(&vm.cat);
    let store = catalog
        .gen_array_store(v(0), v(1), v(2), ValueKind::Object)
        .unwrap();

    assert_eq!(
        eval.run(&store, &[RtValue::Ref(dogs), RtValue::Int(1), RtValue::Ref(cat)]),
        fault(RuntimeFault::IndexOutOfBounds { index: 1, length: 1 })
    );
    assert_eq!(
        eval.run(&store, &[RtValue::Ref(dogs), RtValue::Int(0), RtValue::Ref(cat)]),
        fault(RuntimeFault::ArrayStore {
            element: vm.cat.id,
            component: vm.dog.id,
        })
    );
    assert!(vm.barriers().is_empty());
}

#[test]
fn test_linkage_failures_agree() {
    let vm = SimVm::new();
    let catalog = vm.catalog(&CodegenConfig::default());
    let rt = vm.services();
    let eval = XirEvaluator::new(&rt, vm.latch());
    let dog = vm.new_object(&vm.dog);
    let missing = TypeRef::Unresolved(symbol(404));

    let snippets = [
        catalog.gen_new_instance(&missing),
        catalog.gen_check_cast(v(0), &missing),
        catalog.gen_instance_of(v(0), &missing),
    ];
    for snippet in &snippets {
        let result = if snippet.arguments().len() == 1 {
            eval.run(snippet, &[])
        } else {
            eval.run(snippet, &[RtValue::Ref(dog)])
        };
        assert!(
            matches!(result, Err(EvalError::Fault(RuntimeFault::Linkage(_)))),
            "{}: {result:?}",
            snippet.template().name()
        );
    }
}
