//! Simulated VM for integration tests.
//!
//! A flat byte heap with bump allocation, real hub images written through
//! `HubImage::write_to`, a constant-pool resolver and counting monitors.
//! Everything uses `RefCell`, so a `SimVm` stays on one thread.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use kiln_core::{
    CodegenConfig, GuardTarget, HubHandle, KindTable, LinkageError, ObjectLayout, PoolHandle,
    Representation, ResolutionGuard, ResolutionKind, ResolvedField, ResolvedMethod, ResolvedType,
    RuntimeFault, TypeId, TypeRef, UnresolvedSymbol, ValueKind,
};
use kiln_jit::runtime::{
    Heap, HubImage, HubImageBuilder, Memory, MonitorScheme, Resolver, RtValue, RuntimeServices,
};
use kiln_jit::TemplateCatalog;
use rustc_hash::{FxHashMap, FxHashSet};

pub const POOL: PoolHandle = PoolHandle(7);

/// Addresses below this are unmapped.
const HEAP_BASE: u64 = 0x100;

/// Size of the thread-locals block the latch register points at.
const THREAD_LOCALS_SIZE: u64 = 128;

// Type ids of the fixture hierarchy.
pub const OBJECT_ID: TypeId = 1;
pub const ANIMAL_ID: TypeId = 2;
pub const DOG_ID: TypeId = 3;
pub const CAT_ID: TypeId = 4;
pub const BAG_ID: TypeId = 5;
pub const PET_ID: TypeId = 10;
pub const OBJECT_ARRAY_ID: TypeId = 120;
pub const ANIMAL_ARRAY_ID: TypeId = 121;
pub const DOG_ARRAY_ID: TypeId = 122;
pub const INT_2D_ID: TypeId = 140;
pub const INT_3D_ID: TypeId = 141;

/// Pet's itable entries, after the interface id word.
pub const PET_METHODS: [u64; 2] = [0xD100, 0xD200];
/// Dog's vtable.
pub const DOG_VTABLE: [u64; 3] = [0x9000, 0x9008, 0xD008];
/// Cat's vtable.
pub const CAT_VTABLE: [u64; 3] = [0x9000, 0x9008, 0xC008];

/// Bag has one 8-byte slot per storable kind, in `ValueKind::storable()`
/// order, starting at this offset.
pub const BAG_FIRST_FIELD: i32 = 16;

#[derive(Debug, Clone, Copy)]
enum Shape {
    Tuple { size: u64 },
    Array { element_size: u64 },
}

// =============================================================================
// SimVm
// =============================================================================

pub struct SimVm {
    pub layout: ObjectLayout,
    memory: RefCell<Vec<u8>>,
    shapes: RefCell<FxHashMap<u64, Shape>>,
    images: RefCell<FxHashMap<u64, HubImage>>,
    by_hub: RefCell<FxHashMap<u64, ResolvedType>>,
    statics: RefCell<FxHashMap<TypeId, u64>>,
    pool_types: RefCell<FxHashMap<u32, ResolvedType>>,
    pool_arrays: RefCell<FxHashMap<u32, ResolvedType>>,
    pool_fields: RefCell<FxHashMap<u32, (ResolvedType, ResolvedField)>>,
    pool_methods: RefCell<FxHashMap<u32, ResolvedMethod>>,
    initialized: RefCell<FxHashSet<TypeId>>,
    pending_initialization: RefCell<FxHashSet<TypeId>>,
    initializations: Cell<u32>,
    resolutions: Cell<u32>,
    barriers: RefCell<Vec<(u64, u64)>>,
    locks: RefCell<FxHashMap<u64, u32>>,
    array_hubs: KindTable<HubHandle>,
    latch: u64,
    pub object: ResolvedType,
    pub animal: ResolvedType,
    pub dog: ResolvedType,
    pub cat: ResolvedType,
    pub bag: ResolvedType,
    pub pet: ResolvedType,
    pub object_array: ResolvedType,
    pub animal_array: ResolvedType,
    pub dog_array: ResolvedType,
    pub int_2d: ResolvedType,
    pub int_3d: ResolvedType,
}

fn class(id: TypeId, hub: HubHandle, is_final: bool) -> ResolvedType {
    ResolvedType {
        id,
        hub,
        is_interface: false,
        is_final,
        is_array: false,
        is_hybrid: false,
        is_initialized: true,
    }
}

fn array(id: TypeId, hub: HubHandle) -> ResolvedType {
    ResolvedType {
        is_array: true,
        ..class(id, hub, true)
    }
}

impl SimVm {
    pub fn new() -> Self {
        Self::with_layout(ObjectLayout::default())
    }

    pub fn with_layout(layout: ObjectLayout) -> Self {
        let placeholder = class(0, HubHandle(0), true);
        let mut vm = Self {
            layout,
            memory: RefCell::new(vec![0; HEAP_BASE as usize]),
            shapes: RefCell::default(),
            images: RefCell::default(),
            by_hub: RefCell::default(),
            statics: RefCell::default(),
            pool_types: RefCell::default(),
            pool_arrays: RefCell::default(),
            pool_fields: RefCell::default(),
            pool_methods: RefCell::default(),
            initialized: RefCell::default(),
            pending_initialization: RefCell::default(),
            initializations: Cell::new(0),
            resolutions: Cell::new(0),
            barriers: RefCell::default(),
            locks: RefCell::default(),
            array_hubs: KindTable::new(),
            latch: 0,
            object: placeholder.clone(),
            animal: placeholder.clone(),
            dog: placeholder.clone(),
            cat: placeholder.clone(),
            bag: placeholder.clone(),
            pet: placeholder.clone(),
            object_array: placeholder.clone(),
            animal_array: placeholder.clone(),
            dog_array: placeholder.clone(),
            int_2d: placeholder.clone(),
            int_3d: placeholder,
        };

        // Thread locals: the latch word points at the block itself, and so
        // does the exception thread-locals pointer.
        let latch = vm.bump(THREAD_LOCALS_SIZE);
        vm.latch = latch;
        vm.store(ValueKind::Word, latch, &RtValue::Word(latch)).unwrap();
        vm.store(
            ValueKind::Word,
            latch.wrapping_add_signed(layout.etla_offset.into()),
            &RtValue::Word(latch),
        )
        .unwrap();

        let object = vm.define(
            HubImageBuilder::new(OBJECT_ID).vtable([0x9000, 0x9008]),
            Shape::Tuple { size: 16 },
        );
        vm.object = class(OBJECT_ID, object, false);

        let animal = vm.define(
            HubImageBuilder::new(ANIMAL_ID)
                .vtable([0x9000, 0x9008, 0xA008])
                .supertype(OBJECT_ID, []),
            Shape::Tuple { size: 24 },
        );
        vm.animal = class(ANIMAL_ID, animal, false);

        let dog = vm.define(
            HubImageBuilder::new(DOG_ID)
                .vtable(DOG_VTABLE)
                .supertype(OBJECT_ID, [])
                .supertype(ANIMAL_ID, [])
                .supertype(PET_ID, PET_METHODS),
            Shape::Tuple { size: 32 },
        );
        vm.dog = class(DOG_ID, dog, true);

        let cat = vm.define(
            HubImageBuilder::new(CAT_ID)
                .vtable(CAT_VTABLE)
                .supertype(OBJECT_ID, [])
                .supertype(ANIMAL_ID, []),
            Shape::Tuple { size: 32 },
        );
        vm.cat = class(CAT_ID, cat, true);

        let pet = vm.define(
            HubImageBuilder::new(PET_ID).supertype(OBJECT_ID, []),
            Shape::Tuple { size: 16 },
        );
        vm.pet = ResolvedType {
            is_interface: true,
            is_final: false,
            ..class(PET_ID, pet, false)
        };

        let bag_size = BAG_FIRST_FIELD as u64 + 8 * ValueKind::storable().count() as u64;
        let bag = vm.define(
            HubImageBuilder::new(BAG_ID).supertype(OBJECT_ID, []),
            Shape::Tuple { size: bag_size },
        );
        vm.bag = class(BAG_ID, bag, true);
        let bag_statics = vm.bump(bag_size);
        vm.statics.borrow_mut().insert(BAG_ID, bag_statics);

        // One-dimensional arrays of every storable kind.
        let mut array_hubs = KindTable::new();
        for kind in ValueKind::storable() {
            let builder = if kind == ValueKind::Object {
                HubImageBuilder::new(OBJECT_ARRAY_ID)
                    .supertype(OBJECT_ID, [])
                    .component(object)
            } else {
                HubImageBuilder::new(100 + kind.index() as TypeId).supertype(OBJECT_ID, [])
            };
            let hub = vm.define(
                builder,
                Shape::Array {
                    element_size: u64::from(kind.size_in_bytes(layout.word_size)),
                },
            );
            array_hubs.set(kind, hub);
        }
        vm.array_hubs = array_hubs;
        let object_array = vm.array_hub(ValueKind::Object);
        vm.object_array = array(OBJECT_ARRAY_ID, object_array);

        let reference = Shape::Array {
            element_size: u64::from(layout.word_size),
        };
        let animal_array = vm.define(
            HubImageBuilder::new(ANIMAL_ARRAY_ID)
                .supertype(OBJECT_ARRAY_ID, [])
                .supertype(OBJECT_ID, [])
                .component(animal),
            reference,
        );
        vm.animal_array = array(ANIMAL_ARRAY_ID, animal_array);
        let dog_array = vm.define(
            HubImageBuilder::new(DOG_ARRAY_ID)
                .supertype(ANIMAL_ARRAY_ID, [])
                .supertype(OBJECT_ARRAY_ID, [])
                .supertype(OBJECT_ID, [])
                .component(dog),
            reference,
        );
        vm.dog_array = array(DOG_ARRAY_ID, dog_array);

        let int_2d = vm.define(
            HubImageBuilder::new(INT_2D_ID)
                .supertype(OBJECT_ARRAY_ID, [])
                .supertype(OBJECT_ID, [])
                .component(vm.array_hub(ValueKind::Int)),
            reference,
        );
        vm.int_2d = array(INT_2D_ID, int_2d);
        let int_3d = vm.define(
            HubImageBuilder::new(INT_3D_ID)
                .supertype(OBJECT_ARRAY_ID, [])
                .supertype(OBJECT_ID, [])
                .component(int_2d),
            reference,
        );
        vm.int_3d = array(INT_3D_ID, int_3d);

        for ty in [
            &vm.object,
            &vm.animal,
            &vm.dog,
            &vm.cat,
            &vm.pet,
            &vm.bag,
            &vm.object_array,
            &vm.animal_array,
            &vm.dog_array,
            &vm.int_2d,
            &vm.int_3d,
        ] {
            vm.by_hub.borrow_mut().insert(ty.hub.0, ty.clone());
        }
        vm
    }

    // =========================================================================
    // Setup
    // =========================================================================

    fn bump(&self, size: u64) -> u64 {
        let mut memory = self.memory.borrow_mut();
        let address = (memory.len() as u64 + 7) & !7;
        memory.resize((address + size) as usize, 0);
        address
    }

    fn define(&self, builder: HubImageBuilder, shape: Shape) -> HubHandle {
        let image = builder.build(&self.layout);
        let hub = HubHandle(self.bump(image.byte_size(&self.layout)));
        image
            .write_to(self, &self.layout, hub)
            .expect("hub image fits its allocation");
        self.shapes.borrow_mut().insert(hub.0, shape);
        self.images.borrow_mut().insert(hub.0, image);
        hub
    }

    pub fn register_type(&self, cpi: u32, ty: &ResolvedType) -> TypeRef {
        self.pool_types.borrow_mut().insert(cpi, ty.clone());
        TypeRef::Unresolved(symbol(cpi))
    }

    /// Register `array` as the array class of the component named by
    /// `cpi`.
    pub fn register_array_of(&self, cpi: u32, array: &ResolvedType) {
        self.pool_arrays.borrow_mut().insert(cpi, array.clone());
    }

    pub fn register_field(&self, cpi: u32, holder: &ResolvedType, field: ResolvedField) {
        self.pool_fields
            .borrow_mut()
            .insert(cpi, (holder.clone(), field));
    }

    pub fn register_method(&self, cpi: u32, method: ResolvedMethod) {
        self.pool_methods.borrow_mut().insert(cpi, method);
    }

    /// Mark `ty` as not yet initialized, for both the resolver and the
    /// returned descriptor.
    pub fn uninitialized(&self, ty: &ResolvedType) -> ResolvedType {
        self.initialized.borrow_mut().remove(&ty.id);
        self.pending_initialization.borrow_mut().insert(ty.id);
        ResolvedType {
            is_initialized: false,
            ..ty.clone()
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn services(&self) -> RuntimeServices<'_> {
        RuntimeServices {
            layout: self.layout,
            int_array_hub: self.array_hub(ValueKind::Int),
            resolver: self,
            heap: self,
            monitors: self,
        }
    }

    pub fn catalog(&self, config: &CodegenConfig) -> TemplateCatalog {
        let config = CodegenConfig {
            layout: self.layout,
            ..config.clone()
        };
        TemplateCatalog::build(&config, self.array_hubs.clone()).expect("catalog builds")
    }

    pub fn array_hubs(&self) -> KindTable<HubHandle> {
        self.array_hubs.clone()
    }

    pub fn array_hub(&self, kind: ValueKind) -> HubHandle {
        *self.array_hubs.get(kind).expect("array hub registered")
    }

    pub fn image(&self, hub: HubHandle) -> HubImage {
        self.images.borrow()[&hub.0].clone()
    }

    pub fn latch(&self) -> u64 {
        self.latch
    }

    pub fn static_tuple(&self, ty: &ResolvedType) -> u64 {
        self.statics.borrow()[&ty.id]
    }

    pub fn bag_field(&self, kind: ValueKind) -> ResolvedField {
        let slot = ValueKind::storable()
            .position(|k| k == kind)
            .expect("storable kind");
        ResolvedField {
            offset: BAG_FIRST_FIELD + 8 * slot as i32,
            kind,
        }
    }

    pub fn new_object(&self, ty: &ResolvedType) -> u64 {
        self.allocate_tuple(ty.hub).expect("allocation")
    }

    pub fn new_array_of(&self, hub: HubHandle, length: i32) -> u64 {
        self.allocate_array(hub, length).expect("allocation")
    }

    pub fn element_address(&self, array: u64, kind: ValueKind, index: i64) -> u64 {
        let size = i64::from(kind.size_in_bytes(self.layout.word_size));
        array
            .wrapping_add_signed(self.layout.first_element_offset.into())
            .wrapping_add_signed(index * size)
    }

    pub fn field_address(&self, object: u64, field: &ResolvedField) -> u64 {
        object.wrapping_add_signed(field.offset.into())
    }

    /// Make `exception` the pending exception of the current thread.
    pub fn raise(&self, exception: u64) {
        let slot = self
            .latch
            .wrapping_add_signed(self.layout.exception_object_offset.into());
        self.store(ValueKind::Object, slot, &RtValue::Ref(exception))
            .unwrap();
    }

    pub fn pending_exception(&self) -> u64 {
        let slot = self
            .latch
            .wrapping_add_signed(self.layout.exception_object_offset.into());
        self.load(ValueKind::Word, slot)
            .unwrap()
            .as_address()
            .unwrap()
    }

    pub fn barriers(&self) -> Vec<(u64, u64)> {
        self.barriers.borrow().clone()
    }

    pub fn lock_count(&self, object: u64) -> u32 {
        self.locks.borrow().get(&object).copied().unwrap_or(0)
    }

    pub fn initializations(&self) -> u32 {
        self.initializations.get()
    }

    pub fn resolutions(&self) -> u32 {
        self.resolutions.get()
    }

    fn allocate(&self, hub: HubHandle, size: u64) -> u64 {
        let object = self.bump(size);
        self.store(
            ValueKind::Object,
            object.wrapping_add_signed(self.layout.hub_offset.into()),
            &RtValue::Ref(hub.0),
        )
        .expect("hub slot is mapped");
        object
    }

    fn pool_entry<T: Clone>(
        &self,
        table: &RefCell<FxHashMap<u32, T>>,
        guard: &ResolutionGuard,
    ) -> Option<T> {
        self.resolutions.set(self.resolutions.get() + 1);
        match guard.target() {
            GuardTarget::InPool { pool, cpi } if pool == POOL => table.borrow().get(&cpi).cloned(),
            _ => None,
        }
    }
}

pub fn symbol(cpi: u32) -> UnresolvedSymbol {
    UnresolvedSymbol { pool: POOL, cpi }
}

fn cpi_of(guard: &ResolutionGuard) -> u32 {
    match guard.target() {
        GuardTarget::InPool { cpi, .. } => cpi,
        GuardTarget::Preresolved(_) => 0,
    }
}

// =============================================================================
// Collaborator traits
// =============================================================================

impl Memory for SimVm {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), RuntimeFault> {
        let memory = self.memory.borrow();
        let start = address as usize;
        let bytes = memory
            .get(start..start + buf.len())
            .filter(|_| address >= HEAP_BASE)
            .ok_or(RuntimeFault::Internal("read of unmapped memory"))?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    fn write(&self, address: u64, bytes: &[u8]) -> Result<(), RuntimeFault> {
        let mut memory = self.memory.borrow_mut();
        let start = address as usize;
        if address < HEAP_BASE {
            return Err(RuntimeFault::Internal("write of unmapped memory"));
        }
        memory
            .get_mut(start..start + bytes.len())
            .ok_or(RuntimeFault::Internal("write of unmapped memory"))?
            .copy_from_slice(bytes);
        Ok(())
    }
}

impl Heap for SimVm {
    fn allocate_tuple(&self, hub: HubHandle) -> Result<u64, RuntimeFault> {
        let shape = self.shapes.borrow().get(&hub.0).copied();
        match shape {
            Some(Shape::Tuple { size }) => Ok(self.allocate(hub, size)),
            _ => Err(RuntimeFault::Internal("not a tuple hub")),
        }
    }

    fn allocate_hybrid(&self, hub: HubHandle) -> Result<u64, RuntimeFault> {
        self.allocate_tuple(hub)
    }

    fn allocate_array(&self, hub: HubHandle, length: i32) -> Result<u64, RuntimeFault> {
        let shape = self.shapes.borrow().get(&hub.0).copied();
        let Some(Shape::Array { element_size }) = shape else {
            return Err(RuntimeFault::Internal("not an array hub"));
        };
        let header = self.layout.first_element_offset as u64;
        let array = self.allocate(hub, header + element_size * length as u64);
        self.store(
            ValueKind::Int,
            array.wrapping_add_signed(self.layout.array_length_offset.into()),
            &RtValue::Int(length),
        )?;
        Ok(array)
    }

    fn write_barrier(&self, object: u64, value: u64) {
        self.barriers.borrow_mut().push((object, value));
    }
}

impl Resolver for SimVm {
    fn resolve_type(&self, guard: &ResolutionGuard) -> Result<ResolvedType, LinkageError> {
        let found = match guard.target() {
            GuardTarget::Preresolved(hub) => {
                self.resolutions.set(self.resolutions.get() + 1);
                self.by_hub.borrow().get(&hub.0).cloned()
            }
            GuardTarget::InPool { .. } if guard.kind() == ResolutionKind::ArrayClass => {
                self.pool_entry(&self.pool_arrays, guard)
            }
            GuardTarget::InPool { .. } => self.pool_entry(&self.pool_types, guard),
        };
        let mut ty = found.ok_or(LinkageError::NoSuchType { cpi: cpi_of(guard) })?;
        ty.is_initialized = !self.is_uninitialized(ty.id);
        Ok(ty)
    }

    fn resolve_field(&self, guard: &ResolutionGuard) -> Result<(ResolvedType, ResolvedField), LinkageError> {
        self.pool_entry(&self.pool_fields, guard)
            .ok_or(LinkageError::NoSuchField { cpi: cpi_of(guard) })
    }

    fn resolve_method(&self, guard: &ResolutionGuard) -> Result<ResolvedMethod, LinkageError> {
        self.pool_entry(&self.pool_methods, guard)
            .ok_or(LinkageError::NoSuchMethod { cpi: cpi_of(guard) })
    }

    fn initialize(&self, ty: &ResolvedType) -> Result<(), LinkageError> {
        self.initializations.set(self.initializations.get() + 1);
        self.initialized.borrow_mut().insert(ty.id);
        Ok(())
    }

    fn link(&self, method: &ResolvedMethod) -> Result<u64, LinkageError> {
        Ok(method.entry_point)
    }

    fn representation(&self, ty: &ResolvedType, representation: Representation) -> u64 {
        match representation {
            Representation::ObjectHub => ty.hub.0,
            Representation::StaticFields => self.statics.borrow().get(&ty.id).copied().unwrap_or(0),
            Representation::JavaClass => ty.hub.0 | 1 << 40,
            Representation::TypeInfo => ty.hub.0 | 2 << 40,
        }
    }
}

impl SimVm {
    /// Types passed through `uninitialized` stay uninitialized until the
    /// resolver's `initialize` runs for them.
    fn is_uninitialized(&self, id: TypeId) -> bool {
        self.pending_initialization.borrow().contains(&id) && !self.initialized.borrow().contains(&id)
    }
}

impl MonitorScheme for SimVm {
    fn monitor_enter(&self, object: u64) -> Result<(), RuntimeFault> {
        *self.locks.borrow_mut().entry(object).or_insert(0) += 1;
        Ok(())
    }

    fn monitor_exit(&self, object: u64) -> Result<(), RuntimeFault> {
        let mut locks = self.locks.borrow_mut();
        match locks.get_mut(&object) {
            Some(count) if *count > 0 => {
                *count -= 1;
                Ok(())
            }
            _ => Err(RuntimeFault::IllegalMonitorState),
        }
    }
}
