//! Hashed method tables.
//!
//! A hub's word array holds, in order: the vtable, one zero word, one block
//! per implemented type (`[id, method 1, method 2, ...]`), and finally the
//! 32-bit redirection region. Looking up type `id` reads the redirection at
//! int index `id % length + start` and lands on the word index of that
//! type's block. Unused redirections point at the zero word, which no type
//! id matches.
//!
//! The probe functions here read exactly the memory the type-test and
//! interface-dispatch templates read.

use kiln_core::{HubHandle, ObjectLayout, RuntimeFault, TypeId, ValueKind};
use rustc_hash::FxHashMap;

use super::services::Memory;
use super::value::RtValue;

// =============================================================================
// Builder
// =============================================================================

/// Largest type id. Templates carry ids as signed ints and take a signed
/// remainder, which agrees with the unsigned probe only below this bound.
pub const MAX_TYPE_ID: TypeId = i32::MAX as TypeId;

/// Collects the dispatch data of one type.
#[derive(Debug, Clone)]
pub struct HubImageBuilder {
    type_id: TypeId,
    vtable: Vec<u64>,
    supertypes: Vec<(TypeId, Vec<u64>)>,
    component: Option<HubHandle>,
}

impl HubImageBuilder {
    /// Start a hub for type `type_id`. The type is registered as its own
    /// supertype with no methods.
    pub fn new(type_id: TypeId) -> Self {
        debug_assert!(type_id != 0, "type id 0 is reserved");
        debug_assert!(type_id <= MAX_TYPE_ID, "type id {type_id} does not fit an int");
        Self {
            type_id,
            vtable: Vec::new(),
            supertypes: vec![(type_id, Vec::new())],
            component: None,
        }
    }

    /// Set the vtable entry points.
    pub fn vtable(mut self, entries: impl IntoIterator<Item = u64>) -> Self {
        self.vtable = entries.into_iter().collect();
        self
    }

    /// Register a supertype (class or interface) with its itable entries.
    /// Registering the type itself replaces its (empty) method list.
    pub fn supertype(mut self, id: TypeId, methods: impl IntoIterator<Item = u64>) -> Self {
        debug_assert!(id <= MAX_TYPE_ID, "type id {id} does not fit an int");
        let methods = methods.into_iter().collect();
        match self.supertypes.iter_mut().find(|(t, _)| *t == id) {
            Some(entry) => entry.1 = methods,
            None => self.supertypes.push((id, methods)),
        }
        self
    }

    /// Mark the hub as an array hub with the given component hub.
    pub fn component(mut self, hub: HubHandle) -> Self {
        self.component = Some(hub);
        self
    }

    /// Lay out the hub, choosing the smallest collision-free table length.
    pub fn build(self, layout: &ObjectLayout) -> HubImage {
        let ids: Vec<TypeId> = self.supertypes.iter().map(|(id, _)| *id).collect();
        let length = collision_free_length(&ids);

        let zero_word = self.vtable.len() as u32;
        let mut words = self.vtable;
        words.push(0);

        let mut blocks = FxHashMap::default();
        for (id, methods) in self.supertypes {
            blocks.insert(id, words.len() as u32);
            words.push(u64::from(id));
            words.extend(methods);
        }

        let ints_per_word = layout.word_size / 4;
        let start = words.len() as u32 * ints_per_word;
        let mut redirections = vec![zero_word; length as usize];
        for (&id, &block) in &blocks {
            redirections[(id % length) as usize] = block;
        }

        HubImage {
            type_id: self.type_id,
            component: self.component,
            mtable_length: length,
            mtable_start: start,
            words,
            redirections,
        }
    }
}

/// Smallest `L >= max(1, ids.len())` such that `id % L` is distinct for
/// every id.
fn collision_free_length(ids: &[TypeId]) -> u32 {
    let mut length = (ids.len() as u32).max(1);
    let mut seen = Vec::new();
    loop {
        seen.clear();
        seen.resize(length as usize, false);
        let distinct = ids.iter().all(|&id| {
            let slot = (id % length) as usize;
            !std::mem::replace(&mut seen[slot], true)
        });
        if distinct {
            return length;
        }
        length += 1;
    }
}

// =============================================================================
// HubImage
// =============================================================================

/// The dispatch portion of a hub, ready to be written into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubImage {
    type_id: TypeId,
    component: Option<HubHandle>,
    mtable_length: u32,
    mtable_start: u32,
    words: Vec<u64>,
    redirections: Vec<u32>,
}

impl HubImage {
    /// Type identifier.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Number of redirection slots.
    #[inline]
    pub fn mtable_length(&self) -> u32 {
        self.mtable_length
    }

    /// Int index of the first redirection slot.
    #[inline]
    pub fn mtable_start(&self) -> u32 {
        self.mtable_start
    }

    /// Bytes the hub occupies from its origin.
    pub fn byte_size(&self, layout: &ObjectLayout) -> u64 {
        let words = self.words.len() as u64 * u64::from(layout.word_size);
        layout.hub_words_offset as u64 + words + self.redirections.len() as u64 * 4
    }

    /// Word index of `id`'s block, or `None` on a mismatch.
    pub fn probe(&self, id: TypeId) -> Option<u32> {
        let slot = id % self.mtable_length;
        let block = self.redirections[slot as usize];
        (self.words.get(block as usize) == Some(&u64::from(id))).then_some(block)
    }

    /// Entry point of method `index` of interface `interface_id`.
    pub fn dispatch(&self, interface_id: TypeId, index: u32) -> Option<u64> {
        let block = self.probe(interface_id)?;
        self.words.get((block + index) as usize).copied()
    }

    /// Write the hub fields and word array at `hub`.
    pub fn write_to<M: Memory + ?Sized>(
        &self,
        memory: &M,
        layout: &ObjectLayout,
        hub: HubHandle,
    ) -> Result<(), RuntimeFault> {
        let at = |offset: i32| hub.0.wrapping_add_signed(offset.into());
        let component = self.component.map_or(0, |c| c.0);
        memory.store(ValueKind::Object, at(layout.component_hub_offset), &RtValue::Ref(component))?;
        memory.store(ValueKind::Int, at(layout.type_id_offset), &RtValue::Int(self.type_id as i32))?;
        memory.store(
            ValueKind::Int,
            at(layout.mtable_length_offset),
            &RtValue::Int(self.mtable_length as i32),
        )?;
        memory.store(
            ValueKind::Int,
            at(layout.mtable_start_index_offset),
            &RtValue::Int(self.mtable_start as i32),
        )?;
        let words = at(layout.hub_words_offset);
        for (i, &word) in self.words.iter().enumerate() {
            let address = words + i as u64 * u64::from(layout.word_size);
            memory.store(ValueKind::Word, address, &RtValue::Word(word))?;
        }
        for (k, &redirection) in self.redirections.iter().enumerate() {
            let address = words + (u64::from(self.mtable_start) + k as u64) * 4;
            memory.store(ValueKind::Int, address, &RtValue::Int(redirection as i32))?;
        }
        Ok(())
    }
}

// =============================================================================
// Probes over memory
// =============================================================================

fn read_int<M: Memory + ?Sized>(memory: &M, address: u64) -> Result<i32, RuntimeFault> {
    memory
        .load(ValueKind::Int, address)?
        .as_int()
        .ok_or(RuntimeFault::Internal("hub field is not an int"))
}

/// Word index of `id`'s block in the hub at `hub`, whether or not it matches.
fn redirect<M: Memory + ?Sized>(
    memory: &M,
    layout: &ObjectLayout,
    hub: HubHandle,
    id: TypeId,
) -> Result<u32, RuntimeFault> {
    let at = |offset: i32| hub.0.wrapping_add_signed(offset.into());
    let length = read_int(memory, at(layout.mtable_length_offset))? as u32;
    let start = read_int(memory, at(layout.mtable_start_index_offset))? as u32;
    let slot = id
        .checked_rem(length)
        .ok_or(RuntimeFault::Internal("hub without a method table"))?
        + start;
    let words = at(layout.hub_words_offset);
    Ok(read_int(memory, words + u64::from(slot) * 4)? as u32)
}

/// Whether the hub at `hub` lists type `id` in its method table.
pub fn type_test<M: Memory + ?Sized>(
    memory: &M,
    layout: &ObjectLayout,
    hub: HubHandle,
    id: TypeId,
) -> Result<bool, RuntimeFault> {
    let block = redirect(memory, layout, hub, id)?;
    let address = hub.0.wrapping_add_signed(layout.hub_words_offset.into())
        + u64::from(block) * u64::from(layout.word_size);
    Ok(read_int(memory, address)? as u32 == id)
}

/// Entry point of method `index` of interface `interface_id` for the hub at
/// `hub`. Assumes the hub implements the interface.
pub fn interface_dispatch<M: Memory + ?Sized>(
    memory: &M,
    layout: &ObjectLayout,
    hub: HubHandle,
    interface_id: TypeId,
    index: u32,
) -> Result<u64, RuntimeFault> {
    let block = redirect(memory, layout, hub, interface_id)? + index;
    let address = hub.0.wrapping_add_signed(layout.hub_words_offset.into())
        + u64::from(block) * u64::from(layout.word_size);
    memory
        .load(ValueKind::Word, address)?
        .as_address()
        .ok_or(RuntimeFault::Internal("itable entry is not a word"))
}
