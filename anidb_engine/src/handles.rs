//! Generation-checked handle arenas
//!
//! Slots are reused after removal, but every reuse bumps the slot's
//! generation, so a handle kept past `remove` can never reach the new
//! occupant. Each arena also stamps its own id into the handles it issues,
//! so a handle from one client's arena is rejected by another's.
//!
//! Raw layout, high to low: 16 bit arena id, 24 bit generation, 24 bit index.

use crate::{Error, Result, error::InternalError};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

const INDEX_BITS: u32 = 24;
const GENERATION_BITS: u32 = 24;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;
const ARENA_MASK: u32 = 0xFFFF;

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

// Never zero, so a zero raw handle is always invalid
fn next_arena_id() -> u32 {
    loop {
        let id = NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed) & ARENA_MASK;
        if id != 0 {
            return id;
        }
    }
}

fn next_generation(generation: u32) -> u32 {
    if generation >= GENERATION_MASK {
        1
    } else {
        generation + 1
    }
}

/// Typed reference into a [`HandleArena`]
pub struct Handle<T> {
    arena: u32,
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(arena: u32, index: u32, generation: u32) -> Self {
        Self {
            arena,
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Id of the arena that issued this handle
    pub fn arena(&self) -> u32 {
        self.arena
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Opaque integer form for crossing the ABI; never zero
    pub fn into_raw(self) -> u64 {
        (u64::from(self.arena) << (INDEX_BITS + GENERATION_BITS))
            | (u64::from(self.generation) << INDEX_BITS)
            | u64::from(self.index)
    }

    /// Rebuild a handle from [`Handle::into_raw`] output
    ///
    /// Forged values are caught by the arena's id and generation checks.
    pub fn from_raw(raw: u64) -> Self {
        Self::new(
            (raw >> (INDEX_BITS + GENERATION_BITS)) as u32 & ARENA_MASK,
            raw as u32 & INDEX_MASK,
            (raw >> INDEX_BITS) as u32 & GENERATION_MASK,
        )
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.arena == other.arena
            && self.index == other.index
            && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.arena.hash(state);
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}:{}v{})", self.arena, self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage addressed by [`Handle`]s
pub struct HandleArena<T> {
    kind: &'static str,
    id: u32,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> HandleArena<T> {
    /// `kind` names the handle type in error messages
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            id: next_arena_id(),
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a value; fails once every addressable slot is live
    pub fn insert(&mut self, value: T) -> Result<Handle<T>> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Ok(Handle::new(self.id, index, slot.generation));
        }

        let index = self.slots.len() as u32;
        if index > INDEX_MASK {
            return Err(Error::Internal(InternalError::handles_exhausted(self.kind)));
        }
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        self.len += 1;
        Ok(Handle::new(self.id, index, 1))
    }

    fn slot(&self, handle: Handle<T>) -> Option<&Slot<T>> {
        if handle.arena != self.id {
            return None;
        }
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    fn invalid(&self) -> Error {
        Error::Internal(InternalError::invalid_handle(self.kind))
    }

    pub fn get(&self, handle: Handle<T>) -> Result<&T> {
        self.slot(handle)
            .and_then(|slot| slot.value.as_ref())
            .ok_or_else(|| self.invalid())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T> {
        if self.slot(handle).is_none() {
            return Err(self.invalid());
        }
        self.slots[handle.index as usize]
            .value
            .as_mut()
            .ok_or_else(|| Error::Internal(InternalError::invalid_handle(self.kind)))
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.slot(handle).is_some()
    }

    /// Remove the value; the handle and every copy of it become stale
    pub fn remove(&mut self, handle: Handle<T>) -> Result<T> {
        if self.slot(handle).is_none() {
            return Err(self.invalid());
        }

        let slot = &mut self.slots[handle.index as usize];
        let value = slot.value.take().ok_or_else(|| {
            Error::Internal(InternalError::invalid_handle(self.kind))
        })?;
        slot.generation = next_generation(slot.generation);
        self.free.push(handle.index);
        self.len -= 1;
        Ok(value)
    }

    /// Live values in slot order
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }

    /// Remove every value, invalidating all handles
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = next_generation(slot.generation);
                self.free.push(index as u32);
                drained.push(value);
            }
        }
        self.len = 0;
        drained
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> fmt::Debug for HandleArena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleArena")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}
