use std::{
    any::{Any, TypeId},
    fmt,
    rc::Rc,
};

use crate::{
    tracer::Tracer,
    value::{ObjectRef, Value},
};

/// The collector side of a host object's class: how to trace it and how to release its native
/// state.
///
/// `trace` may be called any number of times while the object is reachable and must report every
/// edge the native state can reach. `finalize` is called exactly once, during the sweep that finds
/// the object unreachable (or at teardown), and must not allocate or collect.
pub trait HostHooks: 'static {
    fn trace(&self, trc: &mut Tracer<'_>);

    fn finalize(&self);

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Identifies the class of a host object, checked before the bridge is allowed to view the
/// object's native state.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ClassTag {
    name: &'static str,
    type_id: TypeId,
}

impl fmt::Debug for ClassTag {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("ClassTag").field(&self.name).finish()
    }
}

impl ClassTag {
    pub fn of<C: 'static>(name: &'static str) -> ClassTag {
        ClassTag {
            name,
            type_id: TypeId::of::<C>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

pub(crate) enum ObjectData {
    Plain(Vec<Value>),
    Host {
        tag: ClassTag,
        hooks: Rc<dyn HostHooks>,
    },
}

pub(crate) struct Object {
    pub(crate) marked: bool,
    pub(crate) data: ObjectData,
}

struct Entry {
    generation: u32,
    object: Option<Object>,
}

// Slots are reused through the free list, and every reuse bumps the generation so that stale
// handles never resolve to the new occupant.
#[derive(Default)]
pub(crate) struct ObjectTable {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
}

impl ObjectTable {
    pub(crate) fn insert(&mut self, object: Object) -> ObjectRef {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            debug_assert!(entry.object.is_none());
            entry.object = Some(object);
            ObjectRef {
                index,
                generation: entry.generation,
            }
        } else {
            let index = u32::try_from(self.entries.len()).expect("object table overflow");
            self.entries.push(Entry {
                generation: 0,
                object: Some(object),
            });
            ObjectRef {
                index,
                generation: 0,
            }
        }
    }

    pub(crate) fn get(&self, obj: ObjectRef) -> Option<&Object> {
        let entry = self.entries.get(obj.index as usize)?;
        if entry.generation == obj.generation {
            entry.object.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn get_mut(&mut self, obj: ObjectRef) -> Option<&mut Object> {
        let entry = self.entries.get_mut(obj.index as usize)?;
        if entry.generation == obj.generation {
            entry.object.as_mut()
        } else {
            None
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    // Frees every unmarked object and clears the mark on every survivor.
    pub(crate) fn sweep_unmarked(&mut self) -> Vec<Object> {
        let mut dead = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let Some(object) = &mut entry.object else {
                continue;
            };
            if object.marked {
                object.marked = false;
                continue;
            }
            dead.extend(entry.object.take());
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(index as u32);
        }
        self.live -= dead.len();
        dead
    }

    pub(crate) fn drain(&mut self) -> Vec<Object> {
        let mut objects = Vec::with_capacity(self.live);
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if let Some(object) = entry.object.take() {
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(index as u32);
                objects.push(object);
            }
        }
        self.live = 0;
        objects
    }
}
