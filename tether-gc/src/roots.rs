use std::{hash::BuildHasherDefault, rc::Rc};

use ahash::AHasher;
use hashbrown::HashMap;

use crate::tracer::{Sweeper, Tracer};

/// A registered root: anything that can report the edges it holds.
pub trait RootTrace {
    fn trace_root(&self, trc: &mut Tracer<'_>);
}

/// A non-root participant in the sweep phase, called after marking finishes and before any
/// unreachable object is freed.
pub trait SweepHook {
    fn sweep(&self, sweeper: &Sweeper<'_>);
}

/// Position of a root in the stack chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StackRootId(pub(crate) usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersistentRootId(pub(crate) u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SweeperId(pub(crate) u64);

type IdMap<K, V> = HashMap<K, V, BuildHasherDefault<AHasher>>;

struct Root {
    label: &'static str,
    node: Rc<dyn RootTrace>,
}

#[derive(Default)]
pub(crate) struct RootSet {
    stack: Vec<Root>,
    persistent: IdMap<PersistentRootId, Root>,
    sweepers: IdMap<SweeperId, Rc<dyn SweepHook>>,
    next_id: u64,
}

pub(crate) struct OutOfOrder {
    pub(crate) depth: usize,
    pub(crate) top: usize,
}

impl RootSet {
    pub(crate) fn push_stack(&mut self, label: &'static str, node: Rc<dyn RootTrace>) -> StackRootId {
        self.stack.push(Root { label, node });
        StackRootId(self.stack.len() - 1)
    }

    pub(crate) fn pop_stack(&mut self, id: StackRootId) -> Result<(), OutOfOrder> {
        if self.stack.len() != id.0 + 1 {
            return Err(OutOfOrder {
                depth: id.0,
                top: self.stack.len().wrapping_sub(1),
            });
        }
        self.stack.pop();
        Ok(())
    }

    pub(crate) fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn insert_persistent(
        &mut self,
        label: &'static str,
        node: Rc<dyn RootTrace>,
    ) -> PersistentRootId {
        let id = PersistentRootId(self.next_id());
        self.persistent.insert(id, Root { label, node });
        id
    }

    pub(crate) fn remove_persistent(&mut self, id: PersistentRootId) -> bool {
        self.persistent.remove(&id).is_some()
    }

    pub(crate) fn persistent_labels(&self) -> Vec<&'static str> {
        let mut roots = self.persistent.iter().collect::<Vec<_>>();
        roots.sort_by_key(|(id, _)| **id);
        roots.into_iter().map(|(_, root)| root.label).collect()
    }

    pub(crate) fn insert_sweeper(&mut self, hook: Rc<dyn SweepHook>) -> SweeperId {
        let id = SweeperId(self.next_id());
        self.sweepers.insert(id, hook);
        id
    }

    pub(crate) fn remove_sweeper(&mut self, id: SweeperId) -> bool {
        self.sweepers.remove(&id).is_some()
    }

    pub(crate) fn clear_sweepers(&mut self) {
        self.sweepers.clear();
    }

    // Stack roots innermost last, then persistent roots in registration order.
    pub(crate) fn snapshot(&self) -> Vec<(&'static str, Rc<dyn RootTrace>)> {
        let mut persistent = self.persistent.iter().collect::<Vec<_>>();
        persistent.sort_by_key(|(id, _)| **id);

        self.stack
            .iter()
            .chain(persistent.into_iter().map(|(_, root)| root))
            .map(|root| (root.label, root.node.clone()))
            .collect()
    }

    pub(crate) fn sweepers(&self) -> Vec<Rc<dyn SweepHook>> {
        self.sweepers.values().cloned().collect()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
