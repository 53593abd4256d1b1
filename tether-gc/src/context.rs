use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
    thread,
};

use tracing::{debug, trace, warn};

use crate::{
    error::{AccessError, AllocError},
    object::{ClassTag, HostHooks, Object, ObjectData, ObjectTable},
    params::Parameters,
    roots::{PersistentRootId, RootSet, RootTrace, StackRootId, SweepHook, SweeperId},
    tracer::{Edge, Sweeper, Tracer},
    value::{ObjectRef, Value},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No collection cycle is in progress.
    Sleep,
    /// Roots have been scanned and gray objects are being traced.
    Mark,
    /// Marking has finished; unmarked objects are unreachable and wait for the sweep.
    Sweep,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Liveness {
    Live,
    PendingFinalize,
    Dead,
}

/// The transition a write barrier is reporting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BarrierKind {
    Init,
    Write,
    Drop,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: u64,
    pub objects_freed: u64,
    pub objects_finalized: u64,
    pub barrier_inits: u64,
    pub barrier_writes: u64,
    pub barrier_drops: u64,
    /// Objects grayed by write barriers during incremental marking.
    pub barrier_marked: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Status {
    Running,
    Tracing,
    Finalizing,
    TornDown,
}

#[derive(Default)]
struct HeapState {
    table: ObjectTable,
    gray: Vec<ObjectRef>,
}

struct Inner {
    parameters: Parameters,
    phase: Cell<Phase>,
    status: Cell<Status>,
    allocated_since: Cell<usize>,
    stats: Cell<GcStats>,
    heap: RefCell<HeapState>,
    roots: RefCell<RootSet>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.status.get() == Status::TornDown {
            return;
        }

        let labels = self.roots.get_mut().persistent_labels();
        if !labels.is_empty() && !thread::panicking() {
            fatal!("context dropped with persistent roots still registered: {labels:?}");
        }

        self.status.set(Status::Finalizing);
        let objects = self.heap.get_mut().table.drain();
        for object in &objects {
            if let ObjectData::Host { hooks, .. } = &object.data {
                hooks.finalize();
            }
        }
    }
}

/// Handle to a single collector instance.
///
/// A `Context` owns every collector-managed object along with the root set: the LIFO chain of
/// stack roots and the list of persistent roots. Cloning the handle is cheap and every clone
/// refers to the same collector. Contexts are confined to the thread that created them.
///
/// Collection only ever happens when the mutator asks for it, either directly through
/// [`Context::collect`] and [`Context::collect_slice`], or by allocating when
/// [`Parameters`] call for a collection.
#[derive(Clone)]
pub struct Context(Rc<Inner>);

impl fmt::Debug for Context {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Context")
            .field("phase", &self.0.phase.get())
            .field("status", &self.0.status.get())
            .field("live_objects", &self.live_objects())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new(Parameters::default())
    }
}

/// A non-owning handle to a [`Context`], held by values that must reach their collector without
/// keeping it alive.
#[derive(Debug, Clone, Default)]
pub struct WeakContext(Weak<Inner>);

impl WeakContext {
    pub fn upgrade(&self) -> Option<Context> {
        self.0.upgrade().map(Context)
    }
}

impl Context {
    pub fn new(parameters: Parameters) -> Context {
        Context(Rc::new(Inner {
            parameters,
            phase: Cell::new(Phase::Sleep),
            status: Cell::new(Status::Running),
            allocated_since: Cell::new(0),
            stats: Cell::new(GcStats::default()),
            heap: RefCell::new(HeapState::default()),
            roots: RefCell::new(RootSet::default()),
        }))
    }

    pub fn parameters(&self) -> &Parameters {
        &self.0.parameters
    }

    pub fn downgrade(&self) -> WeakContext {
        WeakContext(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn phase(&self) -> Phase {
        self.0.phase.get()
    }

    pub fn is_torn_down(&self) -> bool {
        self.0.status.get() == Status::TornDown
    }

    pub fn stats(&self) -> GcStats {
        self.0.stats.get()
    }

    pub fn live_objects(&self) -> usize {
        self.0.heap.borrow().table.live()
    }

    /// Allocate a plain object holding `fields`.
    ///
    /// If the allocation triggers a collection, `fields` are treated as roots for its duration.
    pub fn new_object(&self, fields: Vec<Value>) -> Result<ObjectRef, AllocError> {
        self.reserve(&|trc: &mut Tracer<'_>| {
            for field in &fields {
                trc.value(field, "pending field");
            }
        })?;
        Ok(self.insert(ObjectData::Plain(fields)))
    }

    /// Allocate a host object of class `tag` whose native state is reached through `hooks`.
    ///
    /// If the allocation triggers a collection, `hooks` is traced as a root for its duration. On
    /// failure `hooks` is dropped without being finalized and nothing stays registered.
    pub fn new_host_object(
        &self,
        tag: ClassTag,
        hooks: Rc<dyn HostHooks>,
    ) -> Result<ObjectRef, AllocError> {
        self.reserve(&|trc: &mut Tracer<'_>| trc.scope(tag.name(), |trc| hooks.trace(trc)))?;
        Ok(self.insert(ObjectData::Host { tag, hooks }))
    }

    pub fn is_alive(&self, obj: ObjectRef) -> bool {
        self.0.heap.borrow().table.get(obj).is_some()
    }

    pub fn liveness(&self, obj: ObjectRef) -> Liveness {
        match self.0.heap.borrow().table.get(obj) {
            None => Liveness::Dead,
            Some(object) if self.phase() == Phase::Sweep && !object.marked => {
                Liveness::PendingFinalize
            }
            Some(_) => Liveness::Live,
        }
    }

    pub fn field_count(&self, obj: ObjectRef) -> Result<usize, AccessError> {
        self.check_not_tracing("object access");
        let heap = self.0.heap.borrow();
        Ok(plain_fields(heap.table.get(obj))?.len())
    }

    pub fn get(&self, obj: ObjectRef, index: usize) -> Result<Value, AccessError> {
        self.check_not_tracing("object access");
        let heap = self.0.heap.borrow();
        let fields = plain_fields(heap.table.get(obj))?;
        fields.get(index).copied().ok_or(AccessError::OutOfBounds {
            index,
            len: fields.len(),
        })
    }

    /// Store `value` into field `index` of `obj`, returning the previous value.
    pub fn set(&self, obj: ObjectRef, index: usize, value: Value) -> Result<Value, AccessError> {
        self.check_not_tracing("object write");
        let old = self.get(obj, index)?;
        self.write_barrier(
            BarrierKind::Write,
            Some(&|trc: &mut Tracer<'_>| trc.value(&old, "field")),
            Some(&|trc: &mut Tracer<'_>| trc.value(&value, "field")),
        );
        let mut heap = self.0.heap.borrow_mut();
        let fields = plain_fields_mut(heap.table.get_mut(obj))?;
        fields[index] = value;
        Ok(old)
    }

    /// Append `value` as a new field of `obj`.
    pub fn push(&self, obj: ObjectRef, value: Value) -> Result<(), AccessError> {
        self.check_not_tracing("object write");
        plain_fields(self.0.heap.borrow().table.get(obj))?;
        self.write_barrier(
            BarrierKind::Write,
            None,
            Some(&|trc: &mut Tracer<'_>| trc.value(&value, "field")),
        );
        let mut heap = self.0.heap.borrow_mut();
        plain_fields_mut(heap.table.get_mut(obj))?.push(value);
        Ok(())
    }

    /// Look up the class tag and hooks of a host object.
    pub fn host_hooks(&self, obj: ObjectRef) -> Result<(ClassTag, Rc<dyn HostHooks>), AccessError> {
        self.check_not_tracing("host object access");
        match self.0.heap.borrow().table.get(obj) {
            None => Err(AccessError::Dead),
            Some(Object {
                data: ObjectData::Host { tag, hooks },
                ..
            }) => Ok((*tag, hooks.clone())),
            Some(_) => Err(AccessError::NotHost),
        }
    }

    /// Notify the collector that a slot holding `old` is about to hold `new`.
    ///
    /// Must be called before the slot is written. While marking is in progress every object
    /// directly reachable from `old` is grayed, which keeps everything that was reachable when
    /// the cycle began alive until the cycle ends. In debug builds, `new` is checked for handles to
    /// objects that no longer exist.
    pub fn write_barrier(
        &self,
        kind: BarrierKind,
        old: Option<&dyn Fn(&mut Tracer<'_>)>,
        new: Option<&dyn Fn(&mut Tracer<'_>)>,
    ) {
        self.update_stats(|stats| match kind {
            BarrierKind::Init => stats.barrier_inits += 1,
            BarrierKind::Write => stats.barrier_writes += 1,
            BarrierKind::Drop => stats.barrier_drops += 1,
        });

        if self.phase() == Phase::Mark {
            if let Some(old) = old {
                let before = self.0.heap.borrow().gray.len();
                self.with_marker(|trc| old(trc));
                let grayed = self.0.heap.borrow().gray.len().saturating_sub(before);
                self.update_stats(|stats| stats.barrier_marked += grayed as u64);
            }
        }

        if cfg!(debug_assertions) {
            if let Some(new) = new {
                let heap = self.0.heap.borrow();
                let mut invalid = Vec::new();
                new(&mut Tracer::validator(&heap.table, &mut invalid));
                debug_assert!(
                    invalid.is_empty(),
                    "write barrier stores handles to collected objects: {invalid:?}"
                );
            }
        }
    }

    /// Shade every object reported by `value` if marking is in progress.
    ///
    /// Handles read out of a container that is not a root must pass through here before the
    /// mutator may store them anywhere, or an object unreachable at the start of the cycle could
    /// be freed while a new root still refers to it.
    pub fn read_barrier(&self, value: &dyn Fn(&mut Tracer<'_>)) {
        if self.phase() == Phase::Mark {
            self.with_marker(|trc| value(trc));
        }
    }

    /// Run `f` with the result of the finished mark phase while the sweep is still pending.
    ///
    /// Returns `None` outside of `Phase::Sweep`. `f` runs with the same restrictions as a sweep
    /// hook.
    pub fn pending_sweep<R>(&self, f: impl FnOnce(&Sweeper<'_>) -> R) -> Option<R> {
        if self.phase() != Phase::Sweep {
            return None;
        }
        Some(self.with_status(Status::Finalizing, || {
            let heap = self.0.heap.borrow();
            f(&Sweeper::new(&heap.table))
        }))
    }

    /// Finish any cycle in progress, then run one complete stop-the-world cycle.
    ///
    /// When this returns, every object that was unreachable from the root set when it was called
    /// has been finalized and freed.
    pub fn collect(&self) {
        self.full_collect(None);
    }

    /// Perform one incremental slice of collection work and return the phase reached.
    ///
    /// A slice from `Sleep` scans the root set and starts marking, a slice in `Mark` blackens up
    /// to `slice_budget` gray objects and moves to `Sweep` once nothing is left, and a slice in
    /// `Sweep` frees every unmarked object and returns to `Sleep`.
    pub fn collect_slice(&self) -> Phase {
        if !self.check_can_collect() {
            return self.phase();
        }

        match self.phase() {
            Phase::Sleep => {
                self.begin_cycle(None);
                self.mark(self.0.parameters.slice_budget);
            }
            Phase::Mark => self.mark(self.0.parameters.slice_budget),
            Phase::Sweep => self.sweep(),
        }
        trace!(phase = ?self.phase(), "collection slice finished");
        self.phase()
    }

    /// Link `node` as the new innermost stack root.
    pub fn register_stack_root(&self, label: &'static str, node: Rc<dyn RootTrace>) -> StackRootId {
        self.check_not_tracing("stack root registration");
        self.0.roots.borrow_mut().push_stack(label, node)
    }

    /// Unlink the innermost stack root, which must be `id`.
    pub fn unregister_stack_root(&self, id: StackRootId) {
        self.check_not_tracing("stack root unregistration");
        let result = self.0.roots.borrow_mut().pop_stack(id);
        if let Err(err) = result {
            if thread::panicking() {
                tracing::error!(
                    depth = err.depth,
                    top = err.top,
                    "stack root released out of order while unwinding"
                );
            } else {
                fatal!(
                    "stack root at depth {} released while depth {} is still linked",
                    err.depth,
                    err.top
                );
            }
        }
    }

    pub fn register_persistent_root(
        &self,
        label: &'static str,
        node: Rc<dyn RootTrace>,
    ) -> PersistentRootId {
        if self.is_torn_down() {
            fatal!("persistent root {label:?} registered after context teardown");
        }
        self.check_not_tracing("persistent root registration");
        self.0.roots.borrow_mut().insert_persistent(label, node)
    }

    pub fn unregister_persistent_root(&self, id: PersistentRootId) {
        self.check_not_tracing("persistent root unregistration");
        if !self.0.roots.borrow_mut().remove_persistent(id) {
            fatal!("persistent root {id:?} is not registered");
        }
    }

    /// Register a hook that is called at every sweep, after marking and before freeing.
    pub fn register_sweeper(&self, hook: Rc<dyn SweepHook>) -> SweeperId {
        self.check_not_tracing("sweeper registration");
        self.0.roots.borrow_mut().insert_sweeper(hook)
    }

    pub fn unregister_sweeper(&self, id: SweeperId) {
        self.check_not_tracing("sweeper unregistration");
        self.0.roots.borrow_mut().remove_sweeper(id);
    }

    /// Every edge reported by the current root set, labelled with the path that reached it.
    pub fn root_edges(&self) -> Vec<Edge> {
        let roots = self.0.roots.borrow().snapshot();
        let mut edges = Vec::new();
        self.with_status(Status::Tracing, || {
            let mut visit = |edge: Edge| edges.push(edge);
            let mut trc = Tracer::visitor(&mut visit);
            for (label, node) in &roots {
                trc.scope(label, |trc| node.trace_root(trc));
            }
        });
        edges
    }

    /// Shut the collector down.
    ///
    /// Every stack root must have been released first. All remaining host objects are then
    /// finalized, and once they are gone no persistent root may still be registered. Afterwards allocation fails, collection does nothing, and registering a
    /// persistent root is fatal.
    pub fn teardown(&self) {
        match self.0.status.get() {
            Status::TornDown => return,
            Status::Running => {}
            status => fatal!("context teardown requested while {status:?}"),
        }

        let depth = self.0.roots.borrow().stack_depth();
        if depth > 0 {
            fatal!("context torn down with {depth} stack roots still linked");
        }

        // Finalized natives may still release persistent roots.
        let objects = {
            let mut heap = self.0.heap.borrow_mut();
            heap.gray.clear();
            heap.table.drain()
        };
        self.0.phase.set(Phase::Sleep);
        let finalized = self.finalize(objects);

        let labels = self.0.roots.borrow().persistent_labels();
        if !labels.is_empty() {
            fatal!("context torn down with persistent roots still registered: {labels:?}");
        }
        self.0.roots.borrow_mut().clear_sweepers();
        self.0.status.set(Status::TornDown);
        debug!(finalized, "context torn down");
    }

    fn reserve(&self, pending: &dyn Fn(&mut Tracer<'_>)) -> Result<(), AllocError> {
        match self.0.status.get() {
            Status::Running => {}
            Status::TornDown => return Err(AllocError::TornDown),
            Status::Tracing => fatal!("allocation inside a trace callback"),
            Status::Finalizing => fatal!("allocation inside a finalizer or sweep hook"),
        }

        if let Some(every) = self.0.parameters.collect_every {
            if self.0.allocated_since.get() >= every {
                self.full_collect(Some(pending));
            }
        }

        if let Some(limit) = self.0.parameters.max_objects {
            if self.live_objects() >= limit {
                self.full_collect(Some(pending));
                if self.live_objects() >= limit {
                    warn!(limit, "allocation failed, heap exhausted");
                    return Err(AllocError::HeapExhausted { limit });
                }
            }
        }

        Ok(())
    }

    fn insert(&self, data: ObjectData) -> ObjectRef {
        // Objects allocated during a cycle are allocated black so the cycle cannot free them.
        let marked = self.phase() != Phase::Sleep;
        let obj = self
            .0
            .heap
            .borrow_mut()
            .table
            .insert(Object { marked, data });
        self.0.allocated_since.set(self.0.allocated_since.get() + 1);
        obj
    }

    fn full_collect(&self, pending: Option<&dyn Fn(&mut Tracer<'_>)>) {
        if !self.check_can_collect() {
            return;
        }

        if self.phase() != Phase::Sleep {
            self.finish_cycle();
        }
        self.begin_cycle(pending);
        self.finish_cycle();
    }

    fn finish_cycle(&self) {
        while self.phase() == Phase::Mark {
            self.mark(usize::MAX);
        }
        if self.phase() == Phase::Sweep {
            self.sweep();
        }
    }

    // The root set is scanned exactly once per cycle, here. Roots linked after this point are not
    // observed by the cycle.
    fn begin_cycle(&self, pending: Option<&dyn Fn(&mut Tracer<'_>)>) {
        debug!(live = self.live_objects(), "collection cycle started");
        self.0.phase.set(Phase::Mark);

        let roots = self.0.roots.borrow().snapshot();
        self.with_marker(|trc| {
            for (label, node) in &roots {
                trc.scope(label, |trc| node.trace_root(trc));
            }
            if let Some(pending) = pending {
                trc.scope("pending allocation", |trc| pending(trc));
            }
        });
    }

    fn mark(&self, budget: usize) {
        enum Scan {
            Fields(Vec<ObjectRef>),
            Host(Rc<dyn HostHooks>),
        }

        let mut work = 0;
        while work < budget {
            let scan = {
                let mut heap = self.0.heap.borrow_mut();
                let Some(obj) = heap.gray.pop() else {
                    break;
                };
                match heap.table.get(obj).map(|object| &object.data) {
                    Some(ObjectData::Plain(fields)) => {
                        Scan::Fields(fields.iter().filter_map(|v| v.as_object()).collect())
                    }
                    Some(ObjectData::Host { hooks, .. }) => Scan::Host(hooks.clone()),
                    None => continue,
                }
            };

            match scan {
                Scan::Fields(children) => {
                    let mut heap = self.0.heap.borrow_mut();
                    let heap = &mut *heap;
                    let mut trc = Tracer::marker(&mut heap.table, &mut heap.gray);
                    for child in children {
                        trc.edge(child, "field");
                    }
                }
                Scan::Host(hooks) => self.with_marker(|trc| hooks.trace(trc)),
            }
            work += 1;
        }

        if self.0.heap.borrow().gray.is_empty() {
            trace!("mark phase finished");
            self.0.phase.set(Phase::Sweep);
        }
    }

    fn sweep(&self) {
        let sweepers = self.0.roots.borrow().sweepers();
        if !sweepers.is_empty() {
            self.with_status(Status::Finalizing, || {
                let heap = self.0.heap.borrow();
                let sweeper = Sweeper::new(&heap.table);
                for hook in &sweepers {
                    hook.sweep(&sweeper);
                }
            });
        }

        let dead = self.0.heap.borrow_mut().table.sweep_unmarked();
        self.0.phase.set(Phase::Sleep);
        self.0.allocated_since.set(0);

        let freed = dead.len();
        let finalized = self.finalize(dead);
        self.update_stats(|stats| {
            stats.collections += 1;
            stats.objects_freed += freed as u64;
        });
        debug!(
            live = self.live_objects(),
            freed, finalized, "collection cycle finished"
        );
    }

    fn finalize(&self, objects: Vec<Object>) -> usize {
        let mut finalized = 0;
        self.with_status(Status::Finalizing, || {
            for object in &objects {
                if let ObjectData::Host { hooks, .. } = &object.data {
                    hooks.finalize();
                    finalized += 1;
                }
            }
            drop(objects);
        });
        self.update_stats(|stats| stats.objects_finalized += finalized as u64);
        finalized
    }

    fn with_marker<R>(&self, f: impl FnOnce(&mut Tracer<'_>) -> R) -> R {
        self.with_status(Status::Tracing, || {
            let mut heap = self.0.heap.borrow_mut();
            let heap = &mut *heap;
            f(&mut Tracer::marker(&mut heap.table, &mut heap.gray))
        })
    }

    // The previous status is restored even if `f` panics, so guards dropped while unwinding out of
    // a trace callback can still unlink themselves.
    fn with_status<R>(&self, status: Status, f: impl FnOnce() -> R) -> R {
        struct Restore<'a>(&'a Cell<Status>, Status);

        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.0.set(self.1);
            }
        }

        let _restore = Restore(&self.0.status, self.0.status.replace(status));
        f()
    }

    fn update_stats(&self, f: impl FnOnce(&mut GcStats)) {
        let mut stats = self.0.stats.get();
        f(&mut stats);
        self.0.stats.set(stats);
    }

    fn check_not_tracing(&self, operation: &str) {
        if self.0.status.get() == Status::Tracing {
            fatal!("{operation} inside a trace callback");
        }
    }

    fn check_can_collect(&self) -> bool {
        match self.0.status.get() {
            Status::Running => true,
            Status::TornDown => false,
            Status::Tracing => fatal!("collection requested inside a trace callback"),
            Status::Finalizing => fatal!("collection requested inside a finalizer or sweep hook"),
        }
    }
}

fn plain_fields(object: Option<&Object>) -> Result<&Vec<Value>, AccessError> {
    match object {
        None => Err(AccessError::Dead),
        Some(Object {
            data: ObjectData::Plain(fields),
            ..
        }) => Ok(fields),
        Some(_) => Err(AccessError::NotPlain),
    }
}

fn plain_fields_mut(object: Option<&mut Object>) -> Result<&mut Vec<Value>, AccessError> {
    match object {
        None => Err(AccessError::Dead),
        Some(Object {
            data: ObjectData::Plain(fields),
            ..
        }) => Ok(fields),
        Some(_) => Err(AccessError::NotPlain),
    }
}
