use std::{
    any::Any,
    cell::{Cell, RefCell},
    rc::Rc,
};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tether_gc::{
    AllocError, ClassTag, Context, HostHooks, Liveness, Parameters, Phase, RootTrace, SweepHook,
    Sweeper, SweeperId, Tracer, Value, WeakContext,
};

#[derive(Default)]
struct Held(RefCell<Vec<tether_gc::ObjectRef>>);

impl RootTrace for Held {
    fn trace_root(&self, trc: &mut Tracer<'_>) {
        for &obj in self.0.borrow().iter() {
            trc.edge(obj, "held");
        }
    }
}

struct Counted {
    finalized: Rc<Cell<u32>>,
    edges: Vec<tether_gc::ObjectRef>,
    cx: WeakContext,
    collect_on_finalize: bool,
}

impl HostHooks for Counted {
    fn trace(&self, trc: &mut Tracer<'_>) {
        for &obj in &self.edges {
            trc.edge(obj, "edge");
        }
    }

    fn finalize(&self) {
        self.finalized.set(self.finalized.get() + 1);
        if self.collect_on_finalize {
            if let Some(cx) = self.cx.upgrade() {
                cx.collect();
            }
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

fn counted(cx: &Context, edges: Vec<tether_gc::ObjectRef>) -> (Rc<Cell<u32>>, Rc<Counted>) {
    let finalized = Rc::new(Cell::new(0));
    let hooks = Rc::new(Counted {
        finalized: finalized.clone(),
        edges,
        cx: cx.downgrade(),
        collect_on_finalize: false,
    });
    (finalized, hooks)
}

#[test]
fn unrooted_objects_are_freed() {
    let cx = Context::default();
    let a = cx.new_object(vec![Value::Integer(1)]).unwrap();
    let b = cx.new_object(vec![a.into()]).unwrap();
    assert_eq!(cx.live_objects(), 2);

    cx.collect();
    assert!(!cx.is_alive(a));
    assert!(!cx.is_alive(b));
    assert_eq!(cx.liveness(a), Liveness::Dead);
    assert_eq!(cx.stats().objects_freed, 2);
    assert!(cx.get(a, 0).is_err());
}

#[test]
fn stack_roots_keep_graphs_alive() {
    let cx = Context::default();
    let leaf = cx.new_object(vec![Value::Integer(7)]).unwrap();
    let mid = cx.new_object(vec![leaf.into(), Value::Null]).unwrap();

    let held = Rc::new(Held::default());
    held.0.borrow_mut().push(mid);
    let id = cx.register_stack_root("held", held.clone());

    cx.collect();
    assert!(cx.is_alive(mid));
    assert_eq!(cx.get(leaf, 0).unwrap(), Value::Integer(7));

    cx.unregister_stack_root(id);
    cx.collect();
    assert!(!cx.is_alive(mid));
    assert!(!cx.is_alive(leaf));
}

#[test]
#[should_panic(expected = "released while depth")]
fn stack_roots_must_be_released_in_order() {
    let cx = Context::default();
    let outer = cx.register_stack_root("outer", Rc::new(Held::default()));
    let _inner = cx.register_stack_root("inner", Rc::new(Held::default()));
    cx.unregister_stack_root(outer);
}

#[test]
fn persistent_roots_until_unregistered() {
    let cx = Context::default();
    let obj = cx.new_object(Vec::new()).unwrap();
    let held = Rc::new(Held::default());
    held.0.borrow_mut().push(obj);

    let id = cx.register_persistent_root("global", held);
    cx.collect();
    assert!(cx.is_alive(obj));

    cx.unregister_persistent_root(id);
    cx.collect();
    assert!(!cx.is_alive(obj));
}

#[test]
fn root_edges_are_labelled() {
    let cx = Context::default();
    let obj = cx.new_object(Vec::new()).unwrap();
    let held = Rc::new(Held::default());
    held.0.borrow_mut().push(obj);
    let id = cx.register_persistent_root("global", held);

    let edges = cx.root_edges();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].path, "global/held");
    assert_eq!(edges[0].object, obj);

    cx.unregister_persistent_root(id);
}

#[test]
fn incremental_barrier_preserves_snapshot() {
    let cx = Context::new(Parameters::default().set_slice_budget(1));
    let b = cx.new_object(vec![Value::Integer(2)]).unwrap();
    let a = cx.new_object(vec![b.into()]).unwrap();
    let d = cx.new_object(Vec::new()).unwrap();

    let held = Rc::new(Held::default());
    held.0.borrow_mut().extend([a, d]);
    let outer = cx.register_stack_root("held", held);

    // The first slice scans the roots and blackens `d`, leaving `a` gray and unscanned.
    assert_eq!(cx.collect_slice(), Phase::Mark);

    // Move `b` out of `a` and into a root linked after the cycle began.
    let late = Rc::new(Held::default());
    late.0.borrow_mut().push(b);
    let inner = cx.register_stack_root("late", late);
    cx.set(a, 0, Value::Null).unwrap();
    assert_eq!(cx.stats().barrier_marked, 1);

    while cx.collect_slice() != Phase::Sleep {}
    assert!(cx.is_alive(b));
    assert_eq!(cx.get(b, 0).unwrap(), Value::Integer(2));

    cx.unregister_stack_root(inner);
    cx.unregister_stack_root(outer);
}

#[test]
fn allocation_during_mark_survives_the_cycle() {
    let cx = Context::new(Parameters::default().set_slice_budget(1));
    let held = Rc::new(Held::default());
    held.0
        .borrow_mut()
        .extend([cx.new_object(Vec::new()).unwrap(), cx.new_object(Vec::new()).unwrap()]);
    let id = cx.register_stack_root("held", held);

    assert_eq!(cx.collect_slice(), Phase::Mark);
    let fresh = cx.new_object(Vec::new()).unwrap();
    while cx.collect_slice() != Phase::Sleep {}
    assert!(cx.is_alive(fresh));

    cx.collect();
    assert!(!cx.is_alive(fresh));
    cx.unregister_stack_root(id);
}

#[test]
fn unreachable_objects_wait_for_the_sweep() {
    let cx = Context::default();
    let (finalized, hooks) = counted(&cx, Vec::new());
    let obj = cx.new_host_object(ClassTag::of::<Counted>("Counted"), hooks).unwrap();

    assert_eq!(cx.collect_slice(), Phase::Sweep);
    assert_eq!(cx.liveness(obj), Liveness::PendingFinalize);
    assert_eq!(finalized.get(), 0);

    assert_eq!(cx.collect_slice(), Phase::Sleep);
    assert_eq!(cx.liveness(obj), Liveness::Dead);
    assert_eq!(finalized.get(), 1);

    cx.collect();
    assert_eq!(finalized.get(), 1);
    assert_eq!(cx.stats().objects_finalized, 1);
}

#[test]
fn host_objects_trace_their_edges() {
    let cx = Context::default();
    let target = cx.new_object(vec![Value::Boolean(true)]).unwrap();
    let (finalized, hooks) = counted(&cx, vec![target]);
    let host = cx.new_host_object(ClassTag::of::<Counted>("Counted"), hooks).unwrap();

    let held = Rc::new(Held::default());
    held.0.borrow_mut().push(host);
    let id = cx.register_stack_root("held", held);
    cx.collect();
    assert!(cx.is_alive(target));
    assert_eq!(finalized.get(), 0);

    let (tag, _) = cx.host_hooks(host).unwrap();
    assert_eq!(tag.name(), "Counted");
    assert!(cx.host_hooks(target).is_err());

    cx.unregister_stack_root(id);
    cx.collect();
    assert!(!cx.is_alive(target));
    assert_eq!(finalized.get(), 1);
}

#[test]
fn heap_limit_collects_before_failing() {
    let cx = Context::new(Parameters::default().set_max_objects(Some(2)));
    let a = cx.new_object(vec![Value::Integer(1)]).unwrap();
    cx.new_object(Vec::new()).unwrap();

    // The heap is full, but the pending field keeps `a` alive through the collection.
    let b = cx.new_object(vec![a.into()]).unwrap();
    assert!(cx.is_alive(a));
    assert_eq!(cx.get(b, 0).unwrap(), Value::Object(a));
    assert_eq!(cx.live_objects(), 2);

    let held = Rc::new(Held::default());
    held.0.borrow_mut().extend([a, b]);
    let id = cx.register_stack_root("held", held);
    assert_eq!(
        cx.new_object(Vec::new()),
        Err(AllocError::HeapExhausted { limit: 2 })
    );
    cx.unregister_stack_root(id);
}

#[test]
fn allocation_pressure_triggers_collection() {
    let cx = Context::new(Parameters::default().set_collect_every(Some(4)));
    for _ in 0..10 {
        cx.new_object(Vec::new()).unwrap();
    }
    assert!(cx.stats().collections >= 2);
    assert!(cx.live_objects() <= 4);
}

#[test]
fn teardown_finalizes_everything() {
    let cx = Context::default();
    let (finalized, hooks) = counted(&cx, Vec::new());
    let held = Rc::new(Held::default());
    held.0
        .borrow_mut()
        .push(cx.new_host_object(ClassTag::of::<Counted>("Counted"), hooks).unwrap());
    let id = cx.register_persistent_root("global", held);
    cx.collect();
    assert_eq!(finalized.get(), 0);

    cx.unregister_persistent_root(id);
    cx.teardown();
    assert_eq!(finalized.get(), 1);
    assert!(cx.is_torn_down());
    assert_eq!(cx.new_object(Vec::new()), Err(AllocError::TornDown));
}

#[test]
#[should_panic(expected = "persistent roots still registered")]
fn teardown_with_persistent_roots_is_fatal() {
    let cx = Context::default();
    cx.register_persistent_root("leaked", Rc::new(Held::default()));
    cx.teardown();
}

#[test]
#[should_panic(expected = "registered after context teardown")]
fn registration_after_teardown_is_fatal() {
    let cx = Context::default();
    cx.teardown();
    cx.register_persistent_root("late", Rc::new(Held::default()));
}

#[test]
#[should_panic(expected = "finalizer")]
fn finalizers_cannot_collect() {
    let cx = Context::default();
    let hooks = Rc::new(Counted {
        finalized: Rc::new(Cell::new(0)),
        edges: Vec::new(),
        cx: cx.downgrade(),
        collect_on_finalize: true,
    });
    cx.new_host_object(ClassTag::of::<Counted>("Counted"), hooks).unwrap();
    cx.collect();
}

struct NoopSweep;

impl SweepHook for NoopSweep {
    fn sweep(&self, _sweeper: &Sweeper<'_>) {}
}

// A root that tries to unregister a sweeper the first time it is traced.
struct Unregisters {
    cx: WeakContext,
    id: Cell<Option<SweeperId>>,
}

impl RootTrace for Unregisters {
    fn trace_root(&self, _trc: &mut Tracer<'_>) {
        if let (Some(cx), Some(id)) = (self.cx.upgrade(), self.id.take()) {
            cx.unregister_sweeper(id);
        }
    }
}

#[test]
#[should_panic(expected = "sweeper unregistration inside a trace callback")]
fn sweepers_cannot_be_unregistered_while_tracing() {
    let cx = Context::default();
    let id = cx.register_sweeper(Rc::new(NoopSweep));
    cx.register_persistent_root(
        "unregisters",
        Rc::new(Unregisters {
            cx: cx.downgrade(),
            id: Cell::new(Some(id)),
        }),
    );
    cx.collect();
}

#[test]
fn random_graphs_keep_exactly_the_reachable_set() {
    let mut rng = SmallRng::seed_from_u64(0x7e7e);

    for _ in 0..20 {
        let cx = Context::new(Parameters::default().set_slice_budget(3));
        let mut objects = Vec::new();
        for _ in 0..40 {
            objects.push(cx.new_object(Vec::new()).unwrap());
        }
        for &obj in &objects {
            for _ in 0..rng.gen_range(0..3) {
                let target = objects[rng.gen_range(0..objects.len())];
                cx.push(obj, target.into()).unwrap();
            }
        }

        let held = Rc::new(Held::default());
        for _ in 0..3 {
            held.0
                .borrow_mut()
                .push(objects[rng.gen_range(0..objects.len())]);
        }

        let mut reachable = Vec::new();
        let mut stack = held.0.borrow().clone();
        while let Some(obj) = stack.pop() {
            if reachable.contains(&obj) {
                continue;
            }
            reachable.push(obj);
            for i in 0..cx.field_count(obj).unwrap() {
                if let Value::Object(child) = cx.get(obj, i).unwrap() {
                    stack.push(child);
                }
            }
        }

        let id = cx.register_stack_root("held", held);
        while cx.collect_slice() != Phase::Sleep {}
        for &obj in &objects {
            assert_eq!(cx.is_alive(obj), reachable.contains(&obj));
        }
        cx.unregister_stack_root(id);
    }
}
