use std::{cell::RefCell, rc::Rc};

use tether::{
    gc::{Context, Parameters, Phase, Value},
    impl_trace, rooted, Heap, HostClass, HostError, HostObject, Slot,
};

#[test]
fn growth_preserves_values_without_barriers() {
    const N: usize = 16;

    let cx = Context::default();
    rooted!(in(&cx) let list = Vec::<Heap<Value>>::with_capacity(1));

    let mut objects = Vec::new();
    for i in 0..N {
        let obj = cx.new_object(vec![Value::Integer(i as i64)]).unwrap();
        objects.push(obj);
        list.borrow_mut().push(Heap::new(&cx, obj.into()));
    }
    cx.collect();

    let before = cx.stats();
    list.borrow_mut().reserve(N * 64);
    list.borrow_mut().shrink_to_fit();
    let after = cx.stats();
    assert_eq!(before.barrier_inits, N as u64);
    assert_eq!(after.barrier_inits, before.barrier_inits);
    assert_eq!(after.barrier_writes, before.barrier_writes);
    assert_eq!(after.barrier_drops, 0);

    cx.collect();
    for (i, (slot, &obj)) in list.borrow().iter().zip(&objects).enumerate() {
        assert_eq!(*slot.get(), Value::Object(obj));
        assert_eq!(cx.get(obj, 0).unwrap(), Value::Integer(i as i64));
    }

    list.borrow_mut().clear();
    assert_eq!(cx.stats().barrier_drops, N as u64);
    cx.collect();
    assert!(objects.iter().all(|&obj| !cx.is_alive(obj)));
}

struct Node {
    next: Heap<Value>,
}

impl_trace!(Node { next });

struct Link;

impl HostClass for Link {
    const NAME: &'static str = "Link";
    const SLOT_COUNT: usize = 1;
    type Native = RefCell<Node>;
}

#[test]
fn incremental_writes_keep_the_snapshot_alive() -> Result<(), HostError> {
    let cx = Context::new(Parameters::default().set_slice_budget(1));
    let target = cx.new_object(vec![Value::Boolean(true)])?;
    let filler = cx.new_object(Vec::new())?;

    // The node is only reachable through the host object, which is still gray after the first
    // slice. Without the barrier, unlinking `target` before the host object is scanned would hide
    // it from the cycle.
    let node = Rc::new(RefCell::new(Node {
        next: Heap::new(&cx, target.into()),
    }));
    let link = HostObject::<Link>::create(&cx, vec![Slot::unowned(&node)])?;
    rooted!(in(&cx) let root = vec![Value::from(link), Value::from(filler)]);

    assert_eq!(cx.collect_slice(), Phase::Mark);

    rooted!(in(&cx) let late = Value::from(target));
    node.borrow_mut().next.set(Value::Null);
    assert_eq!(cx.stats().barrier_marked, 1);
    while cx.collect_slice() != Phase::Sleep {}

    assert!(cx.is_alive(target));
    assert_eq!(late.get(), Value::Object(target));
    assert_eq!(root.borrow().len(), 2);
    Ok(())
}

#[test]
fn dropping_during_mark_shades_the_old_value() {
    let cx = Context::new(Parameters::default().set_slice_budget(1));
    let a = cx.new_object(Vec::new()).unwrap();
    let b = cx.new_object(Vec::new()).unwrap();
    let c = cx.new_object(Vec::new()).unwrap();

    rooted!(in(&cx) let root = vec![Value::from(a), Value::from(c)]);
    let slot = Heap::new(&cx, Value::from(b));

    assert_eq!(cx.collect_slice(), Phase::Mark);
    let marked = cx.stats().barrier_marked;
    drop(slot);
    assert_eq!(cx.stats().barrier_marked, marked + 1);

    while cx.collect_slice() != Phase::Sleep {}
    assert!(cx.is_alive(b));
    assert_eq!(root.borrow().len(), 2);

    cx.collect();
    assert!(!cx.is_alive(b));
}
