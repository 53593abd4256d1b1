use std::{
    any::{Any, TypeId},
    cell::RefCell,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    rc::{Rc, Weak},
};

use thiserror::Error;

use crate::{
    gc::{
        AccessError, AllocError, BarrierKind, ClassTag, Context, HostHooks, ObjectRef, Sweeper,
        Tracer, Value,
    },
    Trace,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("host object class mismatch, expected {expected} but found {found}")]
    WrongClass {
        expected: &'static str,
        found: &'static str,
    },
    #[error("host class takes {expected} slots, but {found} were given")]
    SlotCount { expected: usize, found: usize },
    #[error("slot index {index} out of bounds for host object with {count} slots")]
    SlotIndex { index: usize, count: usize },
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Access(#[from] AccessError),
}

/// The static description of a kind of host object.
pub trait HostClass: 'static {
    const NAME: &'static str;
    const SLOT_COUNT: usize;

    /// The native aggregate each slot points to.
    type Native: Trace + 'static;
}

/// One internal slot of a host object.
///
/// An `Owned` slot's native value belongs to the host object and is dropped when the object is
/// finalized. An `Unowned` slot only refers to a native value kept alive elsewhere, which is never
/// released by the host object. Both kinds are traced for as long as the host object is reachable.
#[derive(Debug, Default)]
pub enum Slot<T> {
    #[default]
    Empty,
    Owned(Box<T>),
    Unowned(Weak<T>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotKind {
    Empty,
    Owned,
    Unowned,
}

impl<T> Slot<T> {
    pub fn owned(value: T) -> Slot<T> {
        Slot::Owned(Box::new(value))
    }

    pub fn unowned(value: &Rc<T>) -> Slot<T> {
        Slot::Unowned(Rc::downgrade(value))
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            Slot::Empty => SlotKind::Empty,
            Slot::Owned(_) => SlotKind::Owned,
            Slot::Unowned(_) => SlotKind::Unowned,
        }
    }

    /// Call `f` with the native value, or with `None` if the slot is empty or its unowned value
    /// has already been dropped by its owner.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        match self {
            Slot::Empty => f(None),
            Slot::Owned(value) => f(Some(&**value)),
            Slot::Unowned(value) => f(value.upgrade().as_deref()),
        }
    }
}

impl<T: Trace> Trace for Slot<T> {
    fn trace(&self, trc: &mut Tracer<'_>) {
        match self {
            Slot::Empty => {}
            Slot::Owned(value) => trc.scope("owned", |trc| value.trace(trc)),
            Slot::Unowned(value) => {
                if let Some(value) = value.upgrade() {
                    trc.scope("unowned", |trc| value.trace(trc));
                }
            }
        }
    }

    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        self.with(|value| value.is_some_and(|value| value.needs_sweep(sweeper)))
    }

    fn is_valid(&self, cx: &Context) -> bool {
        self.with(|value| value.map_or(true, |value| value.is_valid(cx)))
    }
}

// The native side of a host object, stored behind its collector object as its hooks.
struct HostCell<C: HostClass> {
    slots: RefCell<Vec<Slot<C::Native>>>,
}

impl<C: HostClass> HostHooks for HostCell<C> {
    fn trace(&self, trc: &mut Tracer<'_>) {
        for (i, slot) in self.slots.borrow().iter().enumerate() {
            trc.scope_index(i, |trc| slot.trace(trc));
        }
    }

    fn finalize(&self) {
        // Taking the slots out makes releasing the owned ones idempotent. Unowned slots only drop
        // their weak reference.
        let slots = mem::take(&mut *self.slots.borrow_mut());
        for slot in slots {
            if let Slot::Owned(native) = slot {
                drop(native);
            }
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// A typed handle to a collector object of host class `C`, whose state lives in native slots.
///
/// Once created, a host object's lifetime belongs to the collector: it is finalized by the sweep
/// that finds it unreachable, which releases its owned slots. Its liveness can be observed with
/// [`Context::liveness`].
pub struct HostObject<C: HostClass> {
    obj: ObjectRef,
    _class: PhantomData<fn() -> C>,
}

impl<C: HostClass> Copy for HostObject<C> {}

impl<C: HostClass> Clone for HostObject<C> {
    fn clone(&self) -> HostObject<C> {
        *self
    }
}

impl<C: HostClass> PartialEq for HostObject<C> {
    fn eq(&self, other: &HostObject<C>) -> bool {
        self.obj == other.obj
    }
}

impl<C: HostClass> Eq for HostObject<C> {}

impl<C: HostClass> Hash for HostObject<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.obj.hash(state)
    }
}

impl<C: HostClass> fmt::Debug for HostObject<C> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("HostObject")
            .field(&C::NAME)
            .field(&self.obj)
            .finish()
    }
}

impl<C: HostClass> From<HostObject<C>> for Value {
    fn from(host: HostObject<C>) -> Value {
        Value::Object(host.obj)
    }
}

impl<C: HostClass> HostObject<C> {
    /// Allocate a host object holding `slots`.
    ///
    /// If allocating triggers a collection, the slots are traced as temporary roots. On failure
    /// nothing stays registered with the collector and any owned slots are dropped.
    pub fn create(cx: &Context, slots: Vec<Slot<C::Native>>) -> Result<HostObject<C>, HostError> {
        if slots.len() != C::SLOT_COUNT {
            return Err(HostError::SlotCount {
                expected: C::SLOT_COUNT,
                found: slots.len(),
            });
        }

        let cell = Rc::new(HostCell::<C> {
            slots: RefCell::new(slots),
        });
        let obj = cx.new_host_object(ClassTag::of::<C>(C::NAME), cell)?;
        Ok(HostObject {
            obj,
            _class: PhantomData,
        })
    }

    /// View `obj` as a host object of class `C`, checking its class tag.
    pub fn from_object(cx: &Context, obj: ObjectRef) -> Result<HostObject<C>, HostError> {
        let (tag, _) = cx.host_hooks(obj)?;
        if tag.type_id() != TypeId::of::<C>() {
            return Err(HostError::WrongClass {
                expected: C::NAME,
                found: tag.name(),
            });
        }
        Ok(HostObject {
            obj,
            _class: PhantomData,
        })
    }

    pub fn as_object(self) -> ObjectRef {
        self.obj
    }

    /// Call `f` with the native value in slot `index`, or `None` if that slot is empty or refers to
    /// an unowned value its owner has dropped.
    ///
    /// The object's slots must not be replaced from inside `f`.
    pub fn with_slot<R>(
        self,
        cx: &Context,
        index: usize,
        f: impl FnOnce(Option<&C::Native>) -> R,
    ) -> Result<R, HostError> {
        let cell = self.cell(cx)?;
        let slots = cell.slots.borrow();
        let slot = slots.get(index).ok_or(HostError::SlotIndex {
            index,
            count: slots.len(),
        })?;
        Ok(slot.with(f))
    }

    pub fn slot_kind(self, cx: &Context, index: usize) -> Result<SlotKind, HostError> {
        let cell = self.cell(cx)?;
        let slots = cell.slots.borrow();
        slots
            .get(index)
            .map(Slot::kind)
            .ok_or(HostError::SlotIndex {
                index,
                count: slots.len(),
            })
    }

    /// Replace slot `index`, returning its previous contents.
    ///
    /// A returned owned slot belongs to the caller again and is no longer released by the host
    /// object.
    pub fn set_slot(
        self,
        cx: &Context,
        index: usize,
        slot: Slot<C::Native>,
    ) -> Result<Slot<C::Native>, HostError> {
        let cell = self.cell(cx)?;
        {
            let slots = cell.slots.borrow();
            let old = slots.get(index).ok_or(HostError::SlotIndex {
                index,
                count: slots.len(),
            })?;
            cx.write_barrier(
                BarrierKind::Write,
                Some(&|trc: &mut Tracer<'_>| old.trace(trc)),
                Some(&|trc: &mut Tracer<'_>| slot.trace(trc)),
            );
        }
        let mut slots = cell.slots.borrow_mut();
        Ok(mem::replace(&mut slots[index], slot))
    }

    fn cell(self, cx: &Context) -> Result<Rc<HostCell<C>>, HostError> {
        let (tag, hooks) = cx.host_hooks(self.obj)?;
        hooks
            .into_any()
            .downcast::<HostCell<C>>()
            .map_err(|_| HostError::WrongClass {
                expected: C::NAME,
                found: tag.name(),
            })
    }
}

impl<C: HostClass> Trace for HostObject<C> {
    #[inline]
    fn trace(&self, trc: &mut Tracer<'_>) {
        trc.edge(self.obj, C::NAME)
    }

    #[inline]
    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        sweeper.is_dying(self.obj)
    }

    #[inline]
    fn is_valid(&self, cx: &Context) -> bool {
        cx.is_alive(self.obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point;

    impl HostClass for Point {
        const NAME: &'static str = "Point";
        const SLOT_COUNT: usize = 1;
        type Native = (i64, i64);
    }

    struct Pair;

    impl HostClass for Pair {
        const NAME: &'static str = "Pair";
        const SLOT_COUNT: usize = 2;
        type Native = Value;
    }

    #[test]
    fn class_tags_are_checked() {
        let cx = Context::default();
        let point = HostObject::<Point>::create(&cx, vec![Slot::owned((1, 2))]).unwrap();
        let plain = cx.new_object(Vec::new()).unwrap();

        assert_eq!(
            HostObject::<Point>::from_object(&cx, point.as_object()),
            Ok(point)
        );
        assert_eq!(
            HostObject::<Pair>::from_object(&cx, point.as_object()),
            Err(HostError::WrongClass {
                expected: "Pair",
                found: "Point"
            })
        );
        assert_eq!(
            HostObject::<Point>::from_object(&cx, plain),
            Err(HostError::Access(AccessError::NotHost))
        );
    }

    #[test]
    fn slot_count_is_fixed() {
        let cx = Context::default();
        assert_eq!(
            HostObject::<Pair>::create(&cx, vec![Slot::Empty]),
            Err(HostError::SlotCount {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(cx.live_objects(), 0);
    }

    #[test]
    fn slots_can_be_read_and_replaced() {
        let cx = Context::default();
        let shared = Rc::new(Value::Integer(5));
        let pair =
            HostObject::<Pair>::create(&cx, vec![Slot::owned(Value::Null), Slot::unowned(&shared)])
                .unwrap();

        assert_eq!(pair.slot_kind(&cx, 0), Ok(SlotKind::Owned));
        assert_eq!(pair.slot_kind(&cx, 1), Ok(SlotKind::Unowned));
        assert_eq!(
            pair.with_slot(&cx, 1, |v| v.copied()),
            Ok(Some(Value::Integer(5)))
        );
        assert_eq!(
            pair.with_slot(&cx, 2, |v| v.copied()),
            Err(HostError::SlotIndex { index: 2, count: 2 })
        );

        let old = pair.set_slot(&cx, 0, Slot::Empty).unwrap();
        assert_eq!(old.kind(), SlotKind::Owned);
        assert_eq!(pair.with_slot(&cx, 0, |v| v.is_none()), Ok(true));

        drop(shared);
        assert_eq!(pair.with_slot(&cx, 1, |v| v.is_none()), Ok(true));
    }
}
