use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap as StdHashMap, VecDeque},
    hash::BuildHasher,
    rc::Rc,
};

use hashbrown::HashMap;

use crate::gc::{Context, Edge, ObjectRef, Sweeper, Tracer, Value};

/// A trait for host types that may hold collector-managed values.
///
/// Types that are reachable from a root, a [`Heap`](crate::Heap), or a host object slot must
/// implement this trait so the collector can find the values they hold:
///
///   1. `Trace::trace` *must* report every [`Value`] and [`ObjectRef`] held inside this type,
///      including every element of any contained sequence, and cannot fail.
///   2. `Trace::trace` must only report edges. It must not allocate, collect, or touch the root
///      set, and doing so is a fatal error.
///   3. Values stored after construction must be stored through a [`Heap`](crate::Heap) (or with
///      an explicit [`Context::write_barrier`]) so that an in-progress incremental collection
///      sees the write.
///
/// For plain structs, the [`impl_trace!`](crate::impl_trace) macro generates an implementation
/// that traces every listed field under its own name. Types that can never hold a collector value
/// can use [`empty_trace!`](crate::empty_trace).
pub trait Trace {
    /// *Must* report every collector-managed value held in this type.
    fn trace(&self, trc: &mut Tracer<'_>);

    /// Called during the sweep phase by weak sweep participants. Returns true if this value refers
    /// to something the current collection is about to free and should be cleared.
    ///
    /// The default implementation returns false, which is correct for any type that does not hold
    /// collector values.
    #[inline]
    fn needs_sweep(&self, _sweeper: &Sweeper<'_>) -> bool {
        false
    }

    /// Returns true if every value held in this type still refers to a live object. Used in debug
    /// assertions, not for correctness.
    #[inline]
    fn is_valid(&self, _cx: &Context) -> bool {
        true
    }
}

/// If a type will never hold collector values, you can use this macro to provide a simple empty
/// `Trace` implementation.
#[macro_export]
macro_rules! empty_trace {
    ($($type:ty),* $(,)?) => {
        $(
            impl $crate::Trace for $type {
                #[inline]
                fn trace(&self, _trc: &mut $crate::gc::Tracer<'_>) {}
            }
        )*
    };
}

/// Implements `Trace` for a struct by tracing each listed field, labelled with the field name.
///
/// ```
/// # use tether::{impl_trace, Heap, gc::Value};
/// struct Pair {
///     first: Value,
///     rest: Vec<Heap<Value>>,
///     count: usize,
/// }
///
/// impl_trace!(Pair { first, rest, count });
/// ```
///
/// Any field left out of the list is not traced, which is only sound if it can never reach a
/// collector value.
#[macro_export]
macro_rules! impl_trace {
    ($type:ty { $($field:ident),* $(,)? }) => {
        impl $crate::Trace for $type {
            fn trace(&self, trc: &mut $crate::gc::Tracer<'_>) {
                $(
                    trc.scope(
                        stringify!($field),
                        |trc| $crate::Trace::trace(&self.$field, trc),
                    );
                )*
            }

            fn needs_sweep(&self, sweeper: &$crate::gc::Sweeper<'_>) -> bool {
                false $(|| $crate::Trace::needs_sweep(&self.$field, sweeper))*
            }

            fn is_valid(&self, cx: &$crate::gc::Context) -> bool {
                true $(&& $crate::Trace::is_valid(&self.$field, cx))*
            }
        }
    };
}

/// Every edge `value` reports, labelled with the slash-separated path of scopes that reached it.
pub fn edges_of<T: Trace + ?Sized>(value: &T) -> Vec<Edge> {
    let mut edges = Vec::new();
    {
        let mut visit = |edge: Edge| edges.push(edge);
        value.trace(&mut Tracer::visitor(&mut visit));
    }
    edges
}

empty_trace!((), bool, char, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64);
empty_trace!(str, String);

impl Trace for ObjectRef {
    #[inline]
    fn trace(&self, trc: &mut Tracer<'_>) {
        trc.edge(*self, "object");
    }

    #[inline]
    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        sweeper.is_dying(*self)
    }

    #[inline]
    fn is_valid(&self, cx: &Context) -> bool {
        cx.is_alive(*self)
    }
}

impl Trace for Value {
    #[inline]
    fn trace(&self, trc: &mut Tracer<'_>) {
        trc.value(self, "value");
    }

    #[inline]
    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        self.as_object().is_some_and(|obj| sweeper.is_dying(obj))
    }

    #[inline]
    fn is_valid(&self, cx: &Context) -> bool {
        self.as_object().map_or(true, |obj| cx.is_alive(obj))
    }
}

impl<T: Trace + ?Sized> Trace for &'static T {
    #[inline]
    fn trace(&self, trc: &mut Tracer<'_>) {
        (**self).trace(trc)
    }

    #[inline]
    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        (**self).needs_sweep(sweeper)
    }

    #[inline]
    fn is_valid(&self, cx: &Context) -> bool {
        (**self).is_valid(cx)
    }
}

impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, trc: &mut Tracer<'_>) {
        if let Some(t) = self {
            t.trace(trc)
        }
    }

    #[inline]
    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        self.as_ref().is_some_and(|t| t.needs_sweep(sweeper))
    }

    #[inline]
    fn is_valid(&self, cx: &Context) -> bool {
        self.as_ref().map_or(true, |t| t.is_valid(cx))
    }
}

impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, trc: &mut Tracer<'_>) {
        (**self).trace(trc)
    }

    #[inline]
    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        (**self).needs_sweep(sweeper)
    }

    #[inline]
    fn is_valid(&self, cx: &Context) -> bool {
        (**self).is_valid(cx)
    }
}

impl<T: Trace + ?Sized> Trace for Rc<T> {
    #[inline]
    fn trace(&self, trc: &mut Tracer<'_>) {
        (**self).trace(trc)
    }

    #[inline]
    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        (**self).needs_sweep(sweeper)
    }

    #[inline]
    fn is_valid(&self, cx: &Context) -> bool {
        (**self).is_valid(cx)
    }
}

// Collections happen only when the mutator asks for one, so a `RefCell` that is mutably borrowed
// across a call to `collect` is a bug in the caller and panics here.
impl<T: Trace + ?Sized> Trace for RefCell<T> {
    fn trace(&self, trc: &mut Tracer<'_>) {
        self.borrow().trace(trc)
    }

    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        self.borrow().needs_sweep(sweeper)
    }

    fn is_valid(&self, cx: &Context) -> bool {
        self.borrow().is_valid(cx)
    }
}

impl<T: Trace + Copy> Trace for Cell<T> {
    #[inline]
    fn trace(&self, trc: &mut Tracer<'_>) {
        self.get().trace(trc)
    }

    #[inline]
    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        self.get().needs_sweep(sweeper)
    }

    #[inline]
    fn is_valid(&self, cx: &Context) -> bool {
        self.get().is_valid(cx)
    }
}

macro_rules! impl_sequence_trace {
    ($([$($gen:tt)*] $type:ty),* $(,)?) => {
        $(
            impl<$($gen)*> Trace for $type {
                fn trace(&self, trc: &mut Tracer<'_>) {
                    for (i, t) in self.iter().enumerate() {
                        trc.scope_index(i, |trc| t.trace(trc));
                    }
                }

                fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
                    self.iter().any(|t| t.needs_sweep(sweeper))
                }

                fn is_valid(&self, cx: &Context) -> bool {
                    self.iter().all(|t| t.is_valid(cx))
                }
            }
        )*
    };
}

impl_sequence_trace!(
    [T: Trace] [T],
    [T: Trace, const N: usize] [T; N],
    [T: Trace] Vec<T>,
    [T: Trace] VecDeque<T>,
);

macro_rules! impl_map_trace {
    ($([$($gen:tt)*] $type:ty),* $(,)?) => {
        $(
            impl<$($gen)*> Trace for $type {
                fn trace(&self, trc: &mut Tracer<'_>) {
                    for (i, (k, v)) in self.iter().enumerate() {
                        trc.scope_index(i, |trc| {
                            trc.scope("key", |trc| k.trace(trc));
                            trc.scope("value", |trc| v.trace(trc));
                        });
                    }
                }

                fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
                    self.iter()
                        .any(|(k, v)| k.needs_sweep(sweeper) || v.needs_sweep(sweeper))
                }

                fn is_valid(&self, cx: &Context) -> bool {
                    self.iter().all(|(k, v)| k.is_valid(cx) && v.is_valid(cx))
                }
            }
        )*
    };
}

impl_map_trace!(
    [K: Trace, V: Trace, S: BuildHasher] HashMap<K, V, S>,
    [K: Trace, V: Trace, S: BuildHasher] StdHashMap<K, V, S>,
    [K: Trace, V: Trace] BTreeMap<K, V>,
);

macro_rules! impl_tuple_trace {
    ($(($($name:ident $index:tt),*)),* $(,)?) => {
        $(
            impl<$($name: Trace),*> Trace for ($($name,)*) {
                fn trace(&self, trc: &mut Tracer<'_>) {
                    $(trc.scope_index($index, |trc| self.$index.trace(trc));)*
                }

                fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
                    false $(|| self.$index.needs_sweep(sweeper))*
                }

                fn is_valid(&self, cx: &Context) -> bool {
                    true $(&& self.$index.is_valid(cx))*
                }
            }
        )*
    };
}

impl_tuple_trace!(
    (A 0),
    (A 0, B 1),
    (A 0, B 1, C 2),
    (A 0, B 1, C 2, D 3),
    (A 0, B 1, C 2, D 3, E 4),
    (A 0, B 1, C 2, D 3, E 4, F 5),
);
