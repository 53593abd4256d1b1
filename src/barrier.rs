use std::{fmt, mem, ops::Deref};

use crate::{
    gc::{BarrierKind, Context, Sweeper, Tracer, WeakContext},
    Trace,
};

/// A host-owned slot holding a collector-managed value, for use inside native aggregates.
///
/// Every transition of the slot is reported to the collector through [`Context::write_barrier`]
/// before it happens: construction and cloning report `Init`, every write reports `Write`, and
/// dropping reports `Drop`. While an incremental mark is in progress this keeps whatever the slot
/// held when the cycle began alive until the cycle ends.
///
/// A `Heap` does not root its value. It must itself be reachable from a root or a host object, and
/// the aggregate holding it must trace it.
///
/// Moving a `Heap` is a plain relocation and needs no barrier, so growing a `Vec<Heap<T>>` reports
/// nothing to the collector.
pub struct Heap<T: Trace> {
    value: T,
    cx: WeakContext,
}

impl<T: Trace + fmt::Debug> fmt::Debug for Heap<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("Heap").field(&self.value).finish()
    }
}

impl<T: Trace> Drop for Heap<T> {
    fn drop(&mut self) {
        if let Some(cx) = self.cx.upgrade() {
            cx.write_barrier(
                BarrierKind::Drop,
                Some(&|trc: &mut Tracer<'_>| self.value.trace(trc)),
                None,
            );
        }
    }
}

impl<T: Trace> Heap<T> {
    pub fn new(cx: &Context, value: T) -> Heap<T> {
        cx.write_barrier(
            BarrierKind::Init,
            None,
            Some(&|trc: &mut Tracer<'_>| value.trace(trc)),
        );
        Heap {
            value,
            cx: cx.downgrade(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Store `value`, returning the previous contents.
    pub fn set(&mut self, value: T) -> T {
        if let Some(cx) = self.cx.upgrade() {
            cx.write_barrier(
                BarrierKind::Write,
                Some(&|trc: &mut Tracer<'_>| self.value.trace(trc)),
                Some(&|trc: &mut Tracer<'_>| value.trace(trc)),
            );
        }
        mem::replace(&mut self.value, value)
    }

    /// Modify the contents in place.
    ///
    /// The barrier runs over the old contents before `f` is called. The new contents are not
    /// checked for dangling handles.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        if let Some(cx) = self.cx.upgrade() {
            cx.write_barrier(
                BarrierKind::Write,
                Some(&|trc: &mut Tracer<'_>| self.value.trace(trc)),
                None,
            );
        }
        f(&mut self.value)
    }
}

impl<T: Trace + Clone> Clone for Heap<T> {
    fn clone(&self) -> Heap<T> {
        let value = self.value.clone();
        match self.cx.upgrade() {
            Some(cx) => Heap::new(&cx, value),
            None => Heap {
                value,
                cx: self.cx.clone(),
            },
        }
    }
}

impl<T: Trace> Deref for Heap<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Trace> Trace for Heap<T> {
    #[inline]
    fn trace(&self, trc: &mut Tracer<'_>) {
        self.value.trace(trc)
    }

    #[inline]
    fn needs_sweep(&self, sweeper: &Sweeper<'_>) -> bool {
        self.value.needs_sweep(sweeper)
    }

    #[inline]
    fn is_valid(&self, cx: &Context) -> bool {
        self.value.is_valid(cx)
    }
}
