use std::{cell::RefCell, fmt, marker::PhantomData, rc::Rc};

use tracing::trace;

use crate::{
    gc::{fatal, Context, Phase, SweepHook, Sweeper, SweeperId, Tracer, WeakContext},
    DefaultPolicy, TracePolicy,
};

struct Entries<T, P> {
    entries: RefCell<Vec<T>>,
    _policy: PhantomData<fn() -> P>,
}

impl<T: 'static, P: TracePolicy<T> + 'static> SweepHook for Entries<T, P> {
    fn sweep(&self, sweeper: &Sweeper<'_>) {
        let Ok(mut entries) = self.entries.try_borrow_mut() else {
            fatal!("weak cache is borrowed during a sweep");
        };
        let before = entries.len();
        entries.retain(|entry| !P::needs_sweep(entry, sweeper));
        if entries.len() != before {
            trace!(removed = before - entries.len(), "weak cache swept");
        }
    }
}

/// A host-owned list of values that does not keep its contents alive.
///
/// The cache takes part in every sweep of its context without being a root: after marking
/// finishes, every entry whose policy reports [`TracePolicy::needs_sweep`] is removed before the
/// objects it refers to are freed, so the cache never holds a handle to a collected object.
///
/// Entries handed out by [`WeakCache::with`] are shaded while marking is in progress, and dying
/// entries are dropped early once marking has finished, so a handle read from the cache may be
/// stored in a root at any time.
pub struct WeakCache<T: 'static, P: TracePolicy<T> + 'static = DefaultPolicy> {
    cx: WeakContext,
    id: SweeperId,
    entries: Rc<Entries<T, P>>,
}

impl<T: 'static, P: TracePolicy<T> + 'static> Drop for WeakCache<T, P> {
    fn drop(&mut self) {
        if let Some(cx) = self.cx.upgrade() {
            cx.unregister_sweeper(self.id);
        }
    }
}

impl<T, P> fmt::Debug for WeakCache<T, P>
where
    T: fmt::Debug + 'static,
    P: TracePolicy<T> + 'static,
{
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_list()
            .entries(self.entries.entries.borrow().iter())
            .finish()
    }
}

impl<T: 'static, P: TracePolicy<T> + 'static> WeakCache<T, P> {
    pub fn new(cx: &Context) -> WeakCache<T, P> {
        let entries = Rc::new(Entries {
            entries: RefCell::new(Vec::new()),
            _policy: PhantomData,
        });
        let id = cx.register_sweeper(entries.clone());
        WeakCache {
            cx: cx.downgrade(),
            id,
            entries,
        }
    }

    pub fn push(&self, value: T) {
        self.entries.entries.borrow_mut().push(value);
    }

    pub fn len(&self) -> usize {
        self.entries.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` with the current entries.
    ///
    /// The cache must not be collected while `f` runs.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        if let Some(cx) = self.cx.upgrade() {
            match cx.phase() {
                Phase::Sleep => {}
                Phase::Mark => {
                    let entries = self.entries.entries.borrow();
                    cx.read_barrier(&|trc: &mut Tracer<'_>| {
                        for (i, entry) in entries.iter().enumerate() {
                            trc.scope_index(i, |trc| P::trace(trc, entry, "entry"));
                        }
                    });
                }
                Phase::Sweep => {
                    cx.pending_sweep(|sweeper| self.entries.sweep(sweeper));
                }
            }
        }
        f(&self.entries.entries.borrow())
    }

    pub fn clear(&self) {
        self.entries.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::gc::Value;

    use super::*;

    #[test]
    fn dying_entries_are_removed_at_sweep() {
        let cx = Context::default();
        let kept = cx.new_object(Vec::new()).unwrap();
        let dropped = cx.new_object(Vec::new()).unwrap();

        let cache = WeakCache::<Value>::new(&cx);
        cache.push(kept.into());
        cache.push(dropped.into());
        cache.push(Value::Integer(1));

        crate::rooted!(in(&cx) let _root = Value::from(kept));
        cx.collect();

        assert_eq!(cache.len(), 2);
        cache.with(|entries| assert_eq!(entries, [Value::Object(kept), Value::Integer(1)]));
        assert!(!cx.is_alive(dropped));
    }

    #[test]
    fn dropped_caches_stop_sweeping() {
        let cx = Context::default();
        let cache = WeakCache::<Value>::new(&cx);
        cache.push(Value::Null);
        drop(cache);
        cx.collect();
        assert_eq!(cx.stats().collections, 1);
    }
}
