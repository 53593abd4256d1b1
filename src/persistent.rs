use std::{
    any::type_name,
    cell::{Ref, RefMut},
    fmt, mem,
    rc::Rc,
    thread,
};

use crate::{
    gc::{fatal, Context, PersistentRootId, WeakContext},
    rooted::RootNode,
    DefaultPolicy, TracePolicy,
};

enum State<T, P> {
    Uninit,
    Live {
        cx: WeakContext,
        id: PersistentRootId,
        node: Rc<RootNode<T, P>>,
    },
    Reset,
}

/// A root whose lifetime is controlled explicitly rather than by a lexical scope.
///
/// A `PersistentRooted` starts out uninitialized and does not touch any collector until
/// [`PersistentRooted::init`] (or one of the `emplace` variants) links it into a context's
/// persistent root list. It stays linked until [`PersistentRooted::reset`] is called, and it may be
/// moved freely in between, so it can live in a `thread_local!` or as a field of a longer lived
/// host struct.
///
/// Whoever owns the handle owns the registration: the handle must be reset before it is dropped,
/// and before its context is torn down. Both mistakes are fatal.
pub struct PersistentRooted<T: 'static, P: TracePolicy<T> + 'static = DefaultPolicy> {
    state: State<T, P>,
}

impl<T: 'static, P: TracePolicy<T> + 'static> Drop for PersistentRooted<T, P> {
    fn drop(&mut self) {
        if let State::Live { cx, id, .. } = &self.state {
            if !thread::panicking() {
                fatal!(
                    "persistent root of {} dropped without being reset",
                    type_name::<T>()
                );
            }
            if let Some(cx) = cx.upgrade() {
                cx.unregister_persistent_root(*id);
            }
        }
    }
}

impl<T, P> fmt::Debug for PersistentRooted<T, P>
where
    T: fmt::Debug + 'static,
    P: TracePolicy<T> + 'static,
{
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Uninit => fmt.write_str("PersistentRooted(<uninit>)"),
            State::Live { node, .. } => fmt
                .debug_tuple("PersistentRooted")
                .field(&*node.borrow())
                .finish(),
            State::Reset => fmt.write_str("PersistentRooted(<reset>)"),
        }
    }
}

impl<T: 'static, P: TracePolicy<T> + 'static> Default for PersistentRooted<T, P> {
    fn default() -> PersistentRooted<T, P> {
        PersistentRooted::new()
    }
}

impl<T: 'static, P: TracePolicy<T> + 'static> PersistentRooted<T, P> {
    pub const fn new() -> PersistentRooted<T, P> {
        PersistentRooted {
            state: State::Uninit,
        }
    }

    /// Link this handle into the persistent root list of `cx`, holding `value`.
    ///
    /// Panics if the handle is already initialized or if `cx` has been torn down. A handle that has
    /// been reset may be initialized again.
    pub fn init(&mut self, cx: &Context, value: T) {
        if let State::Live { .. } = self.state {
            fatal!(
                "persistent root of {} initialized twice",
                type_name::<T>()
            );
        }

        let node = RootNode::<T, P>::new(value);
        let id = cx.register_persistent_root(type_name::<T>(), node.clone());
        self.state = State::Live {
            cx: cx.downgrade(),
            id,
            node,
        };
    }

    /// Initialize the handle with `T::default()`.
    pub fn emplace(&mut self, cx: &Context)
    where
        T: Default,
    {
        self.emplace_with(cx, T::default)
    }

    /// Initialize the handle with a value that is only constructed once the handle is known to be
    /// uninitialized.
    pub fn emplace_with(&mut self, cx: &Context, f: impl FnOnce() -> T) {
        if let State::Live { .. } = self.state {
            fatal!(
                "persistent root of {} initialized twice",
                type_name::<T>()
            );
        }
        self.init(cx, f())
    }

    /// Unlink the handle and drop its value.
    ///
    /// Does nothing if the handle has already been reset. Resetting a handle that was never
    /// initialized is fatal.
    pub fn reset(&mut self) {
        match mem::replace(&mut self.state, State::Reset) {
            State::Uninit => {
                self.state = State::Uninit;
                fatal!(
                    "persistent root of {} reset before it was initialized",
                    type_name::<T>()
                );
            }
            State::Live { cx, id, node } => {
                if let Some(cx) = cx.upgrade() {
                    cx.unregister_persistent_root(id);
                }
                drop(node);
            }
            State::Reset => {}
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, State::Live { .. })
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.node().borrow().clone()
    }

    pub fn set(&self, value: T) {
        *self.node().borrow_mut() = value;
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.node().borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.node().borrow_mut()
    }

    pub fn is_valid(&self) -> bool {
        match &self.state {
            State::Live { cx, node, .. } => cx
                .upgrade()
                .is_some_and(|cx| P::is_valid(&node.borrow(), &cx)),
            State::Uninit | State::Reset => true,
        }
    }

    fn node(&self) -> &RootNode<T, P> {
        match &self.state {
            State::Live { node, .. } => node,
            State::Uninit | State::Reset => fatal!(
                "persistent root of {} accessed while not initialized",
                type_name::<T>()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crate::gc::Value;

    use super::*;

    thread_local! {
        static GLOBAL: RefCell<PersistentRooted<Value>> =
            const { RefCell::new(PersistentRooted::new()) };
    }

    #[test]
    fn thread_local_roots_need_no_context_until_init() {
        let cx = Context::default();
        let obj = cx.new_object(Vec::new()).unwrap();

        GLOBAL.with_borrow_mut(|root| {
            assert!(!root.is_initialized());
            root.init(&cx, obj.into());
        });
        cx.collect();
        assert!(cx.is_alive(obj));

        GLOBAL.with_borrow_mut(|root| root.reset());
        cx.collect();
        assert!(!cx.is_alive(obj));
    }

    #[test]
    fn reset_is_idempotent_and_reinit_is_allowed() {
        let cx = Context::default();
        let mut root = PersistentRooted::<Vec<Value>>::new();
        root.emplace(&cx);
        root.borrow_mut().push(Value::Integer(1));
        assert_eq!(root.get(), vec![Value::Integer(1)]);

        root.reset();
        root.reset();
        assert!(!root.is_initialized());

        root.emplace_with(&cx, || vec![Value::Null]);
        assert_eq!(root.borrow().len(), 1);
        root.reset();
        cx.teardown();
    }

    #[test]
    #[should_panic(expected = "reset before it was initialized")]
    fn reset_without_init_is_fatal() {
        PersistentRooted::<Value>::new().reset();
    }

    #[test]
    #[should_panic(expected = "initialized twice")]
    fn double_init_is_fatal() {
        let cx = Context::default();
        let mut root = PersistentRooted::<Value>::new();
        root.init(&cx, Value::Null);
        root.init(&cx, Value::Null);
    }

    #[test]
    #[should_panic(expected = "dropped without being reset")]
    fn dropping_a_live_root_is_fatal() {
        let cx = Context::default();
        let mut root = PersistentRooted::<Value>::new();
        root.init(&cx, Value::Null);
    }
}
