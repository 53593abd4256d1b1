use std::{
    any::type_name,
    cell::{Ref, RefCell, RefMut},
    fmt,
    marker::PhantomData,
    rc::Rc,
};

use crate::{
    gc::{fatal, Context, RootTrace, StackRootId, Tracer},
    DefaultPolicy, Trace, TracePolicy,
};

/// The value behind a stack or persistent root, as the collector's root set sees it.
pub(crate) struct RootNode<T, P> {
    value: RefCell<T>,
    _policy: PhantomData<fn() -> P>,
}

impl<T, P> RootNode<T, P> {
    pub(crate) fn new(value: T) -> Rc<RootNode<T, P>> {
        Rc::new(RootNode {
            value: RefCell::new(value),
            _policy: PhantomData,
        })
    }

    pub(crate) fn borrow(&self) -> Ref<'_, T> {
        self.value.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, T> {
        self.value.borrow_mut()
    }
}

impl<T: 'static, P: TracePolicy<T> + 'static> RootTrace for RootNode<T, P> {
    fn trace_root(&self, trc: &mut Tracer<'_>) {
        match self.value.try_borrow() {
            Ok(value) => P::trace(trc, &value, "value"),
            Err(_) => fatal!(
                "rooted {} is mutably borrowed during a collection",
                type_name::<T>()
            ),
        }
    }
}

/// A stack root: keeps a value and everything it reaches alive for the rest of the enclosing
/// scope.
///
/// Stack roots are linked into the collector's root chain when created and unlinked when dropped,
/// and they must be dropped in the reverse order of their creation. To make breaking that order
/// hard, a `Rooted` is only ever created by the [`rooted!`](crate::rooted) macro or by
/// [`Rooted::scope`], both of which keep the guard itself out of reach and hand out only a
/// reference to it.
///
/// The value may be anything with a trace policy: a single [`Value`](crate::gc::Value), or an
/// aggregate of any shape that implements [`Trace`].
pub struct Rooted<'cx, T: 'static, P: TracePolicy<T> + 'static = DefaultPolicy> {
    cx: &'cx Context,
    id: StackRootId,
    node: Rc<RootNode<T, P>>,
}

impl<'cx, T: 'static, P: TracePolicy<T> + 'static> Drop for Rooted<'cx, T, P> {
    fn drop(&mut self) {
        self.cx.unregister_stack_root(self.id);
    }
}

impl<'cx, T, P> fmt::Debug for Rooted<'cx, T, P>
where
    T: fmt::Debug + 'static,
    P: TracePolicy<T> + 'static,
{
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("Rooted").field(&*self.borrow()).finish()
    }
}

impl<'cx, T: Trace + 'static> Rooted<'cx, T> {
    /// Root `value` for the duration of `f`.
    pub fn scope<R>(cx: &'cx Context, value: T, f: impl FnOnce(&Rooted<'cx, T>) -> R) -> R {
        Rooted::scope_with(cx, value, f)
    }
}

impl<'cx, T: 'static, P: TracePolicy<T> + 'static> Rooted<'cx, T, P> {
    /// Root `value` traced through the policy `P` for the duration of `f`.
    pub fn scope_with<R>(
        cx: &'cx Context,
        value: T,
        f: impl FnOnce(&Rooted<'cx, T, P>) -> R,
    ) -> R {
        let rooted = Rooted::__new(cx, value);
        f(&rooted)
    }

    /// Link a new innermost stack root.
    ///
    /// Only for use by `rooted!`, which binds the guard to a local that cannot be moved out of its
    /// scope. A guard moved anywhere else will be released out of order, which is fatal.
    #[doc(hidden)]
    #[must_use = "a stack root is unlinked as soon as its guard is dropped"]
    pub fn __new(cx: &'cx Context, value: T) -> Rooted<'cx, T, P> {
        let node = RootNode::<T, P>::new(value);
        let id = cx.register_stack_root(type_name::<T>(), node.clone());
        Rooted { cx, id, node }
    }

    pub fn context(&self) -> &'cx Context {
        self.cx
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.node.borrow().clone()
    }

    pub fn set(&self, value: T) {
        *self.node.borrow_mut() = value;
    }

    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.node.borrow_mut(), value)
    }

    /// Borrow the rooted value.
    ///
    /// A mutable borrow must not be held across a collection.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.node.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.node.borrow_mut()
    }

    pub fn is_valid(&self) -> bool {
        P::is_valid(&self.node.borrow(), self.cx)
    }
}

/// Declare a stack-rooted local.
///
/// ```
/// # use tether::{rooted, gc::{Context, Value}};
/// let cx = Context::default();
/// let obj = cx.new_object(vec![Value::Integer(1)]).unwrap();
///
/// rooted!(in(&cx) let root = Value::from(obj));
/// cx.collect();
/// assert!(cx.is_alive(obj));
/// assert_eq!(root.get(), Value::Object(obj));
/// ```
///
/// The binding is a `&Rooted`. The guard it refers to lives in a hidden local of the enclosing
/// scope and is dropped, unlinking the root, when that scope ends. A type annotation and a trace
/// policy may both be given: `rooted!(in(cx) let name: Type = value, policy = Policy)`.
#[macro_export]
macro_rules! rooted {
    (in($cx:expr) let $name:ident = $init:expr) => {
        $crate::rooted!(@bind $cx, $name, _, $crate::DefaultPolicy, $init);
    };
    (in($cx:expr) let $name:ident: $ty:ty = $init:expr) => {
        $crate::rooted!(@bind $cx, $name, $ty, $crate::DefaultPolicy, $init);
    };
    (in($cx:expr) let $name:ident = $init:expr, policy = $policy:ty) => {
        $crate::rooted!(@bind $cx, $name, _, $policy, $init);
    };
    (in($cx:expr) let $name:ident: $ty:ty = $init:expr, policy = $policy:ty) => {
        $crate::rooted!(@bind $cx, $name, $ty, $policy, $init);
    };
    (@bind $cx:expr, $name:ident, $ty:ty, $policy:ty, $init:expr) => {
        let __guard = $crate::Rooted::<$ty, $policy>::__new($cx, $init);
        let $name = &__guard;
    };
}
