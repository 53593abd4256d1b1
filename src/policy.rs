use crate::{
    gc::{Context, Sweeper, Tracer},
    Trace,
};

/// Supplies the trace operations for a type `T` on that type's behalf.
///
/// Roots, persistent handles and weak caches are generic over a policy, which defaults to
/// [`DefaultPolicy`] and forwards to `T`'s own [`Trace`] implementation. When `T` comes from a crate
/// you do not control and does not implement `Trace`, implement this trait on a policy type of your
/// own instead:
///
/// ```
/// # use std::sync::Arc;
/// # use tether::{gc::{Context, Sweeper, Tracer}, Trace, TracePolicy};
/// struct ArcPolicy;
///
/// impl<T: Trace> TracePolicy<Option<Arc<T>>> for ArcPolicy {
///     fn trace(trc: &mut Tracer<'_>, value: &Option<Arc<T>>, name: &str) {
///         if let Some(inner) = value {
///             trc.scope(name, |trc| inner.trace(trc));
///         }
///     }
/// }
/// ```
///
/// An empty wrapper must be treated as valid state: it traces nothing, never needs sweeping, and
/// is valid.
pub trait TracePolicy<T: ?Sized> {
    /// Report every collector-managed value in `value`, labelled with `name`.
    fn trace(trc: &mut Tracer<'_>, value: &T, name: &str);

    #[inline]
    fn needs_sweep(_value: &T, _sweeper: &Sweeper<'_>) -> bool {
        false
    }

    #[inline]
    fn is_valid(_value: &T, _cx: &Context) -> bool {
        true
    }
}

/// The policy for any type that implements [`Trace`] itself.
#[derive(Debug, Copy, Clone, Default)]
pub struct DefaultPolicy;

impl<T: Trace + ?Sized> TracePolicy<T> for DefaultPolicy {
    #[inline]
    fn trace(trc: &mut Tracer<'_>, value: &T, name: &str) {
        trc.scope(name, |trc| value.trace(trc))
    }

    #[inline]
    fn needs_sweep(value: &T, sweeper: &Sweeper<'_>) -> bool {
        value.needs_sweep(sweeper)
    }

    #[inline]
    fn is_valid(value: &T, cx: &Context) -> bool {
        value.is_valid(cx)
    }
}
