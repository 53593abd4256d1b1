use std::fmt;

/// Log a lifecycle misuse as an error event, then panic with the same message.
#[doc(hidden)]
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::fatal_error(format_args!($($arg)*))
    };
}

mod context;
mod error;
mod object;
mod params;
mod roots;
mod tracer;
mod value;

pub use self::{
    context::{BarrierKind, Context, GcStats, Liveness, Phase, WeakContext},
    error::{AccessError, AllocError},
    object::{ClassTag, HostHooks},
    params::Parameters,
    roots::{PersistentRootId, RootTrace, StackRootId, SweepHook, SweeperId},
    tracer::{Edge, Sweeper, Tracer},
    value::{ObjectRef, Value},
};

#[doc(hidden)]
#[cold]
#[track_caller]
pub fn fatal_error(args: fmt::Arguments<'_>) -> ! {
    let message = args.to_string();
    tracing::error!(%message, "fatal lifecycle error");
    panic!("{message}")
}
