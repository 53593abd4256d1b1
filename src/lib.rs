pub use tether_gc as gc;

pub mod barrier;
pub mod host;
pub mod persistent;
pub mod policy;
pub mod rooted;
pub mod sweep;
pub mod trace;

pub use self::{
    barrier::Heap,
    host::{HostClass, HostError, HostObject, Slot, SlotKind},
    persistent::PersistentRooted,
    policy::{DefaultPolicy, TracePolicy},
    rooted::Rooted,
    sweep::WeakCache,
    trace::{edges_of, Trace},
};
