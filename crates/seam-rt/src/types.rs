//! FFI-safe types shared by both sides of the boundary.
//!
//! Everything here is `#[repr(C)]` or a plain `extern "C"` function pointer:
//! the layouts are the binary contract between the reactor and the foreign
//! future runtime and must not change.

use std::ffi::{c_int, c_void};
use std::fmt;

/// Polls the foreign future behind `future`.
///
/// `task` is the opaque identity of the polling task; the foreign side builds
/// wakers from it. If the future became ready the function destroys and
/// deallocates it, then returns 1. Otherwise it returns 0.
pub type RawPollFn = unsafe extern "C" fn(task: *mut c_void, future: *mut c_void) -> c_int;

/// Builds a foreign future from `data` on the shard that will poll it.
///
/// Takes ownership of `data`; returns an owned future handle for a
/// [`RawPollFn`].
pub type RawSpawnFn = unsafe extern "C" fn(data: *mut c_void) -> *mut c_void;

/// Index of a shard (worker thread) within an engine.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(pub u32);

impl ShardId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-type operations of an exported reactor future.
#[repr(C)]
#[derive(Debug)]
pub struct FutureVTable {
    /// Checks whether the future is ready. If it is, move-initializes the
    /// value at `out` and returns 1. Otherwise returns 0 and has no effect.
    pub poll: unsafe extern "C" fn(future: *mut c_void, out: *mut c_void) -> c_int,

    /// Arranges for `notifier` to be signalled exactly once, when the future
    /// becomes ready. At most one notifier may be attached per future; the
    /// future takes ownership of it.
    pub attach_notifier: unsafe extern "C" fn(future: *mut c_void, notifier: *const RawNotifier),

    /// Destroys the future. Must be called exactly once per exported future,
    /// whether or not it was polled to completion.
    pub destroy: unsafe extern "C" fn(future: *mut c_void),
}

/// An owned, type-erased reactor future together with its vtable.
#[repr(C)]
#[derive(Debug)]
pub struct RawShardFuture {
    pub ptr: *mut c_void,
    pub vtable: &'static FutureVTable,
}

/// Header of a notifier object owned by the foreign side.
///
/// The reactor only ever sees a pointer to this header, which must be the
/// first field of the `#[repr(C)]` notifier object.
#[repr(C)]
#[derive(Debug)]
pub struct RawNotifier {
    /// Signals the notifier and releases the reactor's ownership of it.
    pub notify: unsafe extern "C" fn(notifier: *const RawNotifier),
    /// Releases the reactor's ownership without signalling.
    pub release: unsafe extern "C" fn(notifier: *const RawNotifier),
}
