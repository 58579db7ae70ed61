//! C ABI exports for seam-rt.
//!
//! All functions are `#[no_mangle] pub extern "C"` and use only FFI-safe types.
//! Everything that needs an engine resolves it from the calling worker thread.

use std::ffi::{c_int, c_void};

use crate::engine::{self, Handle};
use crate::error::fatal;
use crate::reactor::Reactor;
use crate::task::TaskRef;
use crate::types::{RawPollFn, RawShardFuture, RawSpawnFn, ShardId};

fn current_or_abort(operation: &str) -> Handle {
    match engine::current() {
        Some(handle) => handle,
        None => fatal(operation, &crate::Error::NotOnWorker),
    }
}

// ── Tasks ───────────────────────────────────────────────────────────

/// Build a task for `future` on the calling worker and run it once.
/// Takes ownership of `future`.
#[no_mangle]
pub unsafe extern "C" fn seam_rt_spawn(poll_fn: RawPollFn, future: *mut c_void) {
    current_or_abort("seam_rt_spawn").spawn_local(poll_fn, future);
}

/// On `shard`: `future = spawn_fn(data)`, then build a task for it and run
/// it once. Takes ownership of `data`. Any thread of the engine may call it.
#[no_mangle]
pub unsafe extern "C" fn seam_rt_submit_to(
    poll_fn: RawPollFn,
    spawn_fn: RawSpawnFn,
    data: *mut c_void,
    shard: u32,
) {
    let handle = current_or_abort("seam_rt_submit_to");
    if let Err(err) = handle.spawn_raw_on(ShardId(shard), poll_fn, spawn_fn, data) {
        fatal("seam_rt_submit_to", &err);
    }
}

/// Run `call(data)` on `shard`. On success writes a future to `out` that
/// resolves on the calling shard once the call has returned, and returns 0.
/// On failure returns -1 and leaves `data` with the caller.
#[no_mangle]
pub unsafe extern "C" fn seam_rt_call_on(
    shard: u32,
    call: unsafe extern "C" fn(data: *mut c_void),
    data: *mut c_void,
    out: *mut RawShardFuture,
) -> c_int {
    struct SendPtr(*mut c_void);
    unsafe impl Send for SendPtr {}

    let Some(handle) = engine::current() else {
        return -1;
    };
    let data = SendPtr(data);
    match handle.submit_with_reply(ShardId(shard), move || {
        let data = data;
        unsafe { call(data.0) }
    }) {
        Ok(future) => {
            out.write(future.into_raw());
            0
        }
        Err(err) => {
            tracing::debug!(shard, error = %err, "seam_rt_call_on rejected");
            -1
        }
    }
}

// ── Wakers ──────────────────────────────────────────────────────────
//
// `task` is the identity passed to the poll function. Each function may be
// called from any thread.

/// Take one more reference to `task`.
#[no_mangle]
pub unsafe extern "C" fn seam_rt_waker_clone(task: *mut c_void) {
    TaskRef::<Handle>::from_raw(task).clone_ref();
}

/// Wake `task`, consuming one reference.
#[no_mangle]
pub unsafe extern "C" fn seam_rt_waker_wake(task: *mut c_void) {
    TaskRef::<Handle>::from_raw(task).wake();
}

/// Wake `task` without consuming a reference.
#[no_mangle]
pub unsafe extern "C" fn seam_rt_waker_wake_by_ref(task: *mut c_void) {
    TaskRef::<Handle>::from_raw(task).wake_by_ref();
}

/// Release one reference to `task` without waking it.
#[no_mangle]
pub unsafe extern "C" fn seam_rt_waker_dispose(task: *mut c_void) {
    TaskRef::<Handle>::from_raw(task).dispose();
}

// ── Engine queries ──────────────────────────────────────────────────

/// 1 if the calling thread is a worker of a running engine, 0 otherwise.
#[no_mangle]
pub extern "C" fn seam_rt_engine_is_ready() -> c_int {
    match engine::current() {
        Some(handle) if !handle.is_stopping() => 1,
        _ => 0,
    }
}

/// Shard index of the calling worker, or -1 off the worker pool.
#[no_mangle]
pub extern "C" fn seam_rt_this_shard() -> i64 {
    engine::current()
        .and_then(|handle| handle.current_shard())
        .map_or(-1, |shard| i64::from(shard.0))
}

/// Number of shards of the calling worker's engine, or 0 off the pool.
#[no_mangle]
pub extern "C" fn seam_rt_shard_count() -> u32 {
    engine::current().map_or(0, |handle| handle.shard_count() as u32)
}

/// 1 if the running task has used up its time quota.
#[no_mangle]
pub extern "C" fn seam_rt_need_preempt() -> c_int {
    c_int::from(engine::need_preempt())
}
