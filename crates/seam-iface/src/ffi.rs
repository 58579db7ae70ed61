//! FFI declarations for the seam-rt C ABI.
//!
//! These mirror the exports in `seam-rt/src/ffi.rs` exactly. The symbols are
//! resolved against the seam-rt library this crate links.

use std::ffi::{c_int, c_void};

use seam_rt::{RawPollFn, RawShardFuture, RawSpawnFn};

extern "C" {
    // ── Tasks ───────────────────────────────────────────────────────

    /// Build a task for `future` on the calling worker and run it once.
    pub fn seam_rt_spawn(poll_fn: RawPollFn, future: *mut c_void);

    /// Build `spawn_fn(data)` on `shard` and run it there as a task.
    pub fn seam_rt_submit_to(
        poll_fn: RawPollFn,
        spawn_fn: RawSpawnFn,
        data: *mut c_void,
        shard: u32,
    );

    /// Run `call(data)` on `shard`; `out` receives a future that resolves on
    /// the calling shard afterwards. Returns 0=ok, -1=rejected.
    pub fn seam_rt_call_on(
        shard: u32,
        call: unsafe extern "C" fn(data: *mut c_void),
        data: *mut c_void,
        out: *mut RawShardFuture,
    ) -> c_int;

    // ── Wakers ──────────────────────────────────────────────────────

    pub fn seam_rt_waker_clone(task: *mut c_void);
    pub fn seam_rt_waker_wake(task: *mut c_void);
    pub fn seam_rt_waker_wake_by_ref(task: *mut c_void);
    pub fn seam_rt_waker_dispose(task: *mut c_void);

    // ── Engine queries ──────────────────────────────────────────────

    /// 1 on a worker of a running engine, 0 otherwise.
    pub fn seam_rt_engine_is_ready() -> c_int;

    /// Shard of the calling worker, -1 off the pool.
    pub fn seam_rt_this_shard() -> i64;

    /// Shard count of the calling worker's engine, 0 off the pool.
    pub fn seam_rt_shard_count() -> u32;

    /// 1 if the running task has used up its time quota.
    pub fn seam_rt_need_preempt() -> c_int;
}
