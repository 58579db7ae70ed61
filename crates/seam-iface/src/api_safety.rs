use crate::ffi;

/// Whether the calling thread is a worker of a running engine.
pub fn engine_is_ready() -> bool {
    unsafe { ffi::seam_rt_engine_is_ready() != 0 }
}

/// Guard for functions that need an engine.
///
/// # Panics
///
/// When called outside an engine worker.
#[track_caller]
pub fn assert_runtime_is_running() {
    if !engine_is_ready() {
        panic!("attempted to call a runtime-dependent function outside of an engine worker");
    }
}

/// Guard for entry points like [`AppTemplate::run_void`](crate::AppTemplate::run_void)
/// that start an engine and block on it.
///
/// # Panics
///
/// When called on an engine worker.
#[track_caller]
pub fn assert_runtime_is_not_running() {
    if engine_is_ready() {
        panic!("attempted to block an engine worker on a nested engine");
    }
}
