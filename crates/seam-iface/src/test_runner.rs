//! Running async tests on a shared engine.
//!
//! The first [`run_test`] starts an engine for the whole test binary; it is
//! stopped when the process exits. Engine options come from the `SEAM_*`
//! environment variables, as for applications.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};

use clap::Parser;
use futures::channel::oneshot;
use futures::FutureExt;
use seam_rt::{Engine, EngineConfig, Handle, ShardId};

use crate::app::AppOptions;

static ENGINE: Mutex<Option<Engine>> = Mutex::new(None);

fn shared_handle() -> Handle {
    let mut engine = ENGINE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(engine) = engine.as_ref() {
        return engine.handle().clone();
    }

    let options = AppOptions::try_parse_from(["seam-test"]).unwrap_or_default();
    let config = options.apply(EngineConfig::default());
    let started = match Engine::start(config) {
        Ok(started) => started,
        Err(err) => panic!("failed to start the test engine: {err}"),
    };
    let handle = started.handle().clone();
    *engine = Some(started);
    unsafe {
        libc::atexit(stop_engine);
    }
    handle
}

extern "C" fn stop_engine() {
    let engine = ENGINE.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(engine) = engine {
        engine.shutdown();
    }
}

/// Runs the future built by `test` on shard 0 of the shared test engine and
/// blocks until it finishes. A panic in the test is resumed on the caller.
///
/// ```ignore
/// #[test]
/// fn spawns() {
///     run_test(|| async {
///         assert_eq!(seam_iface::spawn(async { 1 }).await.unwrap(), 1);
///     });
/// }
/// ```
pub fn run_test<T, F>(test: T)
where
    T: FnOnce() -> F + Send + 'static,
    F: Future<Output = ()> + 'static,
{
    let handle = shared_handle();
    let (tx, rx) = oneshot::channel();

    let submitted = handle.run_on(ShardId(0), move || {
        drop(crate::spawn(async move {
            let outcome = AssertUnwindSafe(async move { test().await })
                .catch_unwind()
                .await;
            let _ = tx.send(outcome);
        }));
    });
    if let Err(err) = submitted {
        panic!("failed to submit the test: {err}");
    }

    match futures::executor::block_on(rx) {
        Ok(Ok(())) => {}
        Ok(Err(payload)) => panic::resume_unwind(payload),
        Err(oneshot::Canceled) => panic!("the test task was dropped before it finished"),
    }
}
