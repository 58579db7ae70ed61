//! Shard topology and fan-out over every shard.

use std::future::Future;

use futures::future;
use seam_rt::ShardId;

use crate::error::JoinError;
use crate::{ffi, submit_to};

/// Number of shards of the engine the calling thread works for; 0 outside
/// an engine.
pub fn shard_count() -> usize {
    unsafe { ffi::seam_rt_shard_count() as usize }
}

/// The shard the calling thread runs, if it is an engine worker.
pub fn this_shard() -> Option<ShardId> {
    let shard = unsafe { ffi::seam_rt_this_shard() };
    u32::try_from(shard).ok().map(ShardId)
}

/// Runs `f` on every shard and collects the results in shard order.
///
/// Waits for every shard, then returns the first error in shard order. A
/// task that fails to complete becomes an error through `From<JoinError>`.
pub async fn try_invoke_on_all<Func, Fut, Ret, E>(f: Func) -> Result<Vec<Ret>, E>
where
    Func: FnOnce() -> Fut + Send + Clone + 'static,
    Fut: Future<Output = Result<Ret, E>> + 'static,
    Ret: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    let handles: Vec<_> = (0..shard_count() as u32)
        .map(|shard| submit_to(ShardId(shard), f.clone()))
        .collect();

    // Submitted tasks make progress on their own; awaiting them all keeps
    // none running past an early return.
    let mut results = Vec::with_capacity(handles.len());
    let mut first_err = None;
    for outcome in future::join_all(handles).await {
        match outcome.map_err(E::from).and_then(|r| r) {
            Ok(value) => results.push(value),
            Err(err) => {
                first_err.get_or_insert(err);
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

/// Runs `f` on every shard and collects the results in shard order.
pub async fn invoke_on_all<Func, Fut, Ret>(f: Func) -> Result<Vec<Ret>, JoinError>
where
    Func: FnOnce() -> Fut + Send + Clone + 'static,
    Fut: Future<Output = Ret> + 'static,
    Ret: Send + 'static,
{
    try_invoke_on_all(move || {
        let fut = f();
        async move { Ok::<_, JoinError>(fut.await) }
    })
    .await
}
