//! Running a callable on a specific shard from whatever thread we are on.

use crate::error::Result;
use crate::reactor::Reactor;
use crate::types::ShardId;

/// How a callable reaches its target shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Already on the target shard: call directly.
    Inline,
    /// Another worker of the same reactor: intra-pool message.
    Pool,
    /// A thread outside the reactor's worker pool: alien ingress.
    Alien,
}

pub(crate) fn route(current: Option<ShardId>, target: ShardId) -> Route {
    match current {
        Some(shard) if shard == target => Route::Inline,
        Some(_) => Route::Pool,
        None => Route::Alien,
    }
}

/// Runs `f` on `target`, inline if possible.
pub(crate) fn call_on<R, F>(reactor: &R, target: ShardId, f: F) -> Result<()>
where
    R: Reactor,
    F: FnOnce() + Send + 'static,
{
    match route(reactor.current_shard(), target) {
        Route::Inline => {
            f();
            Ok(())
        }
        Route::Pool => reactor.submit_to(target, Box::new(f)),
        Route::Alien => reactor.submit_alien(target, Box::new(f)),
    }
}
