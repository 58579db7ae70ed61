use std::io;

use crate::types::ShardId;

/// Errors surfaced by the engine's public API.
///
/// The task adapter never returns these: a submission failure reaching a
/// task is fatal (see [`fatal`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create the poller for shard {shard}")]
    Poller {
        shard: ShardId,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn the worker thread for shard {shard}")]
    SpawnWorker {
        shard: ShardId,
        #[source]
        source: io::Error,
    },

    #[error("invalid engine configuration: {0}")]
    Config(&'static str),

    #[error("shard {shard} does not exist (engine has {count} shards)")]
    NoSuchShard { shard: ShardId, count: usize },

    #[error("not running on a worker of this engine")]
    NotOnWorker,

    #[error("the engine no longer accepts messages")]
    Stopped,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Logs `err` and aborts the process.
///
/// Used where the reactor contract leaves no way to report a failure, e.g. a
/// wake that cannot be delivered to the task's owning shard.
#[cold]
pub(crate) fn fatal(context: &str, err: &dyn std::error::Error) -> ! {
    tracing::error!(error = %err, "{context}");
    std::process::abort()
}
