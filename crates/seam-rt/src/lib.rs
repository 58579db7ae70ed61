//! seam-rt: a sharded reactor that drives foreign futures.
//!
//! The reactor runs one worker thread per shard. Foreign futures are handed
//! over through the C ABI in `ffi.rs` as a poll function plus an opaque
//! handle; each becomes a task owned by one shard and is polled there until
//! it reports completion. Wakers for a task may be used from any thread:
//! wake-ups are relayed to the owning shard.
//!
//! Built as a cdylib for foreign hosts and as an rlib for `seam-iface`, which
//! provides the safe Rust-future side on top of the C ABI.

mod config;
mod dispatch;
pub mod engine;
mod error;
mod ffi;
mod foreign;
pub mod promise;
mod reactor;
#[cfg(test)]
mod sim;
mod task;
mod types;

pub use config::EngineConfig;
pub use engine::{current, need_preempt, this_shard, Engine, EngineId, Handle};
pub use error::{Error, Result};
pub use foreign::Foreign;
pub use promise::{Promise, ShardFuture};
pub use reactor::{Message, Reactor, Runnable};
pub use types::{FutureVTable, RawNotifier, RawPollFn, RawShardFuture, RawSpawnFn, ShardId};
