//! seam-iface: Rust futures on top of the seam-rt reactor.
//!
//! Tasks, wakers and imported futures talk to the reactor through its
//! `seam_rt_*` C ABI (see [`ffi`]), so the same reactor can serve code that is
//! not written in Rust. Everything here runs on engine workers: spawned
//! futures stay on the shard they were spawned on and need not be `Send`.
//!
//! # Quick Start
//!
//! ```ignore
//! use seam_iface::{invoke_on_all, AppTemplate};
//!
//! fn main() -> Result<(), seam_iface::Error> {
//!     let mut app = AppTemplate::default();
//!     app.run_void(std::env::args(), async {
//!         let shards = invoke_on_all(|| async { seam_iface::this_shard() })
//!             .await
//!             .map_err(|err| err.to_string())?;
//!         println!("running on {shards:?}");
//!         Ok(())
//!     })
//! }
//! ```

pub mod ffi;

mod api_safety;
mod app;
mod error;
mod future;
mod gate;
mod phased_barrier;
mod preempt;
mod sharded;
mod task;
mod test_runner;
mod waker;

pub use api_safety::{assert_runtime_is_not_running, assert_runtime_is_running, engine_is_ready};
pub use app::{AppOptions, AppTemplate};
pub use error::{BoxError, Error, JoinError, Result};
pub use future::{call_on, ImportedFuture};
pub use gate::{Gate, GateClosed, GateHolder, GenericGateHolder, OwnedGateHolder};
pub use phased_barrier::{Operation, PhasedBarrier};
pub use preempt::{gentle_cleanup, maybe_yield, need_preempt, yield_now, YieldNow};
pub use sharded::{invoke_on_all, shard_count, this_shard, try_invoke_on_all};
pub use task::{spawn, submit_to, JoinHandle};
pub use test_runner::run_test;

pub use seam_rt::{EngineConfig, Foreign, ShardId};
