//! Application entry points: parse arguments, start an engine, run the main
//! future on shard 0, stop the engine.

use std::ffi::OsString;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use clap::Parser;
use futures::channel::oneshot;
use futures::FutureExt;
use seam_rt::{Engine, EngineConfig, ShardId};

use crate::api_safety;
use crate::error::{BoxError, Error, Result};

/// Engine options every application accepts.
#[derive(Debug, Clone, Default, Parser)]
#[command(about = None, long_about = None)]
pub struct AppOptions {
    /// Number of shards (worker threads).
    #[arg(long, env = "SEAM_SMP")]
    pub smp: Option<usize>,

    /// Task quota in microseconds; longer-running tasks are asked to yield.
    #[arg(long = "task-quota-us", env = "SEAM_TASK_QUOTA_US")]
    pub task_quota_us: Option<u64>,
}

impl AppOptions {
    /// Applies the options on top of `config`.
    pub fn apply(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(smp) = self.smp {
            config = config.shards(smp);
        }
        if let Some(us) = self.task_quota_us {
            config = config.task_quota(Duration::from_micros(us));
        }
        config
    }
}

/// Runs an application's main future on a fresh engine.
#[derive(Debug, Clone, Default)]
pub struct AppTemplate {
    config: EngineConfig,
}

impl AppTemplate {
    /// Uses `config` as the base that command-line options override.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `main` to completion. `args` are parsed like `std::env::args()`:
    /// the first item is the program name.
    ///
    /// Panics in `main` are resumed on the calling thread once the engine has
    /// stopped.
    pub fn run_void<I, T, Fut>(&mut self, args: I, main: Fut) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.run(args, main)
    }

    /// Like [`run_void`](Self::run_void), returning the main future's exit
    /// code.
    pub fn run_int<I, T, Fut>(&mut self, args: I, main: Fut) -> Result<i32>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
        Fut: Future<Output = Result<i32, BoxError>> + Send + 'static,
    {
        self.run(args, main)
    }

    fn run<I, T, Fut, R>(&mut self, args: I, main: Fut) -> Result<R>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
        R: Send + 'static,
    {
        api_safety::assert_runtime_is_not_running();

        let options = AppOptions::try_parse_from(args)?;
        let config = options.apply(self.config.clone());
        tracing::debug!(shards = config.shards, quota = ?config.task_quota, "starting application");
        let engine = Engine::start(config)?;

        let (tx, rx) = oneshot::channel();
        let submitted = engine.handle().run_on(ShardId(0), move || {
            drop(crate::spawn(async move {
                let outcome = AssertUnwindSafe(main).catch_unwind().await;
                let _ = tx.send(outcome);
            }));
        });
        if let Err(err) = submitted {
            engine.shutdown();
            return Err(err.into());
        }

        let outcome = futures::executor::block_on(rx);
        engine.shutdown();

        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(Error::App(err)),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(oneshot::Canceled) => Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_the_base_config() {
        let options =
            AppOptions::try_parse_from(["app", "--smp", "3", "--task-quota-us", "250"]).unwrap();
        let config = options.apply(EngineConfig::default().shards(8));
        assert_eq!(config.shards, 3);
        assert_eq!(config.task_quota, Duration::from_micros(250));
    }

    #[test]
    fn absent_options_keep_the_base_config() {
        let options = AppOptions {
            smp: None,
            task_quota_us: None,
        };
        let base = EngineConfig::default().shards(2);
        assert_eq!(options.apply(base.clone()), base);
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        let mut app = AppTemplate::default();
        let err = app.run_void(["app", "--bogus"], async { Ok(()) }).unwrap_err();
        assert!(matches!(err, Error::Args(_)));
    }
}
