use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Engine settings.
///
/// ```
/// # use std::time::Duration;
/// # use seam_rt::EngineConfig;
/// let config = EngineConfig::default()
///     .shards(4)
///     .task_quota(Duration::from_micros(250));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of shards, one worker thread each.
    pub shards: usize,
    /// How long a task may run before [`need_preempt`](crate::need_preempt)
    /// starts returning `true`.
    pub task_quota: Duration,
    /// Upper bound on how long an idle worker parks. `None` parks until
    /// notified.
    pub idle_timeout: Option<Duration>,
    /// Worker threads are named `{thread_name}-{shard}`.
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shards: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            task_quota: Duration::from_micros(500),
            idle_timeout: None,
            thread_name: "seam-shard".to_owned(),
        }
    }
}

impl EngineConfig {
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn task_quota(mut self, quota: Duration) -> Self {
        self.task_quota = quota;
        self
    }

    pub fn idle_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.idle_timeout = timeout.into();
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(Error::Config("at least one shard is required"));
        }
        if self.shards > u32::MAX as usize {
            return Err(Error::Config("too many shards"));
        }
        if self.task_quota.is_zero() {
            return Err(Error::Config("task quota must be non-zero"));
        }
        Ok(())
    }
}
