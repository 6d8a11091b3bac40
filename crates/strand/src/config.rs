//! Scheduler configuration
//!
//! Values come from the builder methods on [`SchedulerConfig`], or from the
//! environment through [`SchedulerConfig::from_env`]:
//!
//! | Variable            | Meaning                                  |
//! |---------------------|------------------------------------------|
//! | `STRAND_WORKERS`    | worker thread count (0 = one per CPU)    |
//! | `STRAND_STACK_SIZE` | default task stack size in bytes         |

use tracing::warn;

/// Default stack size of a task (256 KiB)
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack a task may be given
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Upper bound on worker threads: one bit per worker in an affinity mask
pub const MAX_WORKERS: usize = u64::BITS as usize;

/// Environment variable overriding the worker count
pub const ENV_WORKERS: &str = "STRAND_WORKERS";

/// Environment variable overriding the default task stack size
pub const ENV_STACK_SIZE: &str = "STRAND_STACK_SIZE";

/// Configuration for a [`Scheduler`](crate::Scheduler)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads (0 = one per CPU)
    pub worker_count: usize,

    /// Default stack size for spawned tasks, in bytes
    pub stack_size: usize,

    /// Prefix of worker thread names; the worker id is appended
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "strand-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker thread count (0 = one per CPU)
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the default task stack size
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Set the worker thread name prefix
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Build a configuration from `STRAND_*` environment variables
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(count) = parse_var(&lookup, ENV_WORKERS) {
            config.worker_count = count;
        }
        if let Some(bytes) = parse_var(&lookup, ENV_STACK_SIZE) {
            config.stack_size = bytes;
        }
        config
    }

    /// Worker count after resolving 0 to the CPU count and capping at [`MAX_WORKERS`]
    pub fn resolved_worker_count(&self) -> usize {
        let count = if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        };
        count.clamp(1, MAX_WORKERS)
    }

    /// Stack size after applying [`MIN_STACK_SIZE`]
    pub fn resolved_stack_size(&self) -> usize {
        self.stack_size.max(MIN_STACK_SIZE)
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(variable = key, value = %raw, error = %e, "ignoring invalid environment override");
            None
        }
    }
}
