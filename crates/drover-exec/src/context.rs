//! Execution context and job configuration.
//!
//! An [`ExecContext`] carries the ambient defaults a scheduler is
//! constructed against: the current worker set and the
//! [`JobConfig`] tuning constants. Individual jobs may override any of
//! them with [`JobOptions`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::worker::Worker;

/// Tuning constants for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Number of tasks a single worker may execute simultaneously.
    /// Invariant: >= 1.
    pub concurrency: usize,
    /// Total number of times a task may be executed before it is
    /// declared terminally failed (generic failures only).
    /// Invariant: >= 1.
    pub attempts: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            attempts: 1,
        }
    }
}

impl JobConfig {
    /// Creates a config with the given concurrency and attempts.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is zero.
    pub fn new(concurrency: usize, attempts: usize) -> Result<Self> {
        let config = Self {
            concurrency,
            attempts,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configured bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is zero.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig {
                message: "concurrency must be at least 1".into(),
            });
        }
        if self.attempts == 0 {
            return Err(Error::InvalidConfig {
                message: "attempts must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Ambient defaults a scheduler is constructed against.
#[derive(Clone)]
pub struct ExecContext {
    workers: Vec<Arc<dyn Worker>>,
    config: JobConfig,
}

impl ExecContext {
    /// Creates a context over the given worker set with default tuning.
    #[must_use]
    pub fn new(workers: Vec<Arc<dyn Worker>>) -> Self {
        Self {
            workers,
            config: JobConfig::default(),
        }
    }

    /// Replaces the default job configuration.
    #[must_use]
    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    /// The context's current worker set.
    #[must_use]
    pub fn workers(&self) -> &[Arc<dyn Worker>] {
        &self.workers
    }

    /// The context's default job configuration.
    #[must_use]
    pub const fn config(&self) -> JobConfig {
        self.config
    }
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("workers", &self.workers.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Per-job overrides of the context defaults.
///
/// Every field defaults to "use the context value".
#[derive(Default)]
pub struct JobOptions {
    /// Workers to execute on instead of the context's set.
    pub workers: Option<Vec<Arc<dyn Worker>>>,
    /// Per-worker concurrency override.
    pub concurrency: Option<usize>,
    /// Attempt-bound override.
    pub attempts: Option<usize>,
}

impl JobOptions {
    /// Creates empty options (all context defaults apply).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the worker set for this job.
    #[must_use]
    pub fn with_workers(mut self, workers: Vec<Arc<dyn Worker>>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Overrides the per-worker concurrency for this job.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Overrides the attempt bound for this job.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Resolves the effective configuration against context defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a resolved bound is zero.
    pub fn resolve(&self, ctx: &ExecContext) -> Result<JobConfig> {
        JobConfig::new(
            self.concurrency.unwrap_or(ctx.config().concurrency),
            self.attempts.unwrap_or(ctx.config().attempts),
        )
    }
}

impl std::fmt::Debug for JobOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOptions")
            .field("workers", &self.workers.as_ref().map(Vec::len))
            .field("concurrency", &self.concurrency)
            .field("attempts", &self.attempts)
            .finish()
    }
}
