use crate::error::AssetError;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the transaction layer and the repair queue.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Longest a `begin` waits for the store lock.
    pub lock_timeout: Duration,
    /// Fixed sleep between repair passes while the index is unhealthy or a
    /// pass made no progress. `None` selects bounded exponential backoff.
    pub repair_backoff: Option<Duration>,
    pub repair_backoff_floor: Duration,
    pub repair_backoff_ceiling: Duration,
    pub probe_timeout: Duration,
    pub lookup_timeout: Duration,
    /// How long `stop` waits for the worker before aborting it.
    pub stop_grace: Duration,
    /// Spill the queue to `spill_dir` once this many requests are pending.
    pub max_pending_repairs: Option<usize>,
    pub spill_dir: Option<PathBuf>,
    /// In private mode only `Pending` records may be created.
    pub private_mode: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            repair_backoff: None,
            repair_backoff_floor: Duration::from_secs(1),
            repair_backoff_ceiling: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            lookup_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(2),
            max_pending_repairs: None,
            spill_dir: None,
            private_mode: false,
        }
    }
}

impl RepositoryConfig {
    /// Durable profile: oversized queues and leftovers at shutdown go to disk.
    pub fn production(spill_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_pending_repairs: Some(1024),
            spill_dir: Some(spill_dir.into()),
            ..Self::default()
        }
    }

    /// Short timeouts and a fast fixed backoff, for local runs and tests.
    pub fn development() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            repair_backoff: Some(Duration::from_millis(20)),
            repair_backoff_floor: Duration::from_millis(10),
            repair_backoff_ceiling: Duration::from_millis(200),
            probe_timeout: Duration::from_millis(500),
            lookup_timeout: Duration::from_millis(500),
            stop_grace: Duration::from_millis(500),
            ..Self::default()
        }
    }

    pub fn with_repair_backoff(mut self, interval: Duration) -> Self {
        self.repair_backoff = Some(interval);
        self
    }

    pub fn with_spill(mut self, dir: impl Into<PathBuf>, max_pending: usize) -> Self {
        self.spill_dir = Some(dir.into());
        self.max_pending_repairs = Some(max_pending);
        self
    }

    pub fn with_private_mode(mut self, private_mode: bool) -> Self {
        self.private_mode = private_mode;
        self
    }

    pub fn validate(&self) -> Result<(), AssetError> {
        if self.lock_timeout.is_zero() {
            return Err(invalid("lock_timeout must be non-zero"));
        }
        if self.probe_timeout.is_zero() || self.lookup_timeout.is_zero() {
            return Err(invalid("probe_timeout and lookup_timeout must be non-zero"));
        }
        if self.repair_backoff.is_some_and(|fixed| fixed.is_zero()) {
            return Err(invalid("repair_backoff must be non-zero when set"));
        }
        if self.repair_backoff_floor.is_zero()
            || self.repair_backoff_floor > self.repair_backoff_ceiling
        {
            return Err(invalid(
                "repair_backoff_floor must be non-zero and not exceed repair_backoff_ceiling",
            ));
        }
        if let Some(max) = self.max_pending_repairs {
            if max == 0 {
                return Err(invalid("max_pending_repairs must be at least 1"));
            }
            if self.spill_dir.is_none() {
                return Err(invalid("max_pending_repairs requires spill_dir"));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> AssetError {
    AssetError::InvalidConfig {
        message: message.to_string(),
    }
}
