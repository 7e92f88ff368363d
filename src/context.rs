//! Per-operation deadline and concurrency primitives.
//!
//! Design Note (§9): "replace [process-global appliance selection] with an
//! explicit `RequestContext` value passed through every operation; never use
//! process-global state." [`Deadline`] is that value for cancellation;
//! [`ConcurrencyLimiter`] enforces the soft/hard caps from §5.

use crate::config::CoreConfig;
use crate::error::CoreError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A caller-supplied (or default) expiry instant for one public operation.
///
/// Every public core operation accepts one of these; deadline expiry
/// propagates to all in-flight HTTP calls for that operation (§5).
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
        }
    }

    /// Build a deadline from the config's default operation timeout.
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::after(config.default_deadline)
    }

    /// Remaining time budget, or `Duration::ZERO` if already expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Return `Err(Timeout)` if the deadline has already passed.
    pub fn check(&self, op: &str) -> Result<(), CoreError> {
        if self.is_expired() {
            Err(CoreError::Timeout(format!(
                "deadline exceeded before/during `{op}`"
            )))
        } else {
            Ok(())
        }
    }

    /// Race an async operation against this deadline.
    pub async fn race<T, F>(&self, op: &str, fut: F) -> Result<T, CoreError>
    where
        F: std::future::Future<Output = Result<T, CoreError>>,
    {
        match tokio::time::timeout(self.remaining(), fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout(format!(
                "deadline exceeded while waiting on `{op}`"
            ))),
        }
    }
}

/// Enforces the §5 bounded-concurrency model: a soft per-appliance cap and a
/// hard global cap, both configuration-driven.
pub struct ConcurrencyLimiter {
    global: Arc<Semaphore>,
    per_appliance: Mutex<HashMap<String, Arc<Semaphore>>>,
    per_appliance_capacity: usize,
}

/// Holds both permits for the lifetime of one in-flight request.
pub struct ConcurrencyPermit {
    _global: OwnedSemaphorePermit,
    _appliance: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            global: Arc::new(Semaphore::new(config.global_concurrency)),
            per_appliance: Mutex::new(HashMap::new()),
            per_appliance_capacity: config.per_appliance_concurrency,
        }
    }

    fn appliance_semaphore(&self, appliance_id: &str) -> Arc<Semaphore> {
        let mut guard = self.per_appliance.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(appliance_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_appliance_capacity)))
            .clone()
    }

    /// Acquire one global + one per-appliance permit, honoring `deadline`.
    pub async fn acquire(
        &self,
        appliance_id: &str,
        deadline: &Deadline,
    ) -> Result<ConcurrencyPermit, CoreError> {
        let appliance_sem = self.appliance_semaphore(appliance_id);
        let global = deadline
            .race(
                "acquire global concurrency permit",
                acquire_owned(self.global.clone()),
            )
            .await?;
        let appliance = deadline
            .race(
                "acquire per-appliance concurrency permit",
                acquire_owned(appliance_sem),
            )
            .await?;
        Ok(ConcurrencyPermit {
            _global: global,
            _appliance: appliance,
        })
    }
}

async fn acquire_owned(sem: Arc<Semaphore>) -> Result<OwnedSemaphorePermit, CoreError> {
    sem.acquire_owned()
        .await
        .map_err(|_| CoreError::ProtocolError("concurrency semaphore closed".to_string()))
}
