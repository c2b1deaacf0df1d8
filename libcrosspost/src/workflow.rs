//! Retry workflow: adaptation plus bounded retry over the orchestrator
//!
//! Each platform runs its own sequence of attempts. Before every attempt the
//! content is adapted for that platform; failures are recorded and retried
//! after a delay that grows by `backoff_multiplier` each time. A platform with
//! no adapter, or one that rejected the credentials, is never retried.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::adapt::ContentAdapter;
use crate::poster::{Orchestrator, PublishPort};
use crate::types::{AttemptRecord, FailureKind, PlatformName, PlatformReport, PublishContent};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per platform, including the first
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            backoff_multiplier: 1.0,
        }
    }
}

impl RetryConfig {
    /// Delay after failed attempt `attempt` (1-based): `retry_delay * multiplier^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let secs = self.retry_delay.as_secs_f64() * factor;
        if secs.is_finite() {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }
}

pub struct RetryWorkflow {
    orchestrator: Arc<Orchestrator>,
    adapter: ContentAdapter,
    config: RetryConfig,
}

impl RetryWorkflow {
    pub fn new(orchestrator: Arc<Orchestrator>, adapter: ContentAdapter, config: RetryConfig) -> Self {
        Self {
            orchestrator,
            adapter,
            config,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run every platform's retry sequence concurrently
    pub async fn execute(
        &self,
        content: &PublishContent,
        platforms: &BTreeSet<PlatformName>,
    ) -> BTreeMap<PlatformName, PlatformReport> {
        let sequences = platforms.iter().map(|&platform| async move {
            (platform, self.run_platform(platform, content).await)
        });
        futures::future::join_all(sequences)
            .await
            .into_iter()
            .collect()
    }

    async fn run_platform(&self, platform: PlatformName, content: &PublishContent) -> PlatformReport {
        let max_attempts = self.config.max_attempts.max(1);
        let target = BTreeSet::from([platform]);
        let mut attempts = AttemptRecord::default();
        let mut attempt = 1;

        loop {
            let adapted = self.adapter.adapt(platform, content).await;
            let outcome = self
                .orchestrator
                .publish(&target, &adapted)
                .await
                .remove(&platform);

            let outcome = match outcome {
                Some(outcome) => outcome,
                None => {
                    return PlatformReport {
                        success: false,
                        message: "Error: no outcome returned".to_string(),
                        failure: Some(FailureKind::Posting),
                        attempts,
                    }
                }
            };

            if outcome.success {
                if attempt > 1 {
                    info!("Published to {} on attempt {}", platform, attempt);
                }
                return PlatformReport {
                    success: true,
                    message: outcome.message,
                    failure: None,
                    attempts,
                };
            }

            if outcome.failure.map_or(false, |kind| !kind.is_retryable()) {
                return PlatformReport {
                    success: false,
                    message: outcome.message,
                    failure: outcome.failure,
                    attempts,
                };
            }

            if attempt >= max_attempts {
                warn!(
                    "Giving up on {} after {} attempts: {}",
                    platform, max_attempts, outcome.message
                );
                return PlatformReport {
                    success: false,
                    message: format!("Failed after {} attempts: {}", max_attempts, outcome.message),
                    failure: outcome.failure,
                    attempts,
                };
            }

            attempts.record_failure(attempt, &outcome.message);
            let delay = self.config.delay_for(attempt);
            warn!(
                "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                attempt, max_attempts, platform, outcome.message, delay
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl PublishPort for RetryWorkflow {
    async fn publish(
        &self,
        content: &PublishContent,
        platforms: &BTreeSet<PlatformName>,
    ) -> BTreeMap<PlatformName, PlatformReport> {
        self.execute(content, platforms).await
    }
}
