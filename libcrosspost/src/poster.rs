//! Multi-platform publish orchestration
//!
//! This module fans one piece of content out to every requested platform over a
//! bounded worker pool and collects exactly one outcome per platform. Adapter
//! errors and panics become failed outcomes; nothing propagates to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{CrosspostError, PlatformError, Result};
use crate::platforms::{create_adapters, AdapterMap};
use crate::pool::{TaskPanic, WorkerPool};
use crate::types::{FailureKind, PlatformName, PlatformReport, PublishContent, PublishOutcome};

/// Anything that can publish content and report per platform
///
/// The scheduler fires jobs through this seam, normally backed by
/// [`RetryWorkflow`](crate::workflow::RetryWorkflow).
#[async_trait]
pub trait PublishPort: Send + Sync {
    async fn publish(
        &self,
        content: &PublishContent,
        platforms: &BTreeSet<PlatformName>,
    ) -> BTreeMap<PlatformName, PlatformReport>;
}

/// Concurrent fan-out over the configured platform adapters
pub struct Orchestrator {
    adapters: AdapterMap,
    pool: WorkerPool,
}

impl Orchestrator {
    /// Create an orchestrator over `adapters` with a pool of `max_workers`
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use std::collections::BTreeMap;
    /// use libcrosspost::platforms::{mock::MockAdapter, AdapterMap};
    /// use libcrosspost::poster::Orchestrator;
    /// use libcrosspost::types::PlatformName;
    ///
    /// # async fn example() {
    /// let mut adapters: AdapterMap = BTreeMap::new();
    /// adapters.insert(
    ///     PlatformName::Wordpress,
    ///     Arc::new(MockAdapter::success(PlatformName::Wordpress)),
    /// );
    /// let orchestrator = Orchestrator::new(adapters, 3, 32);
    /// # }
    /// ```
    pub fn new(adapters: AdapterMap, max_workers: usize, queue_capacity: usize) -> Self {
        Self {
            adapters,
            pool: WorkerPool::new(max_workers, queue_capacity),
        }
    }

    /// Build adapters and the worker pool from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let adapters = create_adapters(config)?;
        Ok(Self::new(
            adapters,
            config.publishing.max_workers,
            config.publishing.queue_capacity,
        ))
    }

    /// Publish `content` to every platform in `platforms`
    ///
    /// Returns once every dispatched attempt has finished, with exactly one
    /// outcome per requested platform.
    pub async fn publish(
        &self,
        platforms: &BTreeSet<PlatformName>,
        content: &PublishContent,
    ) -> BTreeMap<PlatformName, PublishOutcome> {
        let mut outcomes = BTreeMap::new();
        let mut pending = Vec::new();

        for &platform in platforms {
            let Some(adapter) = self.adapters.get(&platform) else {
                outcomes.insert(platform, PublishOutcome::not_configured(platform));
                continue;
            };

            let adapter = Arc::clone(adapter);
            let content = content.clone();
            match self
                .pool
                .submit(async move { adapter.share(&content).await })
                .await
            {
                Ok(receiver) => pending.push((platform, receiver)),
                Err(_) => {
                    outcomes.insert(
                        platform,
                        PublishOutcome::failure(
                            platform,
                            FailureKind::Posting,
                            "Error: worker pool is closed",
                        ),
                    );
                }
            }
        }

        for (platform, receiver) in pending {
            let outcome = match receiver.await {
                Ok(Ok(Ok(message))) => {
                    info!("Published to {}", platform);
                    PublishOutcome::success(platform, message)
                }
                Ok(Ok(Err(e))) => {
                    warn!("Failed to publish to {}: {}", platform, e);
                    PublishOutcome::from_error(platform, &e)
                }
                Ok(Err(TaskPanic(message))) => {
                    warn!("Adapter for {} panicked: {}", platform, message);
                    let e = CrosspostError::from(PlatformError::Panicked(message));
                    PublishOutcome::from_error(platform, &e)
                }
                Err(_) => PublishOutcome::failure(
                    platform,
                    FailureKind::Posting,
                    "Error: worker dropped the task",
                ),
            };
            outcomes.insert(platform, outcome);
        }

        outcomes
    }

    /// Call `test_connection` on every configured adapter
    pub async fn test_connections(&self) -> BTreeMap<PlatformName, (bool, String)> {
        let checks = self.adapters.iter().map(|(platform, adapter)| async move {
            let result = match adapter.test_connection().await {
                Ok(message) => (true, message),
                Err(e) => (false, format!("Error: {}", e)),
            };
            (*platform, result)
        });
        futures::future::join_all(checks).await.into_iter().collect()
    }

    /// Stop the worker pool once queued attempts finish
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

#[async_trait]
impl PublishPort for Orchestrator {
    async fn publish(
        &self,
        content: &PublishContent,
        platforms: &BTreeSet<PlatformName>,
    ) -> BTreeMap<PlatformName, PlatformReport> {
        Orchestrator::publish(self, platforms, content)
            .await
            .into_iter()
            .map(|(platform, outcome)| (platform, outcome.into()))
            .collect()
    }
}

/// Human-readable summary: successes, failures, then one line per platform
pub fn get_summary<'a, I>(results: I) -> String
where
    I: IntoIterator<Item = (PlatformName, bool, &'a str)>,
{
    let results: Vec<_> = results.into_iter().collect();
    let names = |wanted: bool| {
        results
            .iter()
            .filter(|(_, success, _)| *success == wanted)
            .map(|(platform, _, _)| platform.display_name())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut parts = Vec::new();
    let successful = names(true);
    if !successful.is_empty() {
        parts.push(format!("✅ Successfully posted to: {}", successful));
    }
    let failed = names(false);
    if !failed.is_empty() {
        parts.push(format!("❌ Failed to post to: {}", failed));
    }
    for (platform, success, message) in &results {
        let mark = if *success { "✅" } else { "❌" };
        parts.push(format!("\n{} {}: {}", mark, platform.display_name(), message));
    }
    parts.join("\n")
}

/// Summary of publish-port reports
pub fn summarize_reports(reports: &BTreeMap<PlatformName, PlatformReport>) -> String {
    get_summary(
        reports
            .iter()
            .map(|(p, r)| (*p, r.success, r.message.as_str())),
    )
}
