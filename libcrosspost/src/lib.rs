//! Crosspost - publish one image and caption to several platforms
//!
//! The library is layered: platform adapters perform single attempts, the
//! [`Orchestrator`] fans out over a bounded worker pool, the [`RetryWorkflow`]
//! adds per-platform adaptation and retry, and the [`Scheduler`] fires durable
//! scheduled posts through a [`PublishPort`].

pub mod adapt;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod images;
pub mod logging;
pub mod platforms;
pub mod pool;
pub mod poster;
pub mod scheduler;
pub mod scheduling;
pub mod templates;
pub mod types;
pub mod workflow;

// Re-export commonly used types
pub use adapt::{ContentAdapter, PlatformProfile};
pub use config::Config;
pub use db::Database;
pub use error::{CrosspostError, Result};
pub use poster::{Orchestrator, PublishPort};
pub use scheduler::{QueueStats, Scheduler};
pub use templates::TemplateSet;
pub use types::{
    AttemptRecord, PlatformName, PlatformReport, PostStatus, PublishContent, PublishOutcome,
    ScheduledPost,
};
pub use workflow::{RetryConfig, RetryWorkflow};

use std::sync::Arc;

use images::{CommandResizer, ImageResizer, NoResize};

/// Build the content adapter described by the configuration
pub fn content_adapter(config: &Config) -> Result<ContentAdapter> {
    let resizer: Arc<dyn ImageResizer> = match &config.images.resize_command {
        Some(command) => Arc::new(CommandResizer::new(command.clone())?),
        None => Arc::new(NoResize),
    };
    Ok(PlatformName::ALL
        .into_iter()
        .fold(ContentAdapter::new(resizer), |adapter, platform| {
            adapter.with_profile(platform, config.profile(platform))
        }))
}

/// Build the full publish stack: adapters, worker pool, adaptation and retry
///
/// Must be called from within a Tokio runtime.
pub fn build_workflow(config: &Config) -> Result<RetryWorkflow> {
    let orchestrator = Arc::new(Orchestrator::from_config(config)?);
    Ok(RetryWorkflow::new(
        orchestrator,
        content_adapter(config)?,
        config.publishing.retry_config(),
    ))
}
