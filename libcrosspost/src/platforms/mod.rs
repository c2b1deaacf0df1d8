//! Platform adapter abstraction and implementations
//!
//! An adapter performs exactly one publish attempt against one platform. Retry,
//! adaptation and concurrency all live above this layer, so adapters stay small.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::platforms::{command::CommandAdapter, PlatformAdapter};
//! use libcrosspost::types::{PlatformName, PublishContent};
//!
//! # async fn example() -> libcrosspost::Result<()> {
//! let adapter = CommandAdapter::new(
//!     PlatformName::Wordpress,
//!     vec!["wp-share".into(), "{image}".into(), "{caption}".into()],
//! )?;
//!
//! let message = adapter
//!     .share(&PublishContent::new("photo.jpg", "Hello from crosspost"))
//!     .await?;
//! println!("{}", message);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::Result;
use crate::types::{PlatformName, PublishContent};

pub mod command;

// Mock adapter is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Capability interface for one platform
///
/// `Ok(message)` means the content was published; any `Err` is a failed
/// attempt. Adapters must not retry internally.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Publish the content once
    ///
    /// # Errors
    ///
    /// Returns a `PlatformError` describing why the platform rejected or never
    /// received the post.
    async fn share(&self, content: &PublishContent) -> Result<String>;

    /// The platform this adapter serves
    fn platform(&self) -> PlatformName;

    /// Check that the platform is reachable with the current settings
    ///
    /// The default assumes a configured adapter is usable.
    async fn test_connection(&self) -> Result<String> {
        Ok(format!("{} adapter configured", self.platform().display_name()))
    }
}

/// Adapters keyed by platform; a missing key means "not configured"
pub type AdapterMap = BTreeMap<PlatformName, Arc<dyn PlatformAdapter>>;

/// Build adapters for every enabled platform in the configuration
///
/// Disabled and absent platforms are simply left out.
pub fn create_adapters(config: &Config) -> Result<AdapterMap> {
    let mut adapters: AdapterMap = BTreeMap::new();

    for (platform, platform_config) in &config.platforms {
        if !platform_config.enabled {
            tracing::debug!("Platform {} is disabled, skipping", platform);
            continue;
        }

        tracing::info!("Creating {} adapter", platform);
        let adapter = command::CommandAdapter::new(*platform, platform_config.command.clone())?;
        adapters.insert(*platform, Arc::new(adapter));
    }

    if adapters.is_empty() {
        tracing::warn!("No platforms are enabled in configuration");
    } else {
        tracing::info!("Created {} platform adapter(s)", adapters.len());
    }

    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformConfig;

    fn platform_config(enabled: bool) -> PlatformConfig {
        PlatformConfig {
            enabled,
            command: vec!["echo".to_string(), "{caption}".to_string()],
            max_caption_length: None,
            max_hashtags: None,
            max_image_dimension: None,
        }
    }

    #[test]
    fn test_create_adapters_no_platforms() {
        let adapters = create_adapters(&Config::default_config()).unwrap();
        assert!(adapters.is_empty());
    }

    #[test]
    fn test_create_adapters_skips_disabled() {
        let mut config = Config::default_config();
        config
            .platforms
            .insert(PlatformName::Wordpress, platform_config(true));
        config
            .platforms
            .insert(PlatformName::Facebook, platform_config(false));

        let adapters = create_adapters(&config).unwrap();
        assert_eq!(adapters.len(), 1);
        assert!(adapters.contains_key(&PlatformName::Wordpress));
        assert_eq!(
            adapters[&PlatformName::Wordpress].platform(),
            PlatformName::Wordpress
        );
    }
}
