//! Core types for Crosspost

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CrosspostError, PlatformError};

/// A target platform
///
/// The set is open: new adapters add variants here.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformName {
    Wordpress,
    Facebook,
    Instagram,
}

impl PlatformName {
    pub const ALL: [PlatformName; 3] = [
        PlatformName::Wordpress,
        PlatformName::Facebook,
        PlatformName::Instagram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wordpress => "wordpress",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
        }
    }

    /// Human-facing name used in summaries
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Wordpress => "WordPress",
            Self::Facebook => "Facebook",
            Self::Instagram => "Instagram",
        }
    }
}

impl fmt::Display for PlatformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformName {
    type Err = CrosspostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wordpress" => Ok(Self::Wordpress),
            "facebook" => Ok(Self::Facebook),
            "instagram" => Ok(Self::Instagram),
            other => Err(CrosspostError::InvalidInput(format!(
                "Unknown platform '{}'. Valid options: wordpress, facebook, instagram",
                other
            ))),
        }
    }
}

/// Parse a comma-separated platform list ("wordpress,facebook")
pub fn parse_platform_list(input: &str) -> crate::Result<BTreeSet<PlatformName>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PlatformName::from_str)
        .collect()
}

/// One piece of content to publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishContent {
    /// Image path or URL
    pub image_ref: String,
    pub caption: String,
}

impl PublishContent {
    pub fn new(image_ref: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            image_ref: image_ref.into(),
            caption: caption.into(),
        }
    }
}

/// Status of a scheduled post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Published,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = CrosspostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CrosspostError::InvalidInput(format!(
                "Invalid status '{}'. Valid options: pending, published, failed, cancelled",
                other
            ))),
        }
    }
}

/// A publish request waiting for its due time
///
/// Posts are never deleted; terminal posts stay in the store as an audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub image_ref: String,
    pub caption: String,
    pub platforms: BTreeSet<PlatformName>,
    pub scheduled_time: DateTime<Utc>,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    /// When a scheduler began publishing this post; `None` unless in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl ScheduledPost {
    /// Create a pending post with a fresh id
    pub fn new(
        content: PublishContent,
        platforms: BTreeSet<PlatformName>,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            image_ref: content.image_ref,
            caption: content.caption,
            platforms,
            scheduled_time,
            status: PostStatus::Pending,
            created_at: Utc::now(),
            claimed_at: None,
        }
    }

    pub fn content(&self) -> PublishContent {
        PublishContent::new(self.image_ref.clone(), self.caption.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.status == PostStatus::Pending
    }

    /// Pending and held by a scheduler that is publishing it
    pub fn is_claimed(&self) -> bool {
        self.is_pending() && self.claimed_at.is_some()
    }
}

/// Why a platform attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Authentication,
    Posting,
    Network,
    RateLimit,
    NotConfigured,
    Panicked,
}

impl FailureKind {
    /// Retrying cannot fix a missing adapter or rejected credentials
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotConfigured | Self::Authentication)
    }
}

/// Result of one publish attempt for one platform, as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub platform: PlatformName,
    pub success: bool,
    pub message: String,
    /// `None` on success
    pub failure: Option<FailureKind>,
}

impl PublishOutcome {
    pub fn success(platform: PlatformName, message: impl Into<String>) -> Self {
        Self {
            platform,
            success: true,
            message: message.into(),
            failure: None,
        }
    }

    pub fn failure(platform: PlatformName, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            platform,
            success: false,
            message: message.into(),
            failure: Some(kind),
        }
    }

    /// Failure for an adapter error, classified by its variant
    pub fn from_error(platform: PlatformName, error: &CrosspostError) -> Self {
        let kind = match error {
            CrosspostError::Platform(e) => e.kind(),
            _ => FailureKind::Posting,
        };
        Self::failure(platform, kind, format!("Error: {}", error))
    }

    pub fn not_configured(platform: PlatformName) -> Self {
        Self::failure(
            platform,
            FailureKind::NotConfigured,
            PlatformError::NotConfigured.to_string(),
        )
    }

    /// False when no adapter exists for the platform
    pub fn configured(&self) -> bool {
        self.failure != Some(FailureKind::NotConfigured)
    }
}

/// Ordered failure reasons, one per failed attempt that was followed by a retry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptRecord(Vec<String>);

impl AttemptRecord {
    pub fn record_failure(&mut self, attempt: u32, reason: &str) {
        self.0.push(format!("attempt {} failed: {}", attempt, reason));
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-platform result returned through a `PublishPort`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformReport {
    pub success: bool,
    pub message: String,
    /// Kind of the final failure; `None` on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub attempts: AttemptRecord,
}

impl From<PublishOutcome> for PlatformReport {
    fn from(outcome: PublishOutcome) -> Self {
        Self {
            success: outcome.success,
            message: outcome.message,
            failure: outcome.failure,
            attempts: AttemptRecord::default(),
        }
    }
}
