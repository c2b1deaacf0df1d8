//! Platform-specific content adaptation
//!
//! Caption rules are pure functions. Image adaptation goes through an
//! [`ImageResizer`] and falls back to the original image on any failure, so
//! adaptation can never block a publish.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::images::ImageResizer;
use crate::types::{PlatformName, PublishContent};

const ELLIPSIS: &str = "...";

/// Limits a platform imposes on content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformProfile {
    /// Maximum caption length in characters
    pub max_caption_length: Option<usize>,
    pub max_hashtags: Option<usize>,
    /// Longest allowed image edge in pixels
    pub max_image_dimension: Option<u32>,
}

impl PlatformProfile {
    /// Built-in limits
    pub fn for_platform(platform: PlatformName) -> Self {
        match platform {
            PlatformName::Instagram => Self {
                max_caption_length: Some(2200),
                max_hashtags: Some(30),
                max_image_dimension: Some(1080),
            },
            PlatformName::Facebook => Self {
                max_caption_length: Some(63206),
                max_hashtags: None,
                max_image_dimension: Some(2048),
            },
            PlatformName::Wordpress => Self::default(),
        }
    }
}

/// Apply the hashtag cap, then the length limit
pub fn adapt_caption(caption: &str, profile: &PlatformProfile) -> String {
    let trimmed = match profile.max_hashtags {
        Some(max) => limit_hashtags(caption, max),
        None => caption.to_string(),
    };
    match profile.max_caption_length {
        Some(max) => truncate_caption(&trimmed, max),
        None => trimmed,
    }
}

/// Keep the first `max` hashtag tokens and drop later ones
///
/// Non-hashtag tokens keep their order and their line. Whitespace inside a
/// line is normalised to single spaces only on lines that lost a tag.
pub fn limit_hashtags(caption: &str, max: usize) -> String {
    let mut seen = 0usize;
    caption
        .split('\n')
        .map(|line| {
            let mut dropped = false;
            let kept: Vec<&str> = line
                .split_whitespace()
                .filter(|token| {
                    if !token.starts_with('#') {
                        return true;
                    }
                    seen += 1;
                    if seen <= max {
                        true
                    } else {
                        dropped = true;
                        false
                    }
                })
                .collect();
            if dropped {
                kept.join(" ")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut to `max_length - 3` characters plus "..." when over the limit
pub fn truncate_caption(caption: &str, max_length: usize) -> String {
    if caption.chars().count() <= max_length {
        return caption.to_string();
    }
    let keep = max_length.saturating_sub(ELLIPSIS.len());
    let mut truncated: String = caption.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Adapts content per platform before every publish attempt
pub struct ContentAdapter {
    profiles: BTreeMap<PlatformName, PlatformProfile>,
    resizer: Arc<dyn ImageResizer>,
}

impl ContentAdapter {
    /// Adapter using the built-in profile for every platform
    pub fn new(resizer: Arc<dyn ImageResizer>) -> Self {
        Self {
            profiles: BTreeMap::new(),
            resizer,
        }
    }

    /// Override the profile of one platform
    pub fn with_profile(mut self, platform: PlatformName, profile: PlatformProfile) -> Self {
        self.profiles.insert(platform, profile);
        self
    }

    pub fn profile(&self, platform: PlatformName) -> PlatformProfile {
        self.profiles
            .get(&platform)
            .copied()
            .unwrap_or_else(|| PlatformProfile::for_platform(platform))
    }

    pub async fn adapt(&self, platform: PlatformName, content: &PublishContent) -> PublishContent {
        let profile = self.profile(platform);
        let caption = adapt_caption(&content.caption, &profile);

        let image_ref = match profile.max_image_dimension {
            Some(max) => match self.resizer.resize(&content.image_ref, max, max).await {
                Ok(resized) => resized,
                Err(e) => {
                    tracing::debug!(
                        "Image adaptation for {} failed, using original: {}",
                        platform,
                        e
                    );
                    content.image_ref.clone()
                }
            },
            None => content.image_ref.clone(),
        };

        PublishContent { image_ref, caption }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CrosspostError, Result};
    use crate::images::NoResize;
    use async_trait::async_trait;

    fn hashtag_count(text: &str) -> usize {
        text.split_whitespace().filter(|t| t.starts_with('#')).count()
    }

    #[test]
    fn test_truncate_under_limit_untouched() {
        assert_eq!(truncate_caption("short", 10), "short");
        assert_eq!(truncate_caption("exactly10!", 10), "exactly10!");
    }

    #[test]
    fn test_truncate_over_limit() {
        let result = truncate_caption("this caption is too long", 10);
        assert_eq!(result, "this ca...");
        assert_eq!(result.chars().count(), 10);
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let result = truncate_caption("héllo wörld ünïcode", 8);
        assert_eq!(result, "héllo...");
    }

    #[test]
    fn test_truncate_tiny_limit() {
        assert_eq!(truncate_caption("abcdef", 2), "...");
    }

    #[test]
    fn test_limit_hashtags_keeps_first_n() {
        let caption = "Sunset #one at the #two beach #three #four today";
        let result = limit_hashtags(caption, 2);
        assert_eq!(result, "Sunset #one at the #two beach today");
        assert_eq!(hashtag_count(&result), 2);
    }

    #[test]
    fn test_limit_hashtags_preserves_non_hashtag_order() {
        let caption = "#a w1 #b w2 #c w3 #d w4";
        let result = limit_hashtags(caption, 1);
        let words: Vec<&str> = result
            .split_whitespace()
            .filter(|t| !t.starts_with('#'))
            .collect();
        assert_eq!(words, vec!["w1", "w2", "w3", "w4"]);
        assert_eq!(result, "#a w1 w2 w3 w4");
    }

    #[test]
    fn test_limit_hashtags_across_lines() {
        let caption = "New photo!\n\n#travel #sea\n#sun #sky";
        let result = limit_hashtags(caption, 3);
        assert_eq!(result, "New photo!\n\n#travel #sea\n#sun");
    }

    #[test]
    fn test_limit_hashtags_under_cap_is_identity() {
        let caption = "Hello  world\n#one";
        assert_eq!(limit_hashtags(caption, 5), caption);
    }

    #[test]
    fn test_adapt_caption_wordpress_unchanged() {
        let profile = PlatformProfile::for_platform(PlatformName::Wordpress);
        let caption = format!("{} {}", "x".repeat(5000), "#a ".repeat(50));
        assert_eq!(adapt_caption(&caption, &profile), caption);
    }

    #[test]
    fn test_adapt_caption_instagram_limits() {
        let profile = PlatformProfile::for_platform(PlatformName::Instagram);
        let tags: Vec<String> = (0..40).map(|i| format!("#tag{}", i)).collect();
        let caption = format!("Look at this {}", tags.join(" "));

        let adapted = adapt_caption(&caption, &profile);
        assert_eq!(hashtag_count(&adapted), 30);
        assert!(adapted.contains("#tag29"));
        assert!(!adapted.contains("#tag30"));
    }

    struct FixedResizer;

    #[async_trait]
    impl ImageResizer for FixedResizer {
        async fn resize(&self, image_ref: &str, w: u32, h: u32) -> Result<String> {
            Ok(format!("{}@{}x{}", image_ref, w, h))
        }
    }

    struct BrokenResizer;

    #[async_trait]
    impl ImageResizer for BrokenResizer {
        async fn resize(&self, _image_ref: &str, _w: u32, _h: u32) -> Result<String> {
            Err(CrosspostError::InvalidInput("corrupt image".to_string()))
        }
    }

    #[tokio::test]
    async fn test_adapt_resizes_when_profile_has_dimension() {
        let adapter = ContentAdapter::new(Arc::new(FixedResizer));
        let content = PublishContent::new("pic.jpg", "hi");

        let adapted = adapter.adapt(PlatformName::Instagram, &content).await;
        assert_eq!(adapted.image_ref, "pic.jpg@1080x1080");

        let adapted = adapter.adapt(PlatformName::Wordpress, &content).await;
        assert_eq!(adapted.image_ref, "pic.jpg");
    }

    #[tokio::test]
    async fn test_adapt_falls_back_to_original_image() {
        let adapter = ContentAdapter::new(Arc::new(BrokenResizer));
        let content = PublishContent::new("pic.jpg", "hi");

        let adapted = adapter.adapt(PlatformName::Facebook, &content).await;
        assert_eq!(adapted.image_ref, "pic.jpg");

        let adapter = ContentAdapter::new(Arc::new(NoResize));
        let adapted = adapter.adapt(PlatformName::Instagram, &content).await;
        assert_eq!(adapted.image_ref, "pic.jpg");
    }

    #[tokio::test]
    async fn test_profile_override() {
        let adapter = ContentAdapter::new(Arc::new(NoResize)).with_profile(
            PlatformName::Wordpress,
            PlatformProfile {
                max_caption_length: Some(8),
                ..Default::default()
            },
        );
        let adapted = adapter
            .adapt(PlatformName::Wordpress, &PublishContent::new("a.jpg", "a long caption"))
            .await;
        assert_eq!(adapted.caption, "a lon...");
    }
}
