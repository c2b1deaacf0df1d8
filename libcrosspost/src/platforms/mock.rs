//! Mock adapter implementation for testing
//!
//! Scriptable adapter that can succeed, fail, fail a fixed number of times
//! before succeeding, or panic, optionally after a delay. Clones share their
//! call counters so a test can keep a handle after moving the adapter into an
//! orchestrator.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PlatformError, Result};
use crate::platforms::PlatformAdapter;
use crate::types::{PlatformName, PublishContent};

/// What the mock does on each call
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed,
    Fail(String),
    /// Fail the first `n` calls, then succeed
    FailTimes(usize, String),
    /// Fail every call as an authentication error
    Reject(String),
    Panic(String),
}

#[derive(Clone)]
pub struct MockAdapter {
    platform: PlatformName,
    behavior: MockBehavior,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    shared: Arc<Mutex<Vec<PublishContent>>>,
}

impl MockAdapter {
    pub fn new(platform: PlatformName, behavior: MockBehavior) -> Self {
        Self {
            platform,
            behavior,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            shared: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Adapter that always succeeds
    pub fn success(platform: PlatformName) -> Self {
        Self::new(platform, MockBehavior::Succeed)
    }

    /// Adapter that always fails with `error`
    pub fn failure(platform: PlatformName, error: &str) -> Self {
        Self::new(platform, MockBehavior::Fail(error.to_string()))
    }

    /// Adapter that fails `times` calls before succeeding
    pub fn flaky(platform: PlatformName, times: usize) -> Self {
        Self::new(
            platform,
            MockBehavior::FailTimes(times, "temporary outage".to_string()),
        )
    }

    /// Adapter whose credentials are always rejected
    pub fn rejecting(platform: PlatformName, error: &str) -> Self {
        Self::new(platform, MockBehavior::Reject(error.to_string()))
    }

    /// Adapter whose `share` panics
    pub fn panicking(platform: PlatformName, message: &str) -> Self {
        Self::new(platform, MockBehavior::Panic(message.to_string()))
    }

    /// Simulate network latency on every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of times `share` was called
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Content of every successful share, in call order
    pub fn shared_content(&self) -> Vec<PublishContent> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    async fn share(&self, content: &PublishContent) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match &self.behavior {
            MockBehavior::Succeed => {}
            MockBehavior::Fail(error) => return Err(PlatformError::Posting(error.clone()).into()),
            MockBehavior::FailTimes(times, error) if call <= *times => {
                return Err(PlatformError::Network(error.clone()).into());
            }
            MockBehavior::FailTimes(..) => {}
            MockBehavior::Reject(error) => {
                return Err(PlatformError::Authentication(error.clone()).into());
            }
            MockBehavior::Panic(message) => panic!("{}", message),
        }

        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(content.clone());

        Ok(format!(
            "Posted to {} (mock call {})",
            self.platform.display_name(),
            call
        ))
    }

    fn platform(&self) -> PlatformName {
        self.platform
    }
}
