//! Scheduler event bus
//!
//! In-process notifications about scheduled posts, built on
//! `tokio::sync::broadcast`. Emitting never blocks: with no subscribers the
//! event is dropped, and a lagging subscriber misses the oldest events.
//!
//! # Example
//!
//! ```no_run
//! use libcrosspost::events::{EventBus, SchedulerEvent};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(SchedulerEvent::Cancelled {
//!     post_id: "abc123".to_string(),
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{PlatformName, PlatformReport, PostStatus};

pub type EventReceiver = broadcast::Receiver<SchedulerEvent>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SchedulerEvent) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Something happened to a scheduled post
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    Scheduled {
        post_id: String,
        scheduled_time: DateTime<Utc>,
    },

    /// The post fired and reached a terminal status
    Executed {
        post_id: String,
        status: PostStatus,
        reports: BTreeMap<PlatformName, PlatformReport>,
    },

    /// The due time passed while no scheduler was running; the post was not published
    MissedFire {
        post_id: String,
        scheduled_time: DateTime<Utc>,
    },

    Cancelled {
        post_id: String,
    },

    Updated {
        post_id: String,
        scheduled_time: DateTime<Utc>,
    },
}

impl SchedulerEvent {
    pub fn post_id(&self) -> &str {
        match self {
            Self::Scheduled { post_id, .. }
            | Self::Executed { post_id, .. }
            | Self::MissedFire { post_id, .. }
            | Self::Cancelled { post_id }
            | Self::Updated { post_id, .. } => post_id,
        }
    }
}
