//! Durable scheduler for future publish requests
//!
//! The scheduler owns the job store, the in-memory posts and one timer task
//! per pending post. Every state change goes through a single mutex, and the
//! store is written inside that critical section, so a cancel and a firing
//! timer can never both win.
//!
//! Two ways to open it:
//!
//! - [`Scheduler::start`] is for the long-running daemon. It reconciles the
//!   store (pending posts whose due time already passed become `failed`
//!   without publishing) and arms a timer for every future pending post.
//! - [`Scheduler::open`] is for short-lived command-line clients. It loads the
//!   store and arms nothing; posts it schedules are fired by whichever daemon
//!   next calls [`Scheduler::sync`].
//!
//! Across processes the store is the arbiter. Before publishing, a fire
//! claims the row with a conditional update, and no other writer touches a
//! claimed or terminal row. A cancel from another process therefore either
//! lands before the claim (nothing is published) or is refused with "being
//! published". A claim still held when a daemon starts is left over from a
//! crash mid-publish and is reconciled like a missed fire.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{CrosspostError, Result};
use crate::events::{EventBus, EventReceiver, SchedulerEvent};
use crate::poster::PublishPort;
use crate::types::{PlatformName, PlatformReport, PostStatus, PublishContent, ScheduledPost};

type Reports = BTreeMap<PlatformName, PlatformReport>;

/// How long shutdown waits for posts that are being published
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    /// Insertion order
    posts: Vec<ScheduledPost>,
    timers: HashMap<String, Timer>,
    /// Tasks past their timer that are publishing right now
    firing: HashMap<String, JoinHandle<()>>,
    in_flight: HashSet<String>,
    /// Posts this process holds a store claim on
    claimed: HashSet<String>,
    /// Posts whose latest state has not reached the store yet
    dirty: BTreeSet<String>,
    last_execution: HashMap<String, Reports>,
    next_generation: u64,
    closed: bool,
}

impl State {
    fn find(&self, id: &str) -> Option<&ScheduledPost> {
        self.posts.iter().find(|p| p.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut ScheduledPost> {
        self.posts.iter_mut().find(|p| p.id == id)
    }

    fn disarm(&mut self, id: &str) {
        if let Some(timer) = self.timers.remove(id) {
            timer.handle.abort();
        }
    }

    /// Replace the in-memory post with the stored one
    fn adopt(&mut self, stored: ScheduledPost) {
        if stored.status.is_terminal() {
            self.disarm(&stored.id);
        }
        self.dirty.remove(&stored.id);
        match self.find_mut(&stored.id) {
            Some(post) => *post = stored,
            None => self.posts.push(stored),
        }
    }
}

/// How a stored row relates to the in-memory post during sync
enum Merge {
    New,
    Terminal,
    Edited { rearm: bool },
    Unchanged,
}

/// Post counts per status plus the next post due
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub published: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub next_due: Option<(String, DateTime<Utc>)>,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.published + self.failed + self.cancelled
    }
}

pub struct Scheduler {
    db: Database,
    publisher: Arc<dyn PublishPort>,
    events: EventBus,
    /// False for detached handles opened by command-line clients
    armed: bool,
    state: Mutex<State>,
}

impl Scheduler {
    /// Load the store, reconcile missed posts and arm timers
    pub async fn start(db: Database, publisher: Arc<dyn PublishPort>) -> Result<Arc<Self>> {
        let scheduler = Self::load(db, publisher, true).await?;
        let missed = {
            let mut state = scheduler.state.lock().await;
            let now = Utc::now();
            let mut missed = Vec::new();
            let mut armed = 0usize;

            let pending: Vec<(String, DateTime<Utc>, bool)> = state
                .posts
                .iter()
                .filter(|p| p.is_pending())
                .map(|p| (p.id.clone(), p.scheduled_time, p.is_claimed()))
                .collect();
            for (id, due, claimed) in pending {
                // a claim nobody finished means a publish was cut off
                if due <= now || claimed {
                    scheduler.mark_missed(&mut state, &id);
                    missed.push(SchedulerEvent::MissedFire {
                        post_id: id,
                        scheduled_time: due,
                    });
                } else {
                    scheduler.arm(&mut state, &id, due);
                    armed += 1;
                }
            }

            if let Err(e) = scheduler.persist_locked(&mut state).await {
                warn!("Could not persist reconciled posts, will retry: {}", e);
            }
            info!(
                "Scheduler started: {} post(s) loaded, {} armed, {} missed",
                state.posts.len(),
                armed,
                missed.len()
            );
            missed
        };

        for event in missed {
            scheduler.events.emit(event);
        }
        Ok(scheduler)
    }

    /// Load the store without reconciling or arming timers
    pub async fn open(db: Database, publisher: Arc<dyn PublishPort>) -> Result<Arc<Self>> {
        Self::load(db, publisher, false).await
    }

    async fn load(db: Database, publisher: Arc<dyn PublishPort>, armed: bool) -> Result<Arc<Self>> {
        let posts = db.load_posts().await?;
        debug!("Loaded {} scheduled post(s)", posts.len());
        Ok(Arc::new(Self {
            db,
            publisher,
            events: EventBus::default(),
            armed,
            state: Mutex::new(State {
                posts,
                ..State::default()
            }),
        }))
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Schedule `content` for `platforms` at `scheduled_time`; returns the new id
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the time is not in the future or no platform is
    /// given. A store failure is returned as a database error; the post stays
    /// scheduled in memory and is written on the next successful persist.
    pub async fn schedule(
        self: &Arc<Self>,
        content: PublishContent,
        platforms: BTreeSet<PlatformName>,
        scheduled_time: DateTime<Utc>,
    ) -> Result<String> {
        if platforms.is_empty() {
            return Err(CrosspostError::InvalidInput(
                "At least one platform is required".to_string(),
            ));
        }
        if scheduled_time <= Utc::now() {
            return Err(CrosspostError::InvalidInput(
                "Scheduled time must be in the future".to_string(),
            ));
        }

        let post = ScheduledPost::new(content, platforms, scheduled_time);
        let id = post.id.clone();

        let persisted = {
            let mut state = self.state.lock().await;
            state.posts.push(post);
            state.dirty.insert(id.clone());
            self.arm(&mut state, &id, scheduled_time);
            let persisted = self.persist_locked(&mut state).await;
            persisted
        };

        info!("Scheduled post {} for {}", id, scheduled_time);
        self.events.emit(SchedulerEvent::Scheduled {
            post_id: id.clone(),
            scheduled_time,
        });
        persisted.map(|_| id)
    }

    /// Cancel a pending post
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `InvalidInput` if the post is not pending
    /// or is being published right now.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let persisted = {
            let mut state = self.state.lock().await;
            self.refresh_locked(&mut state, id).await;
            self.check_mutable(&state, id, "cancel")?;

            state.disarm(id);
            if let Some(post) = state.find_mut(id) {
                post.status = PostStatus::Cancelled;
            }
            state.dirty.insert(id.to_string());
            let persisted = self.persist_locked(&mut state).await;

            // a daemon may have claimed the row after it was re-read
            let applied = state
                .find(id)
                .map_or(false, |p| p.status == PostStatus::Cancelled);
            if !applied {
                self.check_mutable(&state, id, "cancel")?;
            }
            persisted
        };

        info!("Cancelled post {}", id);
        self.events.emit(SchedulerEvent::Cancelled {
            post_id: id.to_string(),
        });
        persisted
    }

    /// Change the caption and/or due time of a pending post
    ///
    /// A new time re-arms the timer; the old timer is discarded.
    pub async fn update(
        self: &Arc<Self>,
        id: &str,
        caption: Option<String>,
        scheduled_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(time) = scheduled_time {
            if time <= Utc::now() {
                return Err(CrosspostError::InvalidInput(
                    "Scheduled time must be in the future".to_string(),
                ));
            }
        }

        let (persisted, due) = {
            let mut state = self.state.lock().await;
            self.refresh_locked(&mut state, id).await;
            self.check_mutable(&state, id, "update")?;

            let due = match state.find_mut(id) {
                Some(post) => {
                    if let Some(caption) = caption {
                        post.caption = caption;
                    }
                    if let Some(time) = scheduled_time {
                        post.scheduled_time = time;
                    }
                    post.scheduled_time
                }
                None => return Err(CrosspostError::NotFound("Post not found".to_string())),
            };
            if scheduled_time.is_some() {
                self.arm(&mut state, id, due);
            }
            state.dirty.insert(id.to_string());
            let persisted = self.persist_locked(&mut state).await;

            let applied = state
                .find(id)
                .map_or(false, |p| p.is_pending() && !p.is_claimed());
            if !applied {
                self.check_mutable(&state, id, "update")?;
            }
            (persisted, due)
        };

        info!("Updated post {}", id);
        self.events.emit(SchedulerEvent::Updated {
            post_id: id.to_string(),
            scheduled_time: due,
        });
        persisted
    }

    /// Posts sorted by scheduled time, optionally filtered by status
    pub async fn posts(&self, status: Option<PostStatus>) -> Vec<ScheduledPost> {
        let state = self.state.lock().await;
        let mut posts: Vec<ScheduledPost> = state
            .posts
            .iter()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        posts.sort_by_key(|p| p.scheduled_time);
        posts
    }

    pub async fn get(&self, id: &str) -> Option<ScheduledPost> {
        self.state.lock().await.find(id).cloned()
    }

    /// Per-platform reports from the most recent fire of `id` in this process
    pub async fn last_execution(&self, id: &str) -> Option<Reports> {
        self.state.lock().await.last_execution.get(id).cloned()
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for post in &state.posts {
            match post.status {
                PostStatus::Pending => {
                    stats.pending += 1;
                    let earlier = stats
                        .next_due
                        .as_ref()
                        .map_or(true, |(_, due)| post.scheduled_time < *due);
                    if earlier {
                        stats.next_due = Some((post.id.clone(), post.scheduled_time));
                    }
                }
                PostStatus::Published => stats.published += 1,
                PostStatus::Failed => stats.failed += 1,
                PostStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Merge changes other processes made to the store
    ///
    /// New pending posts are armed (or failed as missed fires), posts turned
    /// terminal elsewhere are adopted and disarmed, and edits to pending posts
    /// are picked up. Unpersisted local changes are flushed. Returns how many
    /// posts changed.
    pub async fn sync(self: &Arc<Self>) -> Result<usize> {
        let stored_posts = self.db.load_posts().await?;
        let mut events = Vec::new();

        let (changed, persisted) = {
            let mut state = self.state.lock().await;
            let now = Utc::now();
            let mut changed = 0usize;

            for stored in stored_posts {
                if state.in_flight.contains(&stored.id) || state.dirty.contains(&stored.id) {
                    continue;
                }
                let id = stored.id.clone();
                let due = stored.scheduled_time;

                let merge = match state.find(&id) {
                    None => Merge::New,
                    Some(current) if current.is_pending() && stored.status.is_terminal() => {
                        Merge::Terminal
                    }
                    Some(current) if current.is_pending() && *current != stored => Merge::Edited {
                        rearm: current.scheduled_time != due,
                    },
                    Some(_) => Merge::Unchanged,
                };

                match merge {
                    Merge::New => {
                        debug!("Picked up post {} from the store", id);
                        // claimed rows belong to the scheduler publishing them
                        let pending = stored.is_pending() && !stored.is_claimed();
                        state.posts.push(stored);
                        if pending && due <= now {
                            self.mark_missed(&mut state, &id);
                            events.push(SchedulerEvent::MissedFire {
                                post_id: id.clone(),
                                scheduled_time: due,
                            });
                        } else if pending {
                            self.arm(&mut state, &id, due);
                        }
                    }
                    Merge::Terminal => {
                        debug!("Post {} became {} elsewhere", id, stored.status);
                        state.adopt(stored);
                    }
                    Merge::Edited { rearm } => {
                        state.adopt(stored);
                        if rearm {
                            self.arm(&mut state, &id, due);
                        }
                    }
                    Merge::Unchanged => continue,
                }
                changed += 1;
            }

            let persisted = self.persist_locked(&mut state).await;
            (changed, persisted)
        };

        for event in events {
            self.events.emit(event);
        }
        persisted.map(|_| changed)
    }

    /// Stop firing and wait for posts that are being published
    ///
    /// Timers that have not fired yet are aborted and their posts stay
    /// pending in the store. A publish already under way runs to completion
    /// and its final status is written before this returns. After
    /// `SHUTDOWN_GRACE` the wait is abandoned; such posts stay claimed and the
    /// next daemon start marks them failed.
    pub async fn shutdown(&self) {
        let firing: Vec<(String, JoinHandle<()>)> = {
            let mut state = self.state.lock().await;
            state.closed = true;
            for (_, timer) in state.timers.drain() {
                timer.handle.abort();
            }
            state.firing.drain().collect()
        };

        if !firing.is_empty() {
            let ids: Vec<String> = firing.iter().map(|(id, _)| id.clone()).collect();
            info!("Waiting for {} post(s) being published: {}", ids.len(), ids.join(", "));
            let handles = firing.into_iter().map(|(_, handle)| handle);
            if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles))
                .await
                .is_err()
            {
                warn!(
                    "Stopped waiting for in-flight posts after {}",
                    humantime::format_duration(SHUTDOWN_GRACE)
                );
            }
        }

        let mut state = self.state.lock().await;
        if !state.dirty.is_empty() {
            if let Err(e) = self.persist_locked(&mut state).await {
                warn!("Unpersisted scheduler changes at shutdown: {}", e);
            }
        }
        info!("Scheduler stopped");
    }

    fn check_mutable(&self, state: &State, id: &str, action: &str) -> Result<()> {
        let post = state
            .find(id)
            .ok_or_else(|| CrosspostError::NotFound("Post not found".to_string()))?;
        if state.in_flight.contains(id) || post.is_claimed() {
            return Err(CrosspostError::InvalidInput(format!(
                "Cannot {} post while it is being published",
                action
            )));
        }
        if !post.is_pending() {
            return Err(CrosspostError::InvalidInput(format!(
                "Cannot {} post with status: {}",
                action, post.status
            )));
        }
        Ok(())
    }

    fn mark_missed(&self, state: &mut State, id: &str) {
        let Some(post) = state.find_mut(id) else {
            return;
        };
        warn!(
            "Post {} was due at {} while no scheduler was running; marking failed",
            id, post.scheduled_time
        );
        post.status = PostStatus::Failed;
        if post.claimed_at.take().is_some() {
            // finishing releases the stale claim
            state.claimed.insert(id.to_string());
        }
        state.dirty.insert(id.to_string());
    }

    /// Start (or restart) the timer for `id`; no-op on detached handles
    fn arm(self: &Arc<Self>, state: &mut State, id: &str, due: DateTime<Utc>) {
        if !self.armed || state.closed {
            return;
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        let delay = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let weak: Weak<Self> = Arc::downgrade(self);
        let post_id = id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = weak.upgrade() {
                scheduler.fire(&post_id, generation).await;
            }
        });

        if let Some(old) = state.timers.insert(
            id.to_string(),
            Timer {
                generation,
                handle,
            },
        ) {
            old.handle.abort();
        }
    }

    async fn fire(&self, id: &str, generation: u64) {
        let (content, platforms) = {
            let mut state = self.state.lock().await;
            match state.timers.get(id) {
                Some(timer) if timer.generation == generation => {}
                _ => {
                    debug!("Ignoring stale timer for post {}", id);
                    return;
                }
            }
            let Some(timer) = state.timers.remove(id) else {
                return;
            };

            self.refresh_locked(&mut state, id).await;
            let Some(post) = state.find(id) else {
                return;
            };
            if !post.is_pending() {
                debug!("Post {} is {}, not firing", id, post.status);
                return;
            }
            if post.is_claimed() {
                info!("Post {} is already being published elsewhere", id);
                return;
            }
            let job = (post.content(), post.platforms.clone());

            let now = Utc::now();
            match self.db.claim_post(id, &now).await {
                Ok(true) => {
                    state.claimed.insert(id.to_string());
                    // unsaved edits are superseded by the final status
                    state.dirty.remove(id);
                    if let Some(post) = state.find_mut(id) {
                        post.claimed_at = Some(now);
                    }
                }
                Ok(false) if state.dirty.contains(id) => {
                    warn!("Post {} is not in the store yet; publishing without a claim", id);
                }
                Ok(false) => {
                    // changed between the re-read and the claim
                    match self.db.get_post(id).await {
                        Ok(Some(stored)) => state.adopt(stored),
                        Ok(None) => {}
                        Err(e) => warn!("Could not re-read post {}: {}", id, e),
                    }
                    debug!("Post {} changed in the store, not firing", id);
                    return;
                }
                Err(e) => {
                    warn!("Could not claim post {}, publishing without a claim: {}", id, e);
                }
            }

            state.in_flight.insert(id.to_string());
            state.firing.insert(id.to_string(), timer.handle);
            job
        };

        info!("Publishing scheduled post {} to {} platform(s)", id, platforms.len());
        let reports = self.publisher.publish(&content, &platforms).await;
        let all_succeeded = platforms
            .iter()
            .all(|p| reports.get(p).map_or(false, |r| r.success));
        let status = if all_succeeded {
            PostStatus::Published
        } else {
            PostStatus::Failed
        };

        let final_status = {
            let mut state = self.state.lock().await;
            state.in_flight.remove(id);
            state.firing.remove(id);
            if let Some(post) = state.find_mut(id) {
                post.status = status;
                post.claimed_at = None;
            }
            state.dirty.insert(id.to_string());
            state.last_execution.insert(id.to_string(), reports.clone());
            if let Err(e) = self.persist_locked(&mut state).await {
                warn!("Post {} finished as {} but could not be saved: {}", id, status, e);
            }
            state.find(id).map_or(status, |p| p.status)
        };

        if final_status != status {
            warn!(
                "Post {} was marked {} by another process while publishing",
                id, final_status
            );
        }
        info!("Scheduled post {} finished: {}", id, final_status);
        self.events.emit(SchedulerEvent::Executed {
            post_id: id.to_string(),
            status: final_status,
            reports,
        });
    }

    /// Adopt the stored row when another process created it, claimed it or
    /// made it terminal
    async fn refresh_locked(&self, state: &mut State, id: &str) {
        if state.in_flight.contains(id) || state.dirty.contains(id) {
            return;
        }
        match self.db.get_post(id).await {
            Ok(Some(stored)) => {
                let adopt = match state.find(id) {
                    Some(current) => {
                        current.is_pending()
                            && (stored.status.is_terminal()
                                || stored.claimed_at != current.claimed_at)
                    }
                    None => true,
                };
                if adopt {
                    state.adopt(stored);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not re-read post {} from the store: {}", id, e),
        }
    }

    /// Write every dirty post; rows already terminal or claimed on disk win
    ///
    /// Posts this process claimed are finished through the claim instead of
    /// the regular upsert, which refuses claimed rows.
    async fn persist_locked(&self, state: &mut State) -> Result<()> {
        let ids: Vec<String> = state.dirty.iter().cloned().collect();
        let mut first_error = None;

        for id in ids {
            let Some(post) = state.find(&id).cloned() else {
                state.dirty.remove(&id);
                continue;
            };
            let saved = if state.claimed.contains(&id) {
                self.db.finish_post(&id, post.status).await
            } else {
                self.db.save_post(&post).await
            };
            match saved {
                Ok(true) => {
                    state.dirty.remove(&id);
                    state.claimed.remove(&id);
                }
                Ok(false) => match self.db.get_post(&id).await {
                    Ok(Some(stored)) => {
                        if stored != post {
                            warn!("Post {} is already {} in the store", id, stored.status);
                        }
                        state.claimed.remove(&id);
                        state.adopt(stored);
                    }
                    Ok(None) => {
                        state.dirty.remove(&id);
                        state.claimed.remove(&id);
                    }
                    Err(e) => {
                        warn!("Could not re-read post {}: {}", id, e);
                        first_error.get_or_insert(e);
                    }
                },
                Err(e) => {
                    warn!("Failed to persist post {}: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, timer) in self.state.get_mut().timers.drain() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Publisher that records calls and succeeds unless told otherwise
    struct RecordingPublisher {
        calls: AtomicUsize,
        succeed: bool,
        delay: Duration,
    }

    impl RecordingPublisher {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                succeed,
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                succeed: true,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PublishPort for RecordingPublisher {
        async fn publish(&self, _content: &PublishContent, platforms: &BTreeSet<PlatformName>) -> Reports {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            platforms
                .iter()
                .map(|p| {
                    (
                        *p,
                        PlatformReport {
                            success: self.succeed,
                            message: "done".to_string(),
                            failure: (!self.succeed).then_some(FailureKind::Posting),
                            attempts: Default::default(),
                        },
                    )
                })
                .collect()
        }
    }

    async fn test_db(dir: &TempDir) -> Database {
        Database::new(dir.path().join("schedule.db").to_str().unwrap())
            .await
            .unwrap()
    }

    fn content() -> PublishContent {
        PublishContent::new("photo.jpg", "Caption")
    }

    fn wordpress() -> BTreeSet<PlatformName> {
        BTreeSet::from([PlatformName::Wordpress])
    }

    fn in_millis(ms: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(ms)
    }

    async fn wait_for_executed(receiver: &mut EventReceiver) -> SchedulerEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match receiver.recv().await {
                    Ok(event @ SchedulerEvent::Executed { .. }) => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event bus closed: {}", e),
                }
            }
        })
        .await
        .expect("post never executed")
    }

    #[tokio::test]
    async fn test_schedule_rejects_past_time() {
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::start(test_db(&dir).await, RecordingPublisher::new(true))
            .await
            .unwrap();

        let err = scheduler
            .schedule(content(), wordpress(), in_millis(-1000))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Scheduled time must be in the future"));
        assert!(scheduler.posts(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_rejects_empty_platforms() {
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::start(test_db(&dir).await, RecordingPublisher::new(true))
            .await
            .unwrap();

        let err = scheduler
            .schedule(content(), BTreeSet::new(), in_millis(60_000))
            .await
            .unwrap_err();
        assert!(matches!(err, CrosspostError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_fire_publishes_and_persists() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let publisher = RecordingPublisher::new(true);
        let scheduler = Scheduler::start(db.clone(), publisher.clone()).await.unwrap();
        let mut events = scheduler.subscribe();

        let id = scheduler
            .schedule(content(), wordpress(), in_millis(100))
            .await
            .unwrap();
        wait_for_executed(&mut events).await;

        assert_eq!(publisher.calls(), 1);
        assert_eq!(scheduler.get(&id).await.unwrap().status, PostStatus::Published);
        assert_eq!(db.get_post(&id).await.unwrap().unwrap().status, PostStatus::Published);
        assert!(scheduler.last_execution(&id).await.unwrap()[&PlatformName::Wordpress].success);
    }

    #[tokio::test]
    async fn test_failed_platform_marks_post_failed() {
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::start(test_db(&dir).await, RecordingPublisher::new(false))
            .await
            .unwrap();
        let mut events = scheduler.subscribe();

        let id = scheduler
            .schedule(content(), wordpress(), in_millis(50))
            .await
            .unwrap();
        match wait_for_executed(&mut events).await {
            SchedulerEvent::Executed { status, .. } => assert_eq!(status, PostStatus::Failed),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(scheduler.get(&id).await.unwrap().status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_prevents_fire() {
        let dir = TempDir::new().unwrap();
        let publisher = RecordingPublisher::new(true);
        let scheduler = Scheduler::start(test_db(&dir).await, publisher.clone())
            .await
            .unwrap();

        let id = scheduler
            .schedule(content(), wordpress(), in_millis(150))
            .await
            .unwrap();
        scheduler.cancel(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(publisher.calls(), 0);
        assert_eq!(scheduler.get(&id).await.unwrap().status, PostStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_twice_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::start(test_db(&dir).await, RecordingPublisher::new(true))
            .await
            .unwrap();

        let id = scheduler
            .schedule(content(), wordpress(), in_millis(60_000))
            .await
            .unwrap();
        scheduler.cancel(&id).await.unwrap();

        let err = scheduler.cancel(&id).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("Cannot cancel post with status: cancelled"));

        let err = scheduler.cancel("no-such-id").await.unwrap_err();
        assert!(matches!(err, CrosspostError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_while_in_flight_is_rejected() {
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::start(
            test_db(&dir).await,
            RecordingPublisher::slow(Duration::from_millis(300)),
        )
        .await
        .unwrap();
        let mut events = scheduler.subscribe();

        let id = scheduler
            .schedule(content(), wordpress(), in_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let err = scheduler.cancel(&id).await.unwrap_err();
        assert!(err.to_string().contains("being published"));

        wait_for_executed(&mut events).await;
        assert_eq!(scheduler.get(&id).await.unwrap().status, PostStatus::Published);
    }

    #[tokio::test]
    async fn test_cancel_from_another_process_while_publishing_is_rejected() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let publisher = RecordingPublisher::slow(Duration::from_millis(400));
        let daemon = Scheduler::start(db.clone(), publisher.clone()).await.unwrap();
        let mut events = daemon.subscribe();

        let id = daemon
            .schedule(content(), wordpress(), in_millis(50))
            .await
            .unwrap();
        // opened before the fire, so its copy of the row is unclaimed
        let client = Scheduler::open(test_db(&dir).await, RecordingPublisher::new(true))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(publisher.calls(), 1);

        let err = client.cancel(&id).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("Cannot cancel post while it is being published"));
        assert!(client.get(&id).await.unwrap().is_claimed());

        let err = client
            .update(&id, Some("too late".to_string()), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("being published"));

        match wait_for_executed(&mut events).await {
            SchedulerEvent::Executed { status, .. } => assert_eq!(status, PostStatus::Published),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(publisher.calls(), 1);
        let stored = db.get_post(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(stored.caption, "Caption");
        assert!(stored.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_fire_skips_post_claimed_elsewhere() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let publisher = RecordingPublisher::new(true);
        let daemon = Scheduler::start(db.clone(), publisher.clone()).await.unwrap();

        let id = daemon
            .schedule(content(), wordpress(), in_millis(150))
            .await
            .unwrap();
        assert!(db.claim_post(&id, &Utc::now()).await.unwrap());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(publisher.calls(), 0);
        assert!(daemon.get(&id).await.unwrap().is_claimed());
    }

    #[tokio::test]
    async fn test_start_fails_post_left_claimed_by_a_crash() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let post = ScheduledPost::new(content(), wordpress(), in_millis(60_000));
        db.save_post(&post).await.unwrap();
        db.claim_post(&post.id, &Utc::now()).await.unwrap();

        let publisher = RecordingPublisher::new(true);
        let scheduler = Scheduler::start(db.clone(), publisher.clone()).await.unwrap();

        assert_eq!(publisher.calls(), 0);
        assert_eq!(scheduler.get(&post.id).await.unwrap().status, PostStatus::Failed);
        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert!(stored.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_update_reschedules_timer() {
        let dir = TempDir::new().unwrap();
        let publisher = RecordingPublisher::new(true);
        let scheduler = Scheduler::start(test_db(&dir).await, publisher.clone())
            .await
            .unwrap();
        let mut events = scheduler.subscribe();

        let id = scheduler
            .schedule(content(), wordpress(), in_millis(100))
            .await
            .unwrap();
        scheduler
            .update(&id, Some("New caption".to_string()), Some(in_millis(400)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(publisher.calls(), 0, "old timer must not fire");

        wait_for_executed(&mut events).await;
        assert_eq!(publisher.calls(), 1);
        assert_eq!(scheduler.get(&id).await.unwrap().caption, "New caption");
    }

    #[tokio::test]
    async fn test_update_validation() {
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::start(test_db(&dir).await, RecordingPublisher::new(true))
            .await
            .unwrap();
        let id = scheduler
            .schedule(content(), wordpress(), in_millis(60_000))
            .await
            .unwrap();

        let err = scheduler
            .update(&id, None, Some(in_millis(-10)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Scheduled time must be in the future"));

        scheduler.cancel(&id).await.unwrap();
        let err = scheduler
            .update(&id, Some("x".to_string()), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cannot update post with status: cancelled"));
    }

    #[tokio::test]
    async fn test_start_marks_missed_posts_failed() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let mut missed = ScheduledPost::new(content(), wordpress(), in_millis(60_000));
        missed.scheduled_time = in_millis(-5_000);
        db.save_post(&missed).await.unwrap();

        let publisher = RecordingPublisher::new(true);
        let scheduler = Scheduler::start(db.clone(), publisher.clone()).await.unwrap();

        assert_eq!(publisher.calls(), 0);
        assert_eq!(scheduler.get(&missed.id).await.unwrap().status, PostStatus::Failed);
        assert_eq!(db.get_post(&missed.id).await.unwrap().unwrap().status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn test_posts_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::start(test_db(&dir).await, RecordingPublisher::new(true))
            .await
            .unwrap();

        let late = scheduler
            .schedule(content(), wordpress(), in_millis(120_000))
            .await
            .unwrap();
        let early = scheduler
            .schedule(content(), wordpress(), in_millis(60_000))
            .await
            .unwrap();
        scheduler.cancel(&late).await.unwrap();

        let all: Vec<String> = scheduler.posts(None).await.into_iter().map(|p| p.id).collect();
        assert_eq!(all, vec![early.clone(), late.clone()]);

        let pending = scheduler.posts(Some(PostStatus::Pending)).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, early);

        let stats = scheduler.stats().await;
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.total(), 2);
        assert_eq!(stats.next_due.unwrap().0, early);
    }

    #[tokio::test]
    async fn test_open_does_not_arm_or_reconcile() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let mut missed = ScheduledPost::new(content(), wordpress(), in_millis(60_000));
        missed.scheduled_time = in_millis(-5_000);
        db.save_post(&missed).await.unwrap();

        let publisher = RecordingPublisher::new(true);
        let client = Scheduler::open(db.clone(), publisher.clone()).await.unwrap();
        assert!(!client.is_armed());
        assert_eq!(client.get(&missed.id).await.unwrap().status, PostStatus::Pending);

        client
            .schedule(content(), wordpress(), in_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(publisher.calls(), 0);
    }

    #[tokio::test]
    async fn test_sync_picks_up_other_process_changes() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let publisher = RecordingPublisher::new(true);
        let daemon = Scheduler::start(db.clone(), publisher.clone()).await.unwrap();
        let client = Scheduler::open(db.clone(), publisher.clone()).await.unwrap();

        // scheduled by a client, cancelled by a client, both after daemon start
        let fresh = client
            .schedule(content(), wordpress(), in_millis(500))
            .await
            .unwrap();
        let doomed = daemon
            .schedule(content(), wordpress(), in_millis(60_000))
            .await
            .unwrap();
        let client = Scheduler::open(db.clone(), publisher.clone()).await.unwrap();
        client.cancel(&doomed).await.unwrap();

        let mut events = daemon.subscribe();
        assert_eq!(daemon.sync().await.unwrap(), 2);
        assert_eq!(daemon.get(&doomed).await.unwrap().status, PostStatus::Cancelled);

        wait_for_executed(&mut events).await;
        assert_eq!(daemon.get(&fresh).await.unwrap().status, PostStatus::Published);
        assert_eq!(publisher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fire_adopts_terminal_row_from_store() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let publisher = RecordingPublisher::new(true);
        let daemon = Scheduler::start(db.clone(), publisher.clone()).await.unwrap();

        let id = daemon
            .schedule(content(), wordpress(), in_millis(150))
            .await
            .unwrap();
        // another process cancels without the daemon syncing
        let mut row = db.get_post(&id).await.unwrap().unwrap();
        row.status = PostStatus::Cancelled;
        db.save_post(&row).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(publisher.calls(), 0);
        assert_eq!(daemon.get(&id).await.unwrap().status, PostStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_timers() {
        let dir = TempDir::new().unwrap();
        let publisher = RecordingPublisher::new(true);
        let scheduler = Scheduler::start(test_db(&dir).await, publisher.clone())
            .await
            .unwrap();

        let id = scheduler
            .schedule(content(), wordpress(), in_millis(100))
            .await
            .unwrap();
        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(publisher.calls(), 0);
        assert_eq!(scheduler.get(&id).await.unwrap().status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_post_being_published() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let publisher = RecordingPublisher::slow(Duration::from_millis(300));
        let scheduler = Scheduler::start(db.clone(), publisher.clone()).await.unwrap();

        let firing = scheduler
            .schedule(content(), wordpress(), in_millis(50))
            .await
            .unwrap();
        let waiting = scheduler
            .schedule(content(), wordpress(), in_millis(60_000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(publisher.calls(), 1);

        scheduler.shutdown().await;

        let stored = db.get_post(&firing).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert!(stored.claimed_at.is_none());
        assert_eq!(db.get_post(&waiting).await.unwrap().unwrap().status, PostStatus::Pending);
        assert_eq!(publisher.calls(), 1);
    }
}
