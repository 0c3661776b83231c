//! Thread-safe transform store with bounded-wait lookups.
//!
//! [`TfBuffer`] wraps a [`TfEngine`] so that a publisher (static rig
//! description, robot state publisher, test harness) can update transforms
//! from any thread while consumers wait, up to a caller-supplied limit, for a
//! chain between two frames to become resolvable.
//!
//! Consumers depend on the [`TransformSource`] trait rather than on the
//! buffer itself so the runtime can be exercised against scripted sources.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fusionfeed_types::FeedError;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

use crate::transform::{TfEngine, Transform3D};

/// Stand-in deadline for waits that overflow the clock.
const UNBOUNDED_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A transform together with the frames it relates and the time it is
/// valid at.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedTransform {
    /// Maps points in `source_frame` into `target_frame`.
    pub transform: Transform3D,
    pub target_frame: String,
    pub source_frame: String,
    pub stamp: DateTime<Utc>,
}

/// A provider of time-stamped rigid transforms between named frames.
#[async_trait]
pub trait TransformSource: Send + Sync {
    /// Wait up to `max_wait` for the transform mapping `source_frame` points
    /// into `target_frame` and return it at the most recent available time.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::TransformUnavailable`] when no chain between the
    /// two frames is published within the wait window.
    async fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        max_wait: Duration,
    ) -> Result<StampedTransform, FeedError>;
}

/// In-process [`TransformSource`] backed by a [`TfEngine`].
#[derive(Debug)]
pub struct TfBuffer {
    engine: RwLock<TfEngine>,
    /// Bumped on every update so waiters re-check.
    version: watch::Sender<u64>,
}

impl Default for TfBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TfBuffer {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            engine: RwLock::new(TfEngine::new()),
            version,
        }
    }

    /// Publish the pose of `child_frame` in `parent_frame`, stamped now.
    pub fn set_transform(&self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.set_stamped_transform(parent_frame, child_frame, transform, Utc::now());
    }

    /// Publish the pose of `child_frame` in `parent_frame` observed at `stamp`.
    pub fn set_stamped_transform(
        &self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
        stamp: DateTime<Utc>,
    ) {
        {
            let mut engine = self.engine.write().unwrap_or_else(|e| e.into_inner());
            engine.set_stamped_transform(parent_frame, child_frame, transform, stamp);
        }
        trace!(parent = parent_frame, child = child_frame, "transform published");
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Resolve the chain right now without waiting.
    pub fn try_lookup(&self, target_frame: &str, source_frame: &str) -> Option<StampedTransform> {
        let engine = self.engine.read().unwrap_or_else(|e| e.into_inner());
        engine
            .lookup_stamped(target_frame, source_frame)
            .map(|(transform, stamp)| StampedTransform {
                transform,
                target_frame: target_frame.to_string(),
                source_frame: source_frame.to_string(),
                stamp,
            })
    }

    /// Block the calling task until the chain resolves or `max_wait` elapses.
    ///
    /// # Errors
    ///
    /// [`FeedError::TransformUnavailable`] on timeout.
    pub async fn wait_for_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        max_wait: Duration,
    ) -> Result<StampedTransform, FeedError> {
        // Waits too long to represent as an instant are treated as unbounded.
        let deadline = Instant::now()
            .checked_add(max_wait)
            .unwrap_or_else(|| Instant::now() + UNBOUNDED_WAIT);
        // Subscribe before the first check so an update racing with it is
        // still observed by `changed()`.
        let mut updates = self.version.subscribe();
        loop {
            if let Some(found) = self.try_lookup(target_frame, source_frame) {
                return Ok(found);
            }
            match tokio::time::timeout_at(deadline, updates.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => {
                    return Err(FeedError::TransformUnavailable {
                        source_frame: source_frame.to_string(),
                        target_frame: target_frame.to_string(),
                        waited_ms: u64::try_from(max_wait.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl TransformSource for TfBuffer {
    async fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        max_wait: Duration,
    ) -> Result<StampedTransform, FeedError> {
        self.wait_for_transform(target_frame, source_frame, max_wait)
            .await
    }
}
