//! State shared by the feed loop, the trigger handlers and frame ingest.
//!
//! One [`FusionContext`] is built per node and handed around as an `Arc`.
//! There are no process globals; tests build as many independent contexts as
//! they like.

use std::sync::{Arc, Mutex, MutexGuard};

use fusionfeed_hal::{FusionEngine, OcclusionAnalyzer};
use fusionfeed_kernel::{ActivationWindow, SingleFlightGate};
use fusionfeed_middleware::{EventBus, FrameSlot, Topic};
use fusionfeed_types::{Event, EventPayload, FeedError, SensorId};
use tracing::trace;

use crate::options::NodeConfig;
use crate::pose::PoseResolver;

/// Everything a fusion node's components read or write.
pub struct FusionContext<E: FusionEngine> {
    pub config: NodeConfig,
    engine: Mutex<E>,
    pub gate: SingleFlightGate,
    pub secondary_window: ActivationWindow,
    pub primary_slot: FrameSlot,
    pub secondary_slot: FrameSlot,
    pub resolver: PoseResolver,
    pub bus: Arc<EventBus>,
    pub analyzer: Option<Arc<dyn OcclusionAnalyzer>>,
}

impl<E: FusionEngine> FusionContext<E> {
    pub fn new(
        config: NodeConfig,
        engine: E,
        resolver: PoseResolver,
        bus: Arc<EventBus>,
        analyzer: Option<Arc<dyn OcclusionAnalyzer>>,
    ) -> Self {
        Self {
            config,
            engine: Mutex::new(engine),
            gate: SingleFlightGate::new(),
            secondary_window: ActivationWindow::new(),
            primary_slot: FrameSlot::new(SensorId::Primary),
            secondary_slot: FrameSlot::new(SensorId::Secondary),
            resolver,
            bus,
            analyzer,
        }
    }

    /// Exclusive access to the engine.
    ///
    /// Callers hold the guard only for synchronous engine calls, never across
    /// an `.await`.
    ///
    /// # Errors
    ///
    /// [`FeedError::EngineFault`] if a previous holder panicked mid-call,
    /// leaving the engine in an unknown state.
    pub fn engine(&self) -> Result<MutexGuard<'_, E>, FeedError> {
        self.engine.lock().map_err(|_| FeedError::EngineFault {
            component: "fusion_engine".to_string(),
            details: "engine lock poisoned by a panicking holder".to_string(),
        })
    }

    /// Latest-frame cell for `sensor`.
    pub fn slot(&self, sensor: SensorId) -> &FrameSlot {
        match sensor {
            SensorId::Primary => &self.primary_slot,
            SensorId::Secondary => &self.secondary_slot,
        }
    }

    /// Publish on the bus, treating "nobody listening" as success.
    pub(crate) fn publish(&self, topic: Topic, source: &str, payload: EventPayload) {
        if let Err(e) = self.bus.publish_to(topic, Event::new(source, payload)) {
            trace!(?topic, error = %e, "publish dropped");
        }
    }
}
