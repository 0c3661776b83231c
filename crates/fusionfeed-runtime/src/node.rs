//! [`FusionNode`] – wires the feed loop, the trigger handlers and frame
//! ingest around one [`FusionContext`].
//!
//! # Lifecycle
//!
//! 1. [`FusionNode::new`] validates the configuration.
//! 2. [`FusionNode::bootstrap`] configures the engine's camera model, waits
//!    (bounded) for the camera's initial pose, and resets the engine there.
//! 3. [`FusionNode::run`] spawns the feed loop and dispatches
//!    [`ControlSignal`]s arriving on [`Topic::Control`], each in its own
//!    short-lived task, until shutdown or a fatal fault.
//!
//! Triggers can also be delivered directly through
//! [`FusionNode::handle_control`], which is what the bus dispatcher does.

use std::sync::Arc;
use std::time::Duration;

use fusionfeed_hal::{FusionEngine, OcclusionAnalyzer};
use fusionfeed_kernel::GateHolder;
use fusionfeed_middleware::{EventBus, Topic};
use fusionfeed_perception::tf_buffer::TransformSource;
use fusionfeed_types::{ControlSignal, EventPayload, FeedError};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::context::FusionContext;
use crate::extraction::{ExtractionController, ExtractionOutcome};
use crate::feed_loop::FeedLoop;
use crate::ingest::FrameIngest;
use crate::options::NodeConfig;
use crate::pose::PoseResolver;

const SOURCE: &str = "fusionfeed-runtime::node";

/// What a control signal led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The engine volume was cleared.
    ResetDone,
    Extraction(ExtractionOutcome),
    /// The secondary window was opened.
    SecondaryActivated,
    /// Dropped: the gate was busy, the window was already open, or the
    /// request was malformed.
    Ignored,
}

/// Top-level coordinator.  Cloning is cheap and shares all state.
pub struct FusionNode<E: FusionEngine> {
    ctx: Arc<FusionContext<E>>,
}

impl<E: FusionEngine> Clone for FusionNode<E> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<E> FusionNode<E>
where
    E: FusionEngine + 'static,
{
    /// Assemble a node.
    ///
    /// # Errors
    ///
    /// [`FeedError::Config`] if `config` does not validate.
    pub fn new(
        config: NodeConfig,
        engine: E,
        transforms: Arc<dyn TransformSource>,
        bus: Arc<EventBus>,
        analyzer: Option<Arc<dyn OcclusionAnalyzer>>,
    ) -> Result<Self, FeedError> {
        config.validate()?;
        let resolver = PoseResolver::new(
            transforms,
            config.world_frame.clone(),
            config.transform_wait,
        );
        info!(
            world = %config.world_frame,
            camera = %config.primary.frame_id,
            dual_sensor = config.options.dual_sensor,
            use_color = config.options.use_color,
            visible = %config.options.visible_source,
            "fusion node configured"
        );
        Ok(Self {
            ctx: Arc::new(FusionContext::new(config, engine, resolver, bus, analyzer)),
        })
    }

    pub fn context(&self) -> &Arc<FusionContext<E>> {
        &self.ctx
    }

    /// Handle for sensor producers.
    pub fn ingest(&self) -> FrameIngest {
        FrameIngest::from_context(&self.ctx)
    }

    /// Prepare the engine: camera model, initial pose, empty volume.
    ///
    /// # Errors
    ///
    /// [`FeedError::TransformUnavailable`] if the camera pose does not appear
    /// within the startup wait, or an engine fault.  Both are fatal.
    pub async fn bootstrap(&self) -> Result<(), FeedError> {
        let ctx = &self.ctx;
        let camera = &ctx.config.primary;
        ctx.engine()?.set_depth_intrinsics(&camera.intrinsics);

        let initial = ctx
            .resolver
            .resolve_within(&camera.frame_id, ctx.config.startup_wait)
            .await
            .inspect_err(|e| error!(error = %e, "initial camera pose unavailable"))?;

        let mut engine = ctx.engine()?;
        engine.set_initial_pose(&initial.transform);
        engine.reset();
        info!(frame = %camera.frame_id, "fusion engine initialised at camera pose");
        Ok(())
    }

    /// Dispatch one trigger.
    ///
    /// # Errors
    ///
    /// Engine faults only.
    pub async fn handle_control(&self, signal: ControlSignal) -> Result<ControlOutcome, FeedError> {
        match signal {
            ControlSignal::Reset => self.reset(),
            ControlSignal::RequestExtraction => ExtractionController::new(Arc::clone(&self.ctx))
                .extract()
                .await
                .map(ControlOutcome::Extraction),
            ControlSignal::ActivateSecondary { duration_secs } => {
                Ok(self.activate_secondary(duration_secs))
            }
        }
    }

    /// Clear the volume if the gate is free.
    ///
    /// # Errors
    ///
    /// [`FeedError::EngineFault`] if the engine lock is poisoned.
    pub fn reset(&self) -> Result<ControlOutcome, FeedError> {
        let Some(_permit) = self.ctx.gate.try_acquire(GateHolder::Reset) else {
            debug!("gate busy, reset request dropped");
            return Ok(ControlOutcome::Ignored);
        };
        info!("resetting fusion volume");
        self.ctx.engine()?.reset();
        Ok(ControlOutcome::ResetDone)
    }

    /// Open the secondary-sensor window for `duration_secs`.
    pub fn activate_secondary(&self, duration_secs: f64) -> ControlOutcome {
        let duration = match Duration::try_from_secs_f64(duration_secs) {
            Ok(d) => d,
            Err(e) => {
                warn!(duration_secs, error = %e, "invalid activation duration");
                return ControlOutcome::Ignored;
            }
        };
        if self.ctx.secondary_window.activate(duration) {
            if !self.ctx.config.options.dual_sensor {
                debug!("secondary window opened but dual-sensor mode is off");
            }
            ControlOutcome::SecondaryActivated
        } else {
            ControlOutcome::Ignored
        }
    }

    /// Run until `shutdown` becomes `true` or a fatal fault occurs.
    ///
    /// The feed loop is always stopped and joined before this returns.
    ///
    /// # Errors
    ///
    /// The fault that stopped the node.  It is also published on
    /// [`Topic::SystemAlerts`].
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), FeedError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let feed = FeedLoop::new(Arc::clone(&self.ctx));
        let mut feed_task = tokio::spawn(async move { feed.run(stop_rx).await });

        let mut control = self.ctx.bus.subscribe_to(Topic::Control);
        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel::<FeedError>();
        info!("fusion node running");

        let mut feed_result = None;
        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                event = control.recv() => match event {
                    Ok(event) => {
                        if let EventPayload::Control(signal) = event.payload {
                            self.spawn_handler(signal, fault_tx.clone());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "control lane lagged; triggers dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                },
                Some(fault) = fault_rx.recv() => break Err(fault),
                joined = &mut feed_task => {
                    let result = joined.unwrap_or_else(|e| Err(FeedError::EngineFault {
                        component: "feed_loop".to_string(),
                        details: e.to_string(),
                    }));
                    feed_result = Some(result.clone());
                    break result;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
            }
        };

        if feed_result.is_none() {
            let _ = stop_tx.send(true);
            if let Ok(Err(e)) = feed_task.await {
                error!(error = %e, "feed loop faulted during shutdown");
            }
        }

        match outcome {
            Ok(()) => {
                info!("fusion node stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "fusion node stopped on fatal fault");
                self.ctx.publish(
                    Topic::SystemAlerts,
                    SOURCE,
                    EventPayload::Fault {
                        component: "fusion_node".to_string(),
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    fn spawn_handler(&self, signal: ControlSignal, faults: mpsc::UnboundedSender<FeedError>) {
        let node = self.clone();
        tokio::spawn(async move {
            match node.handle_control(signal).await {
                Ok(outcome) => debug!(?signal, ?outcome, "control signal handled"),
                Err(e) if e.is_transient() => warn!(?signal, error = %e, "control signal failed"),
                Err(e) => {
                    let _ = faults.send(e);
                }
            }
        });
    }
}
