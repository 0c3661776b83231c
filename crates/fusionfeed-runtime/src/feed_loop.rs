//! Fusion Feed Loop.
//!
//! The only writer of the fusion volume.  Each tick it tries the gate and,
//! when it wins, runs one cycle:
//!
//! 1. snapshot the latest primary frame,
//! 2. resolve the primary camera's pose in the world frame,
//! 3. project the frame into a depth image (plus colour when enabled),
//! 4. integrate it,
//! 5. when dual-sensor mode is on and the activation window is open, repeat
//!    steps 1–4 for the secondary sensor under its own frame.
//!
//! A missing frame or transform ends the cycle without touching the engine.
//! An engine fault ends the loop.

use std::sync::Arc;

use fusionfeed_hal::FusionEngine;
use fusionfeed_kernel::GateHolder;
use fusionfeed_perception::projector::project_frame;
use fusionfeed_perception::transform::Transform3D;
use fusionfeed_types::{FeedError, SensorFrame, SensorId};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::context::FusionContext;
use crate::options::SensorConfig;

/// Result of one tick that did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another holder had the gate; nothing was done.
    GateBusy,
    /// The primary sensor has not delivered a frame yet.
    NoFrame,
    /// The primary pose could not be resolved in time.
    TransformUnavailable,
    /// The primary frame was integrated; `secondary` reports whether the
    /// secondary frame was too.
    Integrated { secondary: bool },
}

/// Drives [`FusionEngine::integrate`] at a fixed rate.
pub struct FeedLoop<E: FusionEngine> {
    ctx: Arc<FusionContext<E>>,
}

impl<E: FusionEngine> FeedLoop<E> {
    pub fn new(ctx: Arc<FusionContext<E>>) -> Self {
        Self { ctx }
    }

    /// Run one cycle.
    ///
    /// # Errors
    ///
    /// Only fatal engine faults are returned; every recoverable skip is a
    /// [`CycleOutcome`].
    ///
    /// # Panics
    ///
    /// Panics if a frame's point count disagrees with its sensor's configured
    /// resolution.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleOutcome, FeedError> {
        let ctx = &self.ctx;
        let Some(_permit) = ctx.gate.try_acquire(GateHolder::Feed) else {
            debug!("gate busy, skipping feed cycle");
            return Ok(CycleOutcome::GateBusy);
        };

        let frame = match ctx.slot(SensorId::Primary).require() {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "skipping feed cycle");
                return Ok(CycleOutcome::NoFrame);
            }
        };
        let pose = match ctx.resolver.resolve(&ctx.config.primary.frame_id).await {
            Ok(stamped) => stamped.transform,
            Err(e) => {
                warn!(error = %e, "primary pose unavailable, skipping cycle");
                return Ok(CycleOutcome::TransformUnavailable);
            }
        };
        self.push(&frame, &pose, &ctx.config.primary, ctx.config.options.use_color)?;

        let secondary = if ctx.config.options.dual_sensor && ctx.secondary_window.is_active() {
            self.feed_secondary().await?
        } else {
            false
        };

        Ok(CycleOutcome::Integrated { secondary })
    }

    async fn feed_secondary(&self) -> Result<bool, FeedError> {
        let ctx = &self.ctx;
        let frame = match ctx.slot(SensorId::Secondary).require() {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "secondary window open, nothing to add");
                return Ok(false);
            }
        };
        match ctx.resolver.resolve(&ctx.config.secondary.frame_id).await {
            Ok(stamped) => {
                // Depth-only sensor: colour is never pushed for it.
                self.push(&frame, &stamped.transform, &ctx.config.secondary, false)?;
                debug!("added secondary sensor data");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "secondary pose unavailable, skipping secondary frame");
                Ok(false)
            }
        }
    }

    /// Project `frame` and hand it to the engine.  Holds the engine lock for
    /// the synchronous engine calls only.
    fn push(
        &self,
        frame: &SensorFrame,
        pose: &Transform3D,
        sensor: &SensorConfig,
        with_color: bool,
    ) -> Result<(), FeedError> {
        let projected = project_frame(&frame.cloud, &sensor.intrinsics, with_color);
        let mut engine = self.ctx.engine()?;
        engine.integrate(&projected.depth, pose)?;
        if let Some(color) = projected.color.as_ref() {
            engine.integrate_color(&projected.depth, color)?;
        }
        debug!(
            sensor = %frame.sensor,
            valid_pixels = projected.depth.valid_count(),
            "frame integrated"
        );
        Ok(())
    }

    /// Tick until `shutdown` flips to `true` or the engine faults.
    ///
    /// A cycle in progress when shutdown is requested runs to completion.
    ///
    /// # Errors
    ///
    /// Returns the engine fault that stopped the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), FeedError> {
        let period = self.ctx.config.feed_period()?;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = period.as_millis() as u64, "feed loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(outcome) => debug!(?outcome, "feed cycle done"),
                        Err(e) if e.is_transient() => warn!(error = %e, "feed cycle aborted"),
                        Err(e) => {
                            error!(error = %e, "fusion engine fault, stopping feed loop");
                            return Err(e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("feed loop stopped");
        Ok(())
    }
}
