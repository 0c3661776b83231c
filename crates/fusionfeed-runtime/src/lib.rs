//! `fusionfeed-runtime` – The fusion feed pipeline
//!
//! Keeps a volumetric fusion engine fed with fresh, correctly posed depth
//! frames and, on request, snapshots the volume for publication and
//! occlusion analysis.
//!
//! # Modules
//!
//! - [`options`] – [`NodeConfig`][options::NodeConfig] and the
//!   [`PipelineOptions`][options::PipelineOptions] behaviour descriptor.
//! - [`pose`] – [`PoseResolver`][pose::PoseResolver]: bounded-wait lookups
//!   between sensor frames and the fusion world frame.
//! - [`context`] – [`FusionContext`][context::FusionContext]: the engine,
//!   gate, activation window, latest-frame cells and bus shared by
//!   everything below.
//! - [`feed_loop`] – [`FeedLoop`][feed_loop::FeedLoop]: the fixed-rate
//!   snapshot → pose → project → integrate cycle; the volume's only writer.
//! - [`extraction`] – [`ExtractionController`][extraction::ExtractionController]:
//!   volume → surface cloud + distance/weight grid → publication and
//!   occlusion hand-off.
//! - [`ingest`] – [`FrameIngest`][ingest::FrameIngest]: producer-side entry
//!   that overwrites the latest-frame cells and republishes the raw camera
//!   cloud.
//! - [`node`] – [`FusionNode`][node::FusionNode]: bootstrap, control-signal
//!   dispatch and orderly shutdown.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging with optional OTLP span export.
//!
//! # Gating
//!
//! A feed cycle, an extraction and a reset each hold the
//! [`SingleFlightGate`] for their whole duration and skip outright when it is
//! taken.  [`SingleFlightGate`] and [`ActivationWindow`] are re-exported so
//! callers need no direct dependency on `fusionfeed-kernel`.

pub mod context;
pub mod extraction;
pub mod feed_loop;
pub mod ingest;
pub mod node;
pub mod options;
pub mod pose;
pub mod telemetry;

pub use context::FusionContext;
pub use extraction::{ExtractionController, ExtractionOutcome, ExtractionReport, WeightCensus};
pub use feed_loop::{CycleOutcome, FeedLoop};
pub use ingest::FrameIngest;
pub use node::{ControlOutcome, FusionNode};
pub use options::{NodeConfig, PipelineOptions, SensorConfig, Topics, VisibleCloudSource};
pub use pose::PoseResolver;
pub use telemetry::{TracerProviderGuard, init_tracing};

pub use fusionfeed_kernel::{ActivationWindow, SingleFlightGate};
