//! `fusionfeed-middleware` – data plumbing between sensors, the feed
//! pipeline, and downstream consumers.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.  Carries published clouds, diagnostic log
//!   lines, and external control triggers.
//! - [`slot`] – [`FrameSlot`]: single-slot "latest frame" cell with overwrite
//!   semantics, one per sensor.

pub mod bus;
pub mod slot;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use slot::FrameSlot;
