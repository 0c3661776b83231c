//! `fusionfeed-kernel` – Coordination primitives
//!
//! Shared state that serialises access to the fusion engine and gates the
//! secondary sensor.  Nothing here knows about point clouds; the runtime
//! decides what each holder does while it owns the gate.
//!
//! # Modules
//!
//! - [`gate`] – [`SingleFlightGate`][gate::SingleFlightGate]: a lock-free
//!   busy flag acquired by compare-and-set and released by dropping the
//!   returned [`GatePermit`][gate::GatePermit].  At most one of the feed
//!   loop, an extraction or a reset holds it; the others skip.
//! - [`activation`] – [`ActivationWindow`][activation::ActivationWindow]:
//!   a flag that stays raised for a requested duration and then clears
//!   itself.  Re-activation while raised is a no-op.

pub mod activation;
pub mod gate;

pub use activation::ActivationWindow;
pub use gate::{GateHolder, GatePermit, SingleFlightGate};
