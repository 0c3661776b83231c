//! [`SingleFlightGate`] – non-blocking mutual exclusion for engine access.
//!
//! The feed loop, the extraction controller and the reset handler all touch
//! the fusion engine.  Instead of queueing behind one another they race for
//! the gate with a single compare-and-set: the winner proceeds, everybody
//! else drops their cycle or trigger.  The permit releases the gate when it
//! goes out of scope, so every exit path (early return, `?`, panic unwind)
//! leaves the gate idle.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::trace;

const IDLE: u8 = 0;

/// Who currently owns the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GateHolder {
    /// One feed-loop iteration.
    Feed = 1,
    /// One extraction and hand-off.
    Extraction = 2,
    /// One engine reset.
    Reset = 3,
}

impl GateHolder {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Feed),
            2 => Some(Self::Extraction),
            3 => Some(Self::Reset),
            _ => None,
        }
    }
}

impl fmt::Display for GateHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateHolder::Feed => write!(f, "feed"),
            GateHolder::Extraction => write!(f, "extraction"),
            GateHolder::Reset => write!(f, "reset"),
        }
    }
}

/// Busy/idle flag shared by everything that reads or writes the volume.
///
/// # Example
///
/// ```
/// use fusionfeed_kernel::gate::{GateHolder, SingleFlightGate};
///
/// let gate = SingleFlightGate::new();
/// let permit = gate.try_acquire(GateHolder::Feed).expect("idle gate");
/// assert!(gate.try_acquire(GateHolder::Extraction).is_none());
/// drop(permit);
/// assert!(!gate.is_busy());
/// ```
#[derive(Debug, Default)]
pub struct SingleFlightGate {
    state: AtomicU8,
}

impl SingleFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate for `holder` if it is idle.
    ///
    /// Never blocks.  Returns `None` when someone else holds the gate.
    pub fn try_acquire(&self, holder: GateHolder) -> Option<GatePermit<'_>> {
        match self
            .state
            .compare_exchange(IDLE, holder as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                trace!(%holder, "gate acquired");
                Some(GatePermit { gate: self, holder })
            }
            Err(current) => {
                trace!(%holder, busy_with = ?GateHolder::from_raw(current), "gate busy");
                None
            }
        }
    }

    /// Current owner, or `None` when idle.
    pub fn current_holder(&self) -> Option<GateHolder> {
        GateHolder::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_busy(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }
}

/// Proof of gate ownership.  Dropping it releases the gate.
#[must_use = "the gate is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a SingleFlightGate,
    holder: GateHolder,
}

impl GatePermit<'_> {
    pub fn holder(&self) -> GateHolder {
        self.holder
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.state.store(IDLE, Ordering::Release);
        trace!(holder = %self.holder, "gate released");
    }
}
