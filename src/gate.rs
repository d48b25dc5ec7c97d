//! Send gate: at most one generation request in flight, with a minimum
//! spacing between accepted requests.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accepted,
    /// A request is still outstanding
    InFlight,
    /// The previous request was accepted too recently
    TooSoon { remaining: Duration },
}

impl GateDecision {
    pub fn is_accepted(self) -> bool {
        matches!(self, GateDecision::Accepted)
    }
}

#[derive(Debug)]
pub struct SendGate {
    in_flight: bool,
    last_send_at: Option<Instant>,
    min_spacing: Duration,
}

impl SendGate {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            in_flight: false,
            last_send_at: None,
            min_spacing,
        }
    }

    /// Try to open the gate for one request at `now`.
    ///
    /// Rejections are not errors: the caller simply drops the send.
    pub fn try_acquire(&mut self, now: Instant) -> GateDecision {
        if self.in_flight {
            return GateDecision::InFlight;
        }

        if let Some(last) = self.last_send_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_spacing {
                return GateDecision::TooSoon {
                    remaining: self.min_spacing - elapsed,
                };
            }
        }

        self.in_flight = true;
        self.last_send_at = Some(now);
        GateDecision::Accepted
    }

    /// Mark the outstanding request as finished, successful or not.
    pub fn release(&mut self) {
        self.in_flight = false;
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_send_at(&self) -> Option<Instant> {
        self.last_send_at
    }
}

impl Default for SendGate {
    fn default() -> Self {
        Self::new(crate::config::MIN_SEND_SPACING)
    }
}
