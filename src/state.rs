//! Per-sensor runtime state and the queue/battery recurrence.
//!
//! Each policy owns an independent copy of every sensor's state; the driver
//! commits exactly one transition per sensor per slot. Queues and battery
//! are clipped at zero before arrivals and harvest are added, so surplus
//! service is discarded rather than borrowed from future slots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SensorConfig;
use crate::events::SlotEvents;

/// Mutable runtime state of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    /// Local processing backlog, bits
    pub h_local: f64,
    /// Offload-pending backlog, bits
    pub h_offload: f64,
    /// Edge-side backlog attributed to this sensor, bits
    pub h_edge: f64,
    /// Battery charge, joules
    pub battery_j: f64,
}

/// Work actually carried out for one sensor in one slot.
///
/// Produced by the policy layer from a decision and the realized events,
/// then committed to state via [`SensorState::apply_slot`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServedAmounts {
    /// Bits processed by the local CPU
    pub local_bits: f64,
    /// Bits transmitted toward the edge server
    pub tx_bits: f64,
    /// Bits processed at the edge on this sensor's behalf
    pub edge_bits: f64,
    /// Local CPU energy spent, joules
    pub local_energy_j: f64,
    /// Transmit energy spent, joules (informational; does not drain battery)
    pub tx_energy_j: f64,
}

/// Accounting residue of one transition, used by conservation checks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransitionLoss {
    /// Energy the battery could not supply (clipped at zero), joules
    pub battery_clip_j: f64,
    /// Service offered beyond each queue's backlog, bits
    pub surplus_service_bits: f64,
}

/// A sensor state quantity that left its allowed range.
#[derive(Debug, Clone)]
pub struct StateViolation {
    /// Which quantity went out of range
    pub quantity: &'static str,
    /// The offending value
    pub value: f64,
}

impl fmt::Display for StateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state invariant violated: {} = {}", self.quantity, self.value)
    }
}

impl SensorState {
    /// Initial state per the data model: the initial queue is split evenly
    /// between the local and offload queues, the edge queue starts empty.
    pub fn from_config(sensor: &SensorConfig) -> Self {
        Self {
            h_local: sensor.initial_queue_bits / 2.0,
            h_offload: sensor.initial_queue_bits / 2.0,
            h_edge: 0.0,
            battery_j: sensor.initial_battery_j,
        }
    }

    /// Total backlog across the three queues, bits.
    pub fn total_backlog_bits(&self) -> f64 {
        self.h_local + self.h_offload + self.h_edge
    }

    /// Applies one slot transition.
    ///
    /// `alpha` is the offload fraction (the scheduling bit in binary mode).
    /// Returns the clipping residue for conservation accounting.
    pub fn apply_slot(
        &mut self,
        events: &SlotEvents,
        alpha: f64,
        served: &ServedAmounts,
    ) -> TransitionLoss {
        let surplus_local = (served.local_bits - self.h_local).max(0.0);
        let surplus_tx = (served.tx_bits - self.h_offload).max(0.0);
        let surplus_edge = (served.edge_bits - self.h_edge).max(0.0);
        let battery_clip = (served.local_energy_j - self.battery_j).max(0.0);

        self.h_local = (self.h_local - served.local_bits).max(0.0)
            + (1.0 - alpha) * events.arrival_bits;
        self.h_offload =
            (self.h_offload - served.tx_bits).max(0.0) + alpha * events.arrival_bits;
        self.h_edge = (self.h_edge - served.edge_bits).max(0.0) + served.tx_bits;
        self.battery_j = (self.battery_j - served.local_energy_j).max(0.0) + events.harvest_j;

        TransitionLoss {
            battery_clip_j: battery_clip,
            surplus_service_bits: surplus_local + surplus_tx + surplus_edge,
        }
    }

    /// Verifies the non-negativity invariant on every stored quantity.
    ///
    /// # Errors
    /// Returns the first violated quantity; states produced exclusively
    /// through [`apply_slot`](Self::apply_slot) never violate it.
    pub fn check_non_negative(&self) -> Result<(), StateViolation> {
        for (quantity, value) in [
            ("h_local", self.h_local),
            ("h_offload", self.h_offload),
            ("h_edge", self.h_edge),
            ("battery_j", self.battery_j),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(StateViolation { quantity, value });
            }
        }
        Ok(())
    }
}
