//! Lyapunov drift-plus-penalty baseline policy.
//!
//! The per-slot problem decomposes into four convex sub-problems, each with
//! a closed-form optimum: the offload scheduling bit, the local CPU
//! frequency, the transmit power, and the edge frequency shares. No search
//! is involved; every decision is a direct function of current queues,
//! battery, and the realized channel gain.

use crate::config::{EdgeServerConfig, GlobalParams, SensorConfig};
use crate::events::SlotEvents;
use crate::rng::DeterministicRng;
use crate::state::SensorState;

use super::{allocate_edge_shares, Decision, SlotDecision, SlotPolicy, EPSILON};

/// The drift-plus-penalty baseline.
pub struct BaselinePolicy {
    sensors: Vec<SensorConfig>,
    edge: EdgeServerConfig,
    globals: GlobalParams,
}

impl BaselinePolicy {
    /// Creates the policy over the experiment's sensor set.
    pub fn new(sensors: Vec<SensorConfig>, edge: EdgeServerConfig, globals: GlobalParams) -> Self {
        Self {
            sensors,
            edge,
            globals,
        }
    }

    /// Sensors in configuration order.
    pub fn sensors(&self) -> &[SensorConfig] {
        &self.sensors
    }

    /// Edge server configuration this policy allocates over.
    pub fn edge(&self) -> &EdgeServerConfig {
        &self.edge
    }

    /// Global parameters in force.
    pub fn globals(&self) -> &GlobalParams {
        &self.globals
    }

    /// Per-sensor decision from sub-problems 1-3.
    pub(crate) fn sensor_decision(
        &self,
        sensor: &SensorConfig,
        state: &SensorState,
        events: &SlotEvents,
    ) -> Decision {
        Decision {
            alpha: schedule_offload(state.h_local, state.h_offload),
            cpu_hz: local_frequency(state.h_local, state.battery_j, sensor, &self.globals),
            tx_power_w: transmit_power(
                state.h_offload,
                state.h_edge,
                events.channel_gain,
                sensor,
                &self.globals,
            ),
        }
    }
}

impl SlotPolicy for BaselinePolicy {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn decide(
        &mut self,
        _slot: usize,
        states: &[SensorState],
        events: &[SlotEvents],
        _rng: &mut DeterministicRng,
    ) -> SlotDecision {
        let edge_shares = allocate_edge_shares(&self.sensors, states);
        let sensors = self
            .sensors
            .iter()
            .zip(states)
            .zip(events)
            .map(|((sensor, state), event)| self.sensor_decision(sensor, state, event))
            .collect();
        SlotDecision {
            sensors,
            edge_shares,
        }
    }
}

/// Sub-problem 1: the scheduling bit.
///
/// Routes new arrivals toward the shorter queue; ties resolve to local.
pub fn schedule_offload(h_local: f64, h_offload: f64) -> f64 {
    if h_offload >= h_local {
        0.0
    } else {
        1.0
    }
}

/// Sub-problem 2: local CPU frequency.
///
/// Three regimes. With battery to spare (threshold above both the hardware
/// and queue-service caps) the cubic energy penalty dominates and the
/// unconstrained Lyapunov optimum f* = sqrt(H_l / (3 V theta delta))
/// applies, still clipped by the caps. When the battery threshold binds,
/// f* is used only if it clears the threshold; otherwise the queue-service
/// bound takes over.
pub fn local_frequency(
    h_local: f64,
    battery_j: f64,
    sensor: &SensorConfig,
    globals: &GlobalParams,
) -> f64 {
    let tau = globals.slot_duration_s;
    let theta = globals.cpu_energy_coeff;
    let delta = sensor.cycles_per_bit(globals);

    let f_queue = h_local * delta / tau;
    let f_battery = (battery_j / (theta * tau)).cbrt();
    let f_opt = (h_local / (3.0 * globals.tradeoff_v * theta * delta)).sqrt();

    let cap = sensor.max_cpu_hz.min(f_queue);
    if f_battery > cap {
        // f64::min ignores a NaN f_opt (possible only at h_local = 0 with
        // V = 0, where the cap is 0 anyway).
        cap.min(f_opt)
    } else if f_opt <= f_battery {
        sensor.max_cpu_hz.min(f_opt.max(0.0))
    } else {
        cap
    }
}

/// Sub-problem 3: transmit power.
///
/// Zero when the edge-side backlog already covers the offload queue.
/// Otherwise a water-filling level, capped by the power that would empty
/// the offload queue within the slot and by the hardware limit.
pub fn transmit_power(
    h_offload: f64,
    h_edge: f64,
    channel_gain: f64,
    sensor: &SensorConfig,
    globals: &GlobalParams,
) -> f64 {
    if h_offload <= h_edge {
        return 0.0;
    }
    let gain = channel_gain.max(EPSILON);
    let noise_over_gain = globals.noise_power_w / gain;

    let water_level = (h_offload - h_edge) * globals.bandwidth_hz
        / (globals.tradeoff_v * std::f64::consts::LN_2)
        - noise_over_gain;
    let slot_bits = globals.bandwidth_hz * globals.slot_duration_s;
    let rate_cap = (2f64.powf(h_offload / slot_bits) - 1.0) * noise_over_gain;

    water_level.min(rate_cap).min(sensor.max_tx_power_w).max(0.0)
}
