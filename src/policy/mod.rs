//! Scheduling policies and their shared derivation helpers.
//!
//! Two policies are compared per run: the Lyapunov drift-plus-penalty
//! baseline and its model-predictive extension. Both implement
//! [`SlotPolicy`]; the driver runs them in lockstep on independent state
//! copies. Quantities derived from a decision (service bits, energies) are
//! free functions here so both policies and the rollout fitness share one
//! definition.

mod baseline;
mod optimizer;
mod predictive;
mod predictor;

pub use baseline::{local_frequency, schedule_offload, transmit_power, BaselinePolicy};
pub use optimizer::{
    DifferentialEvolution, GeneticOptimizer, Genes, Individual, OptimizeContext,
    OptimizerLogEntry, OptimizerOutcome, StochasticOptimizer, GENE_BOUNDS, INFEASIBLE_FITNESS,
};
pub use predictive::PredictivePolicy;
pub use predictor::{HorizonPrediction, Predictor};

use crate::config::{EdgeServerConfig, GlobalParams, OffloadMode, SensorConfig};
use crate::events::SlotEvents;
use crate::rng::DeterministicRng;
use crate::state::{SensorState, ServedAmounts};

/// Guard for denominators that may reach zero through configuration edge
/// cases or clipped draws.
pub(crate) const EPSILON: f64 = 1e-10;

/// One sensor's per-slot control decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Offload fraction in [0, 1]; restricted to {0, 1} in binary mode
    pub alpha: f64,
    /// Local CPU frequency, Hz
    pub cpu_hz: f64,
    /// Transmit power, watts
    pub tx_power_w: f64,
}

/// All decisions for one slot: one [`Decision`] per sensor plus the edge
/// frequency shares, indexed in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotDecision {
    /// Per-sensor decisions
    pub sensors: Vec<Decision>,
    /// Edge CPU share per sensor; each in [0, 1], sum at most 1
    pub edge_shares: Vec<f64>,
}

/// A per-slot scheduling policy.
///
/// `decide` must not mutate sensor state; the driver commits decisions.
/// `observe` feeds the realized events back after the commit, which the
/// predictive policy uses to maintain its history windows. The driver owns
/// one RNG stream per policy and threads it through `decide`, so all of a
/// policy's randomness (optimizer, prediction noise) comes from its own
/// stream.
pub trait SlotPolicy {
    /// Short policy tag used in result records and the CSV export.
    fn name(&self) -> &'static str;

    /// Computes this slot's decisions from current state and realized events.
    fn decide(
        &mut self,
        slot: usize,
        states: &[SensorState],
        events: &[SlotEvents],
        rng: &mut DeterministicRng,
    ) -> SlotDecision;

    /// Ingests the slot's realized events after the commit.
    fn observe(&mut self, _events: &[SlotEvents]) {}

    /// Returns and clears optimizer telemetry accumulated since the last
    /// call. Non-optimizing policies produce none.
    fn drain_optimizer_log(&mut self) -> Vec<OptimizerLogEntry> {
        Vec::new()
    }
}

/// Bits the local CPU processes in one slot at the given frequency.
pub fn local_service_bits(cpu_hz: f64, cycles_per_bit: f64, globals: &GlobalParams) -> f64 {
    cpu_hz * globals.slot_duration_s / cycles_per_bit.max(EPSILON)
}

/// Energy the local CPU spends in one slot: theta * f^3 * tau.
pub fn local_energy_j(cpu_hz: f64, globals: &GlobalParams) -> f64 {
    globals.cpu_energy_coeff * cpu_hz.powi(3) * globals.slot_duration_s
}

/// Bits transmitted in one slot: Shannon rate over the slot duration.
pub fn transmission_bits(tx_power_w: f64, channel_gain: f64, globals: &GlobalParams) -> f64 {
    if tx_power_w <= 0.0 {
        return 0.0;
    }
    let snr = tx_power_w * channel_gain / globals.noise_power_w.max(EPSILON);
    globals.bandwidth_hz * globals.slot_duration_s * (1.0 + snr).log2()
}

/// Transmit energy over one slot, joules.
pub fn tx_energy_j(tx_power_w: f64, globals: &GlobalParams) -> f64 {
    tx_power_w * globals.slot_duration_s
}

/// Bits the edge server processes for a sensor holding the given share.
pub fn edge_service_bits(
    share: f64,
    edge: &EdgeServerConfig,
    cycles_per_bit: f64,
    globals: &GlobalParams,
) -> f64 {
    share * edge.cpu_hz * globals.slot_duration_s / cycles_per_bit.max(EPSILON)
}

/// Edge CPU shares proportional to priority-weighted edge backlog.
///
/// When every weighted backlog is zero the shares are uniform. Each share
/// is clipped to at most 1; the sum is at most 1 by construction otherwise.
pub fn allocate_edge_shares(sensors: &[SensorConfig], states: &[SensorState]) -> Vec<f64> {
    let weighted: Vec<f64> = sensors
        .iter()
        .zip(states)
        .map(|(sensor, state)| sensor.priority_weight * state.h_edge)
        .collect();
    let total: f64 = weighted.iter().sum();

    if total <= 0.0 {
        let uniform = 1.0 / sensors.len() as f64;
        return vec![uniform; sensors.len()];
    }
    weighted.iter().map(|w| (w / total).min(1.0)).collect()
}

/// Restricts alpha to the sensor's offload granularity.
pub fn quantize_alpha(alpha: f64, mode: OffloadMode) -> f64 {
    match mode {
        OffloadMode::Binary => {
            if alpha >= 0.5 {
                1.0
            } else {
                0.0
            }
        }
        OffloadMode::Fractional => alpha.clamp(0.0, 1.0),
    }
}

/// Materializes the service and energy amounts a decision implies, given
/// the slot's realized channel gain.
pub fn served_from_decision(
    decision: &Decision,
    edge_share: f64,
    sensor: &SensorConfig,
    edge: &EdgeServerConfig,
    globals: &GlobalParams,
    events: &SlotEvents,
) -> ServedAmounts {
    let cycles = sensor.cycles_per_bit(globals);
    ServedAmounts {
        local_bits: local_service_bits(decision.cpu_hz, cycles, globals),
        tx_bits: transmission_bits(decision.tx_power_w, events.channel_gain, globals),
        edge_bits: edge_service_bits(edge_share, edge, cycles, globals),
        local_energy_j: local_energy_j(decision.cpu_hz, globals),
        tx_energy_j: tx_energy_j(decision.tx_power_w, globals),
    }
}
