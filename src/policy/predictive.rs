//! Model-predictive policy: EWMA forecasts plus stochastic search.
//!
//! Extends the baseline by rolling each candidate action forward over a
//! short horizon of predicted events and minimizing the discounted
//! drift-plus-penalty cost with a population-based optimizer. With a zero
//! horizon the layer disappears and baseline decisions pass through.

use std::time::{Duration, Instant};

use crate::config::{
    EdgeServerConfig, GlobalParams, OptimizerParams, PredictionConfig, SensorConfig,
};
use crate::events::SlotEvents;
use crate::rng::DeterministicRng;
use crate::state::SensorState;

use super::optimizer::{
    Genes, OptimizeContext, OptimizerLogEntry, StochasticOptimizer, GENE_BOUNDS,
};
use super::predictor::{HorizonPrediction, NoiseSource, Predictor};
use super::{
    allocate_edge_shares, local_energy_j, local_service_bits, quantize_alpha, transmission_bits,
    tx_energy_j, BaselinePolicy, Decision, GeneticOptimizer, SlotDecision, SlotPolicy,
};

/// Geometric discount applied per horizon step.
const DISCOUNT: f64 = 0.95;

/// Cost added per bound violation and per battery-deficit slot.
const PENALTY: f64 = 1e6;

/// The predictive policy.
///
/// Holds no randomness of its own: the driver threads the predictive-side
/// RNG stream (experiment seed plus one) through `decide`, keeping it
/// independent of the baseline's stream.
pub struct PredictivePolicy {
    baseline: BaselinePolicy,
    predictor: Predictor,
    optimizer: Box<dyn StochasticOptimizer + Send>,
    horizon: usize,
    time_budget: Option<Duration>,
    legacy_noise: bool,
    telemetry: Vec<OptimizerLogEntry>,
}

impl PredictivePolicy {
    /// Creates the policy with the default genetic optimizer.
    pub fn new(
        sensors: Vec<SensorConfig>,
        edge: EdgeServerConfig,
        globals: GlobalParams,
        optimizer_params: &OptimizerParams,
        prediction: &PredictionConfig,
    ) -> Self {
        let horizon = globals.horizon;
        Self {
            predictor: Predictor::new(&sensors),
            baseline: BaselinePolicy::new(sensors, edge, globals),
            optimizer: Box::new(GeneticOptimizer::new(optimizer_params)),
            horizon,
            time_budget: optimizer_params.time_budget_ms.map(Duration::from_millis),
            legacy_noise: prediction.legacy_unseeded_noise,
            telemetry: Vec::new(),
        }
    }

    /// Swaps in a different optimizer behind the same fitness contract.
    pub fn with_optimizer(mut self, optimizer: Box<dyn StochasticOptimizer + Send>) -> Self {
        self.optimizer = optimizer;
        self
    }
}

impl SlotPolicy for PredictivePolicy {
    fn name(&self) -> &'static str {
        "predictive"
    }

    fn decide(
        &mut self,
        slot: usize,
        states: &[SensorState],
        events: &[SlotEvents],
        rng: &mut DeterministicRng,
    ) -> SlotDecision {
        if self.horizon == 0 {
            return self.baseline.decide(slot, states, events, rng);
        }

        let Self {
            baseline,
            predictor,
            optimizer,
            horizon,
            time_budget,
            legacy_noise,
            telemetry,
        } = self;
        let globals = baseline.globals().clone();
        let edge_shares = allocate_edge_shares(baseline.sensors(), states);
        let mut decisions = Vec::with_capacity(states.len());

        for (idx, sensor) in baseline.sensors().iter().enumerate() {
            // The time budget applies per decision, i.e. per sensor.
            let deadline = time_budget.map(|budget| Instant::now() + budget);
            let predictions = {
                let mut noise = if *legacy_noise {
                    NoiseSource::Legacy
                } else {
                    NoiseSource::Seeded(&mut *rng)
                };
                predictor.predict(idx, *horizon, &mut noise)
            };

            let state = states[idx];
            let mut fitness =
                |genes: &Genes| rollout_cost(genes, &state, sensor, &globals, &predictions);
            let ctx = OptimizeContext {
                slot,
                sensor_id: sensor.id.clone(),
                deadline,
            };
            let outcome = optimizer.optimize(&mut fitness, rng, &ctx);
            telemetry.extend(outcome.log);

            let genes = outcome.best.genes;
            decisions.push(Decision {
                alpha: quantize_alpha(genes[0], sensor.offload_mode),
                cpu_hz: genes[1] * sensor.max_cpu_hz,
                tx_power_w: genes[2] * sensor.max_tx_power_w,
            });
        }

        SlotDecision {
            sensors: decisions,
            edge_shares,
        }
    }

    fn observe(&mut self, events: &[SlotEvents]) {
        self.predictor.observe(events);
    }

    fn drain_optimizer_log(&mut self) -> Vec<OptimizerLogEntry> {
        std::mem::take(&mut self.telemetry)
    }
}

/// Discounted drift-plus-penalty cost of holding one action over the
/// prediction horizon.
///
/// Simulates the local and offload queues and the battery forward under
/// the candidate action and the predicted events. Bound violations (the
/// optimizer already clips, so this is a guard) and slots where the battery
/// would go negative each add a large penalty.
fn rollout_cost(
    genes: &Genes,
    start: &SensorState,
    sensor: &SensorConfig,
    globals: &GlobalParams,
    predictions: &[HorizonPrediction],
) -> f64 {
    let mut total = 0.0;
    for (gene, (lo, hi)) in genes.iter().zip(GENE_BOUNDS) {
        if *gene < lo || *gene > hi {
            total += PENALTY;
        }
    }

    let alpha = genes[0];
    let cpu_hz = genes[1] * sensor.max_cpu_hz;
    let tx_power = genes[2] * sensor.max_tx_power_w;
    let cycles = sensor.cycles_per_bit(globals);

    let local_bits = local_service_bits(cpu_hz, cycles, globals);
    let e_loc = local_energy_j(cpu_hz, globals);
    let e_tx = tx_energy_j(tx_power, globals);

    let mut h_local = start.h_local;
    let mut h_offload = start.h_offload;
    let mut battery = start.battery_j;
    let mut discount = 1.0;

    let steps = predictions.len().min(globals.horizon);
    for prediction in &predictions[..steps] {
        let tx_bits = transmission_bits(tx_power, prediction.channel_gain, globals);
        let arrival = prediction.arrival_bits;

        let slot_cost = globals.tradeoff_v * (e_loc + e_tx)
            + h_local * ((1.0 - alpha) * arrival - local_bits)
            + h_offload * (alpha * arrival - tx_bits);
        total += discount * slot_cost;

        if battery - e_loc < 0.0 {
            total += PENALTY;
        }

        h_local = (h_local - local_bits).max(0.0) + (1.0 - alpha) * arrival;
        h_offload = (h_offload - tx_bits).max(0.0) + alpha * arrival;
        battery = (battery - e_loc).max(0.0) + prediction.harvest_j;
        discount *= DISCOUNT;
    }

    total
}
