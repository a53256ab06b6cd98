//! Simulation driver: runs both policies in lockstep over N slots.
//!
//! The driver owns one state copy, one RNG stream, and one policy instance
//! per side (baseline seeded with `seed`, predictive with `seed + 1`),
//! commits decisions, aggregates per-slot metrics, and streams progress to
//! the host. It is single-threaded cooperative: exactly one slot is in
//! flight, and control yields to the host every ten slots so an embedding
//! UI can paint and cancellation can take effect.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, ExperimentConfig};
use crate::events::{generate_slot_events, SlotEvents};
use crate::policy::{
    served_from_decision, BaselinePolicy, OptimizerLogEntry, PredictivePolicy, SlotDecision,
    SlotPolicy,
};
use crate::rng::DeterministicRng;
use crate::state::SensorState;

/// Slots between cooperative yields (and cancellation polls).
const YIELD_INTERVAL_SLOTS: usize = 10;

/// Floor applied to per-slot arrivals in the latency proxy, bits.
const LATENCY_ARRIVAL_FLOOR: f64 = 1e5;

/// Weight of backlog in the composite fitness metric.
const BACKLOG_FITNESS_WEIGHT: f64 = 0.01;

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The experiment configuration failed validation.
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Slots are still being processed
    Running,
    /// All slots completed
    Completed,
    /// A slot failed; accumulated results are preserved
    Error,
    /// The caller cancelled; accumulated results are preserved
    Cancelled,
}

/// One sensor's outcome for one slot, recorded after the commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSlotResult {
    /// Sensor identifier
    pub id: String,
    /// Local queue after the slot, bits
    pub h_local: f64,
    /// Offload queue after the slot, bits
    pub h_offload: f64,
    /// Edge queue after the slot, bits
    pub h_edge: f64,
    /// Offload fraction applied this slot
    pub alpha: f64,
    /// Local CPU energy spent, joules
    pub local_energy_j: f64,
    /// Transmit energy spent, joules
    pub tx_energy_j: f64,
    /// Transmit power applied, watts
    pub tx_power_w: f64,
    /// Local CPU frequency applied, Hz
    pub cpu_hz: f64,
    /// Realized arrival, bits
    pub arrival_bits: f64,
    /// Realized harvest, joules
    pub harvest_j: f64,
    /// Battery after the slot, joules
    pub battery_j: f64,
}

/// Edge-side allocation outcome for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSensorResult {
    /// Sensor identifier
    pub id: String,
    /// Edge CPU share granted, in [0, 1]
    pub share: f64,
    /// Bits the edge processed on the sensor's behalf
    pub processed_bits: f64,
}

/// Edge server outcome for one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSlotResult {
    /// Per-sensor allocation results, in configuration order
    pub sensors: Vec<EdgeSensorResult>,
}

/// Global metrics of one slot under one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMetrics {
    /// Total backlog across all sensors and queues, bits
    pub total_backlog_bits: f64,
    /// Total energy spent this slot (local plus transmit), joules
    pub total_energy_j: f64,
    /// Composite fitness: -energy - 0.01 * backlog
    pub best_fitness: f64,
    /// Mean backlog-over-arrival latency proxy, milliseconds
    pub avg_latency_ms: f64,
}

/// One policy's full record of one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    /// Slot index
    pub slot: usize,
    /// Policy tag ("baseline" or "predictive")
    pub algorithm: String,
    /// Per-sensor outcomes, in configuration order
    pub sensors: Vec<SensorSlotResult>,
    /// Edge allocation outcome
    pub edge: EdgeSlotResult,
    /// Slot-level metrics
    pub metrics: SlotMetrics,
}

/// Snapshot of a run, updated once per slot and returned at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationState {
    /// Run identifier in canonical 8-4-4-4-12 hex form
    pub run_id: String,
    /// Lifecycle status
    pub status: RunStatus,
    /// Slots fully processed so far
    pub current_slot: usize,
    /// Slots requested
    pub total_slots: usize,
    /// Baseline policy records, one per completed slot
    pub baseline_results: Vec<SlotRecord>,
    /// Predictive policy records, one per completed slot
    pub predictive_results: Vec<SlotRecord>,
    /// Flat optimizer telemetry across all slots and sensors
    pub optimizer_log: Vec<OptimizerLogEntry>,
    /// Failure description when status is `Error`
    pub error: Option<String>,
}

/// Progress callback, invoked once per completed slot.
pub type ProgressCallback = Box<dyn FnMut(&SimulationState) + Send>;

/// Optimizer telemetry callback: (sensor id, entry).
pub type OptimizerLogCallback = Box<dyn FnMut(&str, &OptimizerLogEntry) + Send>;

/// Drives one experiment: both policies, all slots.
pub struct SimulationDriver {
    config: ExperimentConfig,
    baseline: BaselinePolicy,
    predictive: PredictivePolicy,
    baseline_states: Vec<SensorState>,
    predictive_states: Vec<SensorState>,
    baseline_rng: DeterministicRng,
    predictive_rng: DeterministicRng,
    state: SimulationState,
    on_progress: Option<ProgressCallback>,
    on_optimizer_log: Option<OptimizerLogCallback>,
}

impl SimulationDriver {
    /// Validates the configuration and prepares both policy sides.
    ///
    /// # Errors
    /// - `SimulationError::Config` - The configuration failed validation;
    ///   no state is produced.
    pub fn new(config: ExperimentConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let baseline = BaselinePolicy::new(
            config.sensors.clone(),
            config.edge.clone(),
            config.globals.clone(),
        );
        let predictive = PredictivePolicy::new(
            config.sensors.clone(),
            config.edge.clone(),
            config.globals.clone(),
            &config.optimizer,
            &config.prediction,
        );
        let initial_states: Vec<SensorState> =
            config.sensors.iter().map(SensorState::from_config).collect();

        let state = SimulationState {
            run_id: Uuid::new_v4().to_string(),
            status: RunStatus::Running,
            current_slot: 0,
            total_slots: config.total_slots,
            baseline_results: Vec::with_capacity(config.total_slots),
            predictive_results: Vec::with_capacity(config.total_slots),
            optimizer_log: Vec::new(),
            error: None,
        };

        Ok(Self {
            baseline_rng: DeterministicRng::from_seed(config.optimizer.seed),
            predictive_rng: DeterministicRng::from_seed(config.optimizer.seed.wrapping_add(1)),
            baseline,
            predictive,
            baseline_states: initial_states.clone(),
            predictive_states: initial_states,
            config,
            state,
            on_progress: None,
            on_optimizer_log: None,
        })
    }

    /// Registers a per-slot progress callback.
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Registers a per-generation optimizer telemetry callback.
    pub fn on_optimizer_log(mut self, callback: OptimizerLogCallback) -> Self {
        self.on_optimizer_log = Some(callback);
        self
    }

    /// Runs to completion with no external cancellation.
    pub async fn run(self) -> SimulationState {
        self.run_until_cancelled(CancellationToken::new()).await
    }

    /// Runs until completion, a slot failure, or cancellation.
    ///
    /// The token is polled at each cooperative yield (every ten slots);
    /// cancellation halts the loop without corrupting accumulated results.
    pub async fn run_until_cancelled(mut self, cancel: CancellationToken) -> SimulationState {
        info!(
            run_id = %self.state.run_id,
            sensors = self.config.sensors.len(),
            slots = self.config.total_slots,
            horizon = self.config.globals.horizon,
            "simulation started"
        );

        for slot in 0..self.config.total_slots {
            if !self.process_slot(slot) {
                break;
            }

            if (slot + 1) % YIELD_INTERVAL_SLOTS == 0 {
                if cancel.is_cancelled() {
                    self.state.status = RunStatus::Cancelled;
                    info!(run_id = %self.state.run_id, slot, "simulation cancelled");
                    break;
                }
                tokio::task::yield_now().await;
            }
        }

        if self.state.status == RunStatus::Running {
            self.state.status = RunStatus::Completed;
        }
        info!(
            run_id = %self.state.run_id,
            status = ?self.state.status,
            slots = self.state.current_slot,
            "simulation finished"
        );
        self.state
    }

    /// Processes one slot for both policies. Returns `false` when the run
    /// must stop (a slot failure was captured).
    fn process_slot(&mut self, slot: usize) -> bool {
        let Self {
            config,
            baseline,
            predictive,
            baseline_states,
            predictive_states,
            baseline_rng,
            predictive_rng,
            ..
        } = self;

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let baseline_record = run_policy_slot(
                slot,
                config,
                &mut *baseline,
                baseline_states,
                baseline_rng,
            );
            let predictive_record = run_policy_slot(
                slot,
                config,
                &mut *predictive,
                predictive_states,
                predictive_rng,
            );
            let telemetry = predictive.drain_optimizer_log();
            (baseline_record, predictive_record, telemetry)
        }));

        match outcome {
            Ok((baseline_record, predictive_record, telemetry)) => {
                self.state.baseline_results.push(baseline_record);
                self.state.predictive_results.push(predictive_record);

                if let Some(callback) = &mut self.on_optimizer_log {
                    for entry in &telemetry {
                        let result =
                            catch_unwind(AssertUnwindSafe(|| callback(&entry.sensor_id, entry)));
                        if result.is_err() {
                            warn!(slot, "optimizer log callback panicked; ignoring");
                        }
                    }
                }
                self.state.optimizer_log.extend(telemetry);
                self.state.current_slot = slot + 1;

                if let Some(callback) = &mut self.on_progress {
                    let snapshot = &self.state;
                    if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                        warn!(slot, "progress callback panicked; ignoring");
                    }
                }
                true
            }
            Err(panic) => {
                let reason = panic_message(&panic);
                warn!(slot, %reason, "slot failed; preserving partial results");
                self.state.status = RunStatus::Error;
                self.state.error = Some(format!("slot {slot}: {reason}"));
                false
            }
        }
    }
}

/// Draws events, decides, commits, and builds the record for one policy.
fn run_policy_slot(
    slot: usize,
    config: &ExperimentConfig,
    policy: &mut dyn SlotPolicy,
    states: &mut [SensorState],
    rng: &mut DeterministicRng,
) -> SlotRecord {
    let events: Vec<SlotEvents> = config
        .sensors
        .iter()
        .map(|sensor| generate_slot_events(sensor, rng))
        .collect();

    let decision = policy.decide(slot, states, &events, rng);
    let record = commit_slot(slot, policy.name(), config, states, &events, &decision);
    policy.observe(&events);
    record
}

/// Applies a slot decision to the policy's state copy and records the
/// post-transition trajectory and metrics.
fn commit_slot(
    slot: usize,
    algorithm: &str,
    config: &ExperimentConfig,
    states: &mut [SensorState],
    events: &[SlotEvents],
    decision: &SlotDecision,
) -> SlotRecord {
    let mut sensors = Vec::with_capacity(config.sensors.len());
    let mut edge_sensors = Vec::with_capacity(config.sensors.len());
    let mut total_energy = 0.0;
    let mut latency_sum = 0.0;

    for (idx, sensor) in config.sensors.iter().enumerate() {
        let slot_decision = &decision.sensors[idx];
        let share = decision.edge_shares[idx];
        let served = served_from_decision(
            slot_decision,
            share,
            sensor,
            &config.edge,
            &config.globals,
            &events[idx],
        );

        let state = &mut states[idx];
        let edge_backlog_before = state.h_edge;
        state.apply_slot(&events[idx], slot_decision.alpha, &served);
        debug_assert!(state.check_non_negative().is_ok());

        total_energy += served.local_energy_j + served.tx_energy_j;
        latency_sum += state.total_backlog_bits()
            / events[idx].arrival_bits.max(LATENCY_ARRIVAL_FLOOR)
            * 1000.0;

        sensors.push(SensorSlotResult {
            id: sensor.id.clone(),
            h_local: state.h_local,
            h_offload: state.h_offload,
            h_edge: state.h_edge,
            alpha: slot_decision.alpha,
            local_energy_j: served.local_energy_j,
            tx_energy_j: served.tx_energy_j,
            tx_power_w: slot_decision.tx_power_w,
            cpu_hz: slot_decision.cpu_hz,
            arrival_bits: events[idx].arrival_bits,
            harvest_j: events[idx].harvest_j,
            battery_j: state.battery_j,
        });
        edge_sensors.push(EdgeSensorResult {
            id: sensor.id.clone(),
            share,
            processed_bits: served.edge_bits.min(edge_backlog_before),
        });
    }

    let total_backlog: f64 = states.iter().map(SensorState::total_backlog_bits).sum();
    let metrics = SlotMetrics {
        total_backlog_bits: total_backlog,
        total_energy_j: total_energy,
        best_fitness: -total_energy - BACKLOG_FITNESS_WEIGHT * total_backlog,
        avg_latency_ms: latency_sum / config.sensors.len() as f64,
    };

    SlotRecord {
        slot,
        algorithm: algorithm.to_string(),
        sensors,
        edge: EdgeSlotResult {
            sensors: edge_sensors,
        },
        metrics,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config(slots: usize) -> ExperimentConfig {
        let mut config = ExperimentConfig::micro(slots);
        // Keep unit tests quick; integration tests exercise bigger searches.
        config.optimizer.population = 8;
        config.optimizer.generations = 4;
        config.globals.horizon = 2;
        config
    }

    #[tokio::test]
    async fn run_completes_with_full_result_streams() {
        let driver = SimulationDriver::new(config(25)).unwrap();
        let state = driver.run().await;

        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.current_slot, 25);
        assert_eq!(state.baseline_results.len(), 25);
        assert_eq!(state.predictive_results.len(), 25);
        assert!(state.error.is_none());
        assert!(!state.optimizer_log.is_empty());
        for (i, record) in state.baseline_results.iter().enumerate() {
            assert_eq!(record.slot, i);
            assert_eq!(record.algorithm, "baseline");
        }
    }

    #[tokio::test]
    async fn run_id_has_canonical_uuid_form() {
        let driver = SimulationDriver::new(config(1)).unwrap();
        let state = driver.run().await;
        let groups: Vec<&str> = state.run_id.split('-').collect();
        let lengths: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(lengths, vec![8, 4, 4, 4, 12]);
    }

    #[test]
    fn empty_sensor_list_is_rejected_before_slot_zero() {
        let mut bad = config(10);
        bad.sensors.clear();
        let result = SimulationDriver::new(bad);
        assert!(matches!(
            result,
            Err(SimulationError::Config(ConfigError::EmptySensorList))
        ));
    }

    #[tokio::test]
    async fn progress_callback_fires_once_per_slot() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let driver = SimulationDriver::new(config(12))
            .unwrap()
            .on_progress(Box::new(move |state| {
                seen.fetch_add(1, Ordering::SeqCst);
                assert_eq!(state.status, RunStatus::Running);
            }));
        let state = driver.run().await;
        assert_eq!(count.load(Ordering::SeqCst), 12);
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn panicking_progress_callback_does_not_corrupt_the_run() {
        let driver = SimulationDriver::new(config(5))
            .unwrap()
            .on_progress(Box::new(|_| panic!("host bug")));
        let state = driver.run().await;
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.baseline_results.len(), 5);
    }

    #[tokio::test]
    async fn optimizer_log_callback_receives_sensor_ids() {
        let ids = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&ids);
        let driver = SimulationDriver::new(config(3))
            .unwrap()
            .on_optimizer_log(Box::new(move |sensor_id, entry| {
                assert!(entry.generation < 4);
                sink.lock().unwrap().push(sensor_id.to_string());
            }));
        let state = driver.run().await;
        assert_eq!(state.status, RunStatus::Completed);
        let ids = ids.lock().unwrap();
        assert!(ids.contains(&"sensor-1".to_string()));
        assert!(ids.contains(&"sensor-2".to_string()));
    }

    #[tokio::test]
    async fn pre_cancelled_token_stops_at_first_yield() {
        let token = CancellationToken::new();
        token.cancel();
        let driver = SimulationDriver::new(config(100)).unwrap();
        let state = driver.run_until_cancelled(token).await;
        assert_eq!(state.status, RunStatus::Cancelled);
        // The first poll happens after ten slots.
        assert_eq!(state.current_slot, YIELD_INTERVAL_SLOTS);
        assert_eq!(state.baseline_results.len(), YIELD_INTERVAL_SLOTS);
    }

    #[tokio::test]
    async fn reruns_are_bit_identical() {
        let a = SimulationDriver::new(config(15)).unwrap().run().await;
        let b = SimulationDriver::new(config(15)).unwrap().run().await;
        assert_eq!(a.baseline_results, b.baseline_results);
        assert_eq!(a.predictive_results, b.predictive_results);
        // Telemetry matches generation-for-generation apart from wall-clock.
        assert_eq!(a.optimizer_log.len(), b.optimizer_log.len());
        for (x, y) in a.optimizer_log.iter().zip(&b.optimizer_log) {
            assert_eq!(x.slot, y.slot);
            assert_eq!(x.generation, y.generation);
            assert_eq!(x.best_fitness, y.best_fitness);
            assert_eq!(x.avg_fitness, y.avg_fitness);
            assert_eq!(x.infeasible_count, y.infeasible_count);
        }
    }

    #[tokio::test]
    async fn invariants_hold_over_a_run() {
        let state = SimulationDriver::new(config(30)).unwrap().run().await;
        for record in state
            .baseline_results
            .iter()
            .chain(&state.predictive_results)
        {
            let mut share_sum = 0.0;
            for sensor in &record.sensors {
                assert!(sensor.h_local >= 0.0);
                assert!(sensor.h_offload >= 0.0);
                assert!(sensor.h_edge >= 0.0);
                assert!(sensor.battery_j >= 0.0);
                assert!((0.0..=1.0).contains(&sensor.alpha));
            }
            for edge in &record.edge.sensors {
                assert!((0.0..=1.0).contains(&edge.share));
                share_sum += edge.share;
            }
            assert!(share_sum <= 1.0 + 1e-9);
        }
    }
}
