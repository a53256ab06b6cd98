//! Experiment configuration for simulation runs.
//!
//! All tunable parameters live here, grouped into sensor, edge-server,
//! global, optimizer, and prediction sections. A configuration is immutable
//! for the lifetime of a run; [`ExperimentConfig::validate`] rejects
//! malformed inputs before any state is constructed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The sensor list is empty; a run needs at least one sensor.
    #[error("experiment configuration has no sensors")]
    EmptySensorList,

    /// Two sensors share the same identifier.
    #[error("duplicate sensor id: {id}")]
    DuplicateSensorId {
        /// The repeated identifier
        id: String,
    },

    /// A numeric field is outside its allowed range.
    #[error("invalid value {value} for {field}: must be {requirement}")]
    OutOfRange {
        /// Dotted path of the offending field
        field: String,
        /// The rejected value
        value: f64,
        /// Human-readable constraint, e.g. "> 0"
        requirement: &'static str,
    },

    /// The configuration JSON could not be parsed.
    #[error("configuration JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How task bits arrive at a sensor each slot.
///
/// Tagged union; the `type` discriminator is stable across versions so
/// exported configurations remain importable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArrivalModel {
    /// K ~ Poisson(lambda) arrivals, each of the sensor's mean size.
    Poisson {
        /// Mean event count per slot
        lambda: f64,
    },
    /// The same number of bits every slot.
    Fixed {
        /// Bits per slot; falls back to the sensor's mean arrival when absent
        #[serde(default)]
        value_bits: Option<f64>,
    },
    /// Uniform draw between two bounds.
    Uniform {
        /// Lower bound in bits; defaults to half the sensor's mean arrival
        #[serde(default)]
        min_bits: Option<f64>,
        /// Upper bound in bits; defaults to 1.5x the sensor's mean arrival
        #[serde(default)]
        max_bits: Option<f64>,
    },
}

/// How harvested energy arrives at a sensor each slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HarvestModel {
    /// All-or-nothing harvest: `value_j` with the given probability, else 0.
    Bernoulli {
        /// Probability of a harvest event in [0, 1]
        probability: f64,
        /// Energy delivered on a successful slot, joules
        value_j: f64,
    },
    /// The same energy every slot.
    Constant {
        /// Energy per slot, joules
        value_j: f64,
    },
    /// Gaussian harvest, clipped at zero.
    Gaussian {
        /// Mean energy per slot, joules
        mean_j: f64,
        /// Standard deviation, joules
        std_j: f64,
    },
}

/// Whether a sensor offloads whole task batches or arbitrary fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffloadMode {
    /// The scheduling decision is a bit: all arrivals go local or offload.
    Binary,
    /// The scheduling decision is a fraction alpha in [0, 1].
    Fractional,
}

/// Immutable per-sensor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Unique identifier within the experiment
    pub id: String,
    /// Mean arrival size in bits per slot
    pub mean_arrival_bits: f64,
    /// Arrival process model
    pub arrival: ArrivalModel,
    /// Backlog at slot 0, bits (split evenly between local and offload queues)
    pub initial_queue_bits: f64,
    /// Battery charge at slot 0, joules
    pub initial_battery_j: f64,
    /// Mean harvested energy per slot, joules
    pub mean_harvest_j: f64,
    /// Harvest process model
    pub harvest: HarvestModel,
    /// Maximum local CPU frequency, Hz
    pub max_cpu_hz: f64,
    /// CPU cycles required per bit; falls back to the global default
    #[serde(default)]
    pub cycles_per_bit: Option<f64>,
    /// Maximum transmit power, watts
    pub max_tx_power_w: f64,
    /// Mean channel gain, linear scale
    pub mean_channel_gain: f64,
    /// Channel gain variance
    pub channel_variance: f64,
    /// Offload decision granularity
    pub offload_mode: OffloadMode,
    /// Relative weight in the edge resource allocation, > 0
    pub priority_weight: f64,
}

impl SensorConfig {
    /// Creates a sensor with the given id and plausible defaults for an
    /// energy-harvesting IoT node. Intended for tests and presets.
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mean_arrival_bits: 100_000.0,
            arrival: ArrivalModel::Poisson { lambda: 1.0 },
            initial_queue_bits: 200_000.0,
            initial_battery_j: 10.0,
            mean_harvest_j: 0.06,
            harvest: HarvestModel::Bernoulli {
                probability: 0.6,
                value_j: 0.1,
            },
            max_cpu_hz: 1e9,
            cycles_per_bit: None,
            max_tx_power_w: 0.5,
            mean_channel_gain: 1e-6,
            channel_variance: 1e-14,
            offload_mode: OffloadMode::Binary,
            priority_weight: 1.0,
        }
    }

    /// Cycles needed to process one bit locally, resolving the global
    /// default when the sensor does not override it.
    pub fn cycles_per_bit(&self, globals: &GlobalParams) -> f64 {
        self.cycles_per_bit.unwrap_or(globals.default_cycles_per_bit)
    }

    fn validate(&self, globals: &GlobalParams) -> Result<(), ConfigError> {
        let field = |name: &str| format!("sensors[{}].{name}", self.id);

        require_non_negative(&field("mean_arrival_bits"), self.mean_arrival_bits)?;
        require_non_negative(&field("initial_queue_bits"), self.initial_queue_bits)?;
        require_non_negative(&field("initial_battery_j"), self.initial_battery_j)?;
        require_non_negative(&field("mean_harvest_j"), self.mean_harvest_j)?;
        require_positive(&field("max_cpu_hz"), self.max_cpu_hz)?;
        require_positive(&field("cycles_per_bit"), self.cycles_per_bit(globals))?;
        require_non_negative(&field("max_tx_power_w"), self.max_tx_power_w)?;
        require_positive(&field("mean_channel_gain"), self.mean_channel_gain)?;
        require_non_negative(&field("channel_variance"), self.channel_variance)?;
        require_positive(&field("priority_weight"), self.priority_weight)?;

        match &self.arrival {
            ArrivalModel::Poisson { lambda } => {
                require_non_negative(&field("arrival.lambda"), *lambda)?;
            }
            ArrivalModel::Fixed { value_bits } => {
                if let Some(bits) = value_bits {
                    require_non_negative(&field("arrival.value_bits"), *bits)?;
                }
            }
            ArrivalModel::Uniform { min_bits, max_bits } => {
                if let (Some(lo), Some(hi)) = (min_bits, max_bits) {
                    if lo > hi {
                        return Err(ConfigError::OutOfRange {
                            field: field("arrival.min_bits"),
                            value: *lo,
                            requirement: "<= max_bits",
                        });
                    }
                }
            }
        }

        match &self.harvest {
            HarvestModel::Bernoulli {
                probability,
                value_j,
            } => {
                require_unit_interval(&field("harvest.probability"), *probability)?;
                require_non_negative(&field("harvest.value_j"), *value_j)?;
            }
            HarvestModel::Constant { value_j } => {
                require_non_negative(&field("harvest.value_j"), *value_j)?;
            }
            HarvestModel::Gaussian { std_j, .. } => {
                require_non_negative(&field("harvest.std_j"), *std_j)?;
            }
        }

        Ok(())
    }
}

/// Immutable edge-server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeServerConfig {
    /// Server identifier
    pub id: String,
    /// CPU frequency applied to offloaded work, Hz
    pub cpu_hz: f64,
    /// Core count (informational; the allocator works on frequency shares)
    pub cores: u32,
    /// Maximum CPU frequency, Hz
    pub max_cpu_hz: f64,
}

impl Default for EdgeServerConfig {
    fn default() -> Self {
        Self {
            id: "edge-0".to_string(),
            cpu_hz: 1e10,
            cores: 8,
            max_cpu_hz: 1e10,
        }
    }
}

/// Scalar parameters shared by every sensor and both policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalParams {
    /// Lyapunov trade-off V; larger values favor energy over queue depth
    pub tradeoff_v: f64,
    /// Slot duration tau, seconds
    pub slot_duration_s: f64,
    /// Channel bandwidth W, Hz
    pub bandwidth_hz: f64,
    /// Effective switched-capacitance coefficient theta (E = theta f^3 tau)
    pub cpu_energy_coeff: f64,
    /// Receiver noise power sigma^2, watts
    pub noise_power_w: f64,
    /// Cycles per bit used when a sensor does not specify its own
    pub default_cycles_per_bit: f64,
    /// Prediction horizon H in slots; 0 disables the predictive layer
    pub horizon: usize,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            tradeoff_v: 1e8,
            slot_duration_s: 1.0,
            bandwidth_hz: 1e6,
            cpu_energy_coeff: 1e-27, // ~1 J per slot at 1 GHz
            noise_power_w: 1e-13,
            default_cycles_per_bit: 1000.0,
            horizon: 5,
        }
    }
}

/// Parameters of the predictive policy's stochastic optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerParams {
    /// Population size P (at least 2)
    pub population: usize,
    /// Generation count G
    pub generations: usize,
    /// Per-gene mutation probability in [0, 1]
    pub mutation_prob: f64,
    /// Random restarts beyond the initial run
    pub restarts: usize,
    /// Experiment seed; the baseline stream uses `seed`, predictive `seed + 1`
    pub seed: u32,
    /// Wall-clock budget per decision; `None` means unbounded
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            population: 30,
            generations: 20,
            mutation_prob: 0.1,
            restarts: 0,
            seed: 42,
            time_budget_ms: None,
        }
    }
}

/// Knobs of the horizon predictor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Draw horizon-perturbation noise from an unseeded source instead of
    /// the predictive policy's seeded sub-stream. Off by default: seeded
    /// noise keeps predictive runs replayable. Enable only to replicate
    /// result sets produced with unseeded noise.
    #[serde(default)]
    pub legacy_unseeded_noise: bool,
}

/// A fully specified experiment: sensors, edge server, globals, optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Ordered sensor list; order determines the draw sequence
    pub sensors: Vec<SensorConfig>,
    /// The single edge server all sensors offload to
    pub edge: EdgeServerConfig,
    /// Shared scalar parameters
    pub globals: GlobalParams,
    /// Stochastic optimizer parameters
    pub optimizer: OptimizerParams,
    /// Predictor behavior switches
    #[serde(default)]
    pub prediction: PredictionConfig,
    /// Number of slots to simulate
    pub total_slots: usize,
}

impl ExperimentConfig {
    /// Builds a two-sensor micro experiment useful for tests and demos.
    pub fn micro(total_slots: usize) -> Self {
        Self {
            sensors: vec![
                SensorConfig::named("sensor-1"),
                SensorConfig::named("sensor-2"),
            ],
            edge: EdgeServerConfig::default(),
            globals: GlobalParams::default(),
            optimizer: OptimizerParams::default(),
            prediction: PredictionConfig::default(),
            total_slots,
        }
    }

    /// Parses a configuration from its JSON form and validates it.
    ///
    /// # Errors
    /// - `ConfigError::Json` - Malformed JSON or unknown model tags
    /// - Any validation error of [`ExperimentConfig::validate`]
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to pretty-printed JSON with stable
    /// field names and `type` discriminators.
    ///
    /// # Errors
    /// - `ConfigError::Json` - Serialization failure (not expected for
    ///   well-formed configurations)
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks every range constraint of the data model.
    ///
    /// # Errors
    /// - `ConfigError::EmptySensorList` - No sensors configured
    /// - `ConfigError::DuplicateSensorId` - Sensor ids are not unique
    /// - `ConfigError::OutOfRange` - A numeric field violates its bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensors.is_empty() {
            return Err(ConfigError::EmptySensorList);
        }
        let mut seen = std::collections::HashSet::new();
        for sensor in &self.sensors {
            if !seen.insert(sensor.id.as_str()) {
                return Err(ConfigError::DuplicateSensorId {
                    id: sensor.id.clone(),
                });
            }
            sensor.validate(&self.globals)?;
        }

        require_positive("total_slots", self.total_slots as f64)?;
        require_positive("globals.tradeoff_v", self.globals.tradeoff_v)?;
        require_positive("globals.slot_duration_s", self.globals.slot_duration_s)?;
        require_positive("globals.bandwidth_hz", self.globals.bandwidth_hz)?;
        require_positive("globals.cpu_energy_coeff", self.globals.cpu_energy_coeff)?;
        require_positive("globals.noise_power_w", self.globals.noise_power_w)?;
        require_positive(
            "globals.default_cycles_per_bit",
            self.globals.default_cycles_per_bit,
        )?;
        require_positive("edge.cpu_hz", self.edge.cpu_hz)?;

        if self.optimizer.population < 2 {
            return Err(ConfigError::OutOfRange {
                field: "optimizer.population".to_string(),
                value: self.optimizer.population as f64,
                requirement: ">= 2",
            });
        }
        require_positive("optimizer.generations", self.optimizer.generations as f64)?;
        require_unit_interval("optimizer.mutation_prob", self.optimizer.mutation_prob)?;

        Ok(())
    }
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            requirement: "> 0",
        })
    }
}

fn require_non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            requirement: ">= 0",
        })
    }
}

fn require_unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            requirement: "in [0, 1]",
        })
    }
}
