//! driftsim - slotted simulation core for edge-offloading policy research.

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! This crate compares two online task-scheduling and resource-allocation
//! policies for self-powered IoT sensors offloading computation to an edge
//! server: a Lyapunov drift-plus-penalty baseline and a model-predictive
//! extension driven by EWMA forecasts and a population-based stochastic
//! optimizer. Given a fully specified [`ExperimentConfig`], the driver
//! executes a slotted simulation over both policies in lockstep, producing
//! per-slot decisions, queue and battery trajectories, and optimizer
//! telemetry.
//!
//! # Reproducibility
//!
//! Every stochastic draw flows through a seeded Mulberry32 stream; for a
//! fixed (configuration, seed) pair the full result stream is bit-identical
//! across runs and platforms (modulo ULP-level libm differences). The two
//! policies own independent streams seeded `seed` and `seed + 1`.
//!
//! # Example
//!
//! ```rust,no_run
//! use driftsim::{ExperimentConfig, SimulationDriver};
//!
//! # async fn demo() -> Result<(), driftsim::SimulationError> {
//! let config = ExperimentConfig::micro(200);
//! let driver = SimulationDriver::new(config)?;
//! let state = driver.run().await;
//! println!("{} slots, status {:?}", state.current_slot, state.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod events;
pub mod export;
pub mod policy;
pub mod rng;
pub mod state;
pub mod tracing_setup;

// Re-export the main surface for convenient access
pub use config::{
    ArrivalModel, ConfigError, EdgeServerConfig, ExperimentConfig, GlobalParams, HarvestModel,
    OffloadMode, OptimizerParams, PredictionConfig, SensorConfig,
};
pub use driver::{
    RunStatus, SimulationDriver, SimulationError, SimulationState, SlotMetrics, SlotRecord,
};
pub use export::{export_csv, import_csv, ExportError};
pub use policy::{
    BaselinePolicy, DifferentialEvolution, GeneticOptimizer, OptimizerLogEntry, PredictivePolicy,
    SlotPolicy, StochasticOptimizer,
};
pub use rng::DeterministicRng;
pub use state::SensorState;
pub use tracing_setup::init_tracing;

/// Errors that can bubble up from any driftsim subsystem.
#[derive(Debug, thiserror::Error)]
pub enum DriftsimError {
    /// Configuration parsing or validation errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Run setup or execution errors
    #[error("simulation error: {0}")]
    Simulation(#[from] SimulationError),

    /// Results CSV parsing errors
    #[error("export error: {0}")]
    Export(#[from] ExportError),
}

/// Convenience Result type using [`DriftsimError`] as the error type.
pub type Result<T> = std::result::Result<T, DriftsimError>;
