//! Run and solver configuration, with startup validation.
//!
//! Both structs are plain serde data with defaults, so any front end (JSON
//! file, command line, test fixture) can produce them. [`RunConfig::validate`]
//! runs before the main loop and turns contradictory settings into a fatal
//! [`EngineError`].

use std::time::Duration;

use crate::engine_error::EngineError;
use crate::solver::SolverKind;
use crate::solver::time_step::TimeStepping;

/// Settings of one solver instance.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SolverSpec {
    pub identifier: String,
    pub kind: SolverKind,
    pub variables: usize,
    pub parameters: usize,
    /// Interior nodes per axis and patch.
    pub nodes_per_axis: usize,
    pub ghost_layer_width: usize,
    /// Patches are created on the coarsest level not larger than this.
    pub maximum_mesh_size: f64,
    /// Levels of adaptive refinement below the coarsest level.
    pub maximum_adaptive_mesh_depth: u32,
    pub time_stepping: TimeStepping,
}

impl Default for SolverSpec {
    fn default() -> Self {
        Self {
            identifier: "solver".into(),
            kind: SolverKind::FiniteVolumes,
            variables: 1,
            parameters: 0,
            nodes_per_axis: 4,
            ghost_layer_width: 1,
            maximum_mesh_size: 1.0,
            maximum_adaptive_mesh_depth: 0,
            time_stepping: TimeStepping::Global,
        }
    }
}

impl SolverSpec {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.variables == 0 {
            return Err(EngineError::InvalidConfig {
                field: "variables",
                reason: format!("solver `{}` declares no variables", self.identifier),
            });
        }
        if self.nodes_per_axis == 0 {
            return Err(EngineError::InvalidConfig {
                field: "nodes_per_axis",
                reason: format!("solver `{}` declares no nodes", self.identifier),
            });
        }
        if self.ghost_layer_width == 0 || self.ghost_layer_width > self.nodes_per_axis {
            return Err(EngineError::InvalidConfig {
                field: "ghost_layer_width",
                reason: format!(
                    "solver `{}`: must lie in 1..={}, got {}",
                    self.identifier, self.nodes_per_axis, self.ghost_layer_width
                ),
            });
        }
        if !(self.maximum_mesh_size.is_finite() && self.maximum_mesh_size > 0.0) {
            return Err(EngineError::InvalidConfig {
                field: "maximum_mesh_size",
                reason: format!(
                    "solver `{}`: must be finite and positive, got {}",
                    self.identifier, self.maximum_mesh_size
                ),
            });
        }
        Ok(())
    }
}

/// Global run settings.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub end_time: f64,
    /// Merge prediction and correction into one traversal per step.
    pub fuse_algorithmic_steps: bool,
    /// Scales the batch of fixed-size steps run between orchestrator checks.
    pub timestep_batch_factor: f64,
    /// Exchange boundary data inside batched steps (only honoured while the
    /// grid is stationary).
    pub exchange_boundary_data_in_batched_time_steps: bool,
    /// Reduce step sizes only after the last iteration of a batch.
    pub skip_reduction_in_batched_time_steps: bool,
    /// `0` disables compression.
    pub compression_accuracy: f64,
    pub spawn_compression_as_background_task: bool,
    /// Background pool size; `0` runs compression inline.
    pub background_threads: usize,
    /// How long a receive may wait for its counterpart message.
    pub message_timeout_ms: u64,
    /// Time between plots; `None` never plots.
    pub plot_interval: Option<f64>,
    /// Rank that merges worker reports and broadcasts step data.
    pub coordinator_rank: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            end_time: 1.0,
            fuse_algorithmic_steps: true,
            timestep_batch_factor: 1.0,
            exchange_boundary_data_in_batched_time_steps: true,
            skip_reduction_in_batched_time_steps: false,
            compression_accuracy: 0.0,
            spawn_compression_as_background_task: false,
            background_threads: 0,
            message_timeout_ms: 10_000,
            plot_interval: None,
            coordinator_rank: 0,
        }
    }
}

impl RunConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    /// Reject out-of-range and contradictory settings.
    pub fn validate(&self, solvers: &[SolverSpec]) -> Result<(), EngineError> {
        if !(self.end_time.is_finite() && self.end_time >= 0.0) {
            return Err(EngineError::InvalidConfig {
                field: "end_time",
                reason: format!("must be finite and non-negative, got {}", self.end_time),
            });
        }
        if !(self.timestep_batch_factor.is_finite() && self.timestep_batch_factor > 0.0) {
            return Err(EngineError::InvalidConfig {
                field: "timestep_batch_factor",
                reason: format!("must be finite and positive, got {}", self.timestep_batch_factor),
            });
        }
        if !(self.compression_accuracy.is_finite() && self.compression_accuracy >= 0.0) {
            return Err(EngineError::InvalidConfig {
                field: "compression_accuracy",
                reason: format!("must be finite and non-negative, got {}", self.compression_accuracy),
            });
        }
        if let Some(dt) = self.plot_interval {
            if !(dt.is_finite() && dt > 0.0) {
                return Err(EngineError::InvalidConfig {
                    field: "plot_interval",
                    reason: format!("must be finite and positive, got {dt}"),
                });
            }
        }
        for s in solvers {
            s.validate()?;
        }

        if !self.fuse_algorithmic_steps {
            if let Some(s) = solvers.iter().find(|s| s.kind == SolverKind::Limiting) {
                return Err(EngineError::ContradictoryConfig(format!(
                    "limiting solver `{}` requires fused algorithmic steps",
                    s.identifier
                )));
            }
            if let Some(s) = solvers.iter().find(|s| s.maximum_adaptive_mesh_depth > 0) {
                return Err(EngineError::ContradictoryConfig(format!(
                    "adaptive refinement of solver `{}` requires fused algorithmic steps",
                    s.identifier
                )));
            }
            if self.compression_accuracy > 0.0 {
                return Err(EngineError::ContradictoryConfig(
                    "data compression requires fused algorithmic steps".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RunConfig::default()
            .validate(&[SolverSpec::default()])
            .unwrap();
    }

    #[test]
    fn adaptivity_without_fusion_is_contradictory() {
        let cfg = RunConfig {
            fuse_algorithmic_steps: false,
            ..RunConfig::default()
        };
        let spec = SolverSpec {
            maximum_adaptive_mesh_depth: 2,
            ..SolverSpec::default()
        };
        assert!(matches!(
            cfg.validate(&[spec]),
            Err(EngineError::ContradictoryConfig(_))
        ));
        let limiting = SolverSpec {
            kind: SolverKind::Limiting,
            ..SolverSpec::default()
        };
        assert!(cfg.validate(&[limiting]).is_err());
        assert!(cfg.validate(&[SolverSpec::default()]).is_ok());
    }

    #[test]
    fn out_of_range_values() {
        let bad_end = RunConfig {
            end_time: f64::NAN,
            ..RunConfig::default()
        };
        assert!(matches!(
            bad_end.validate(&[]),
            Err(EngineError::InvalidConfig { field: "end_time", .. })
        ));
        let bad_ghost = SolverSpec {
            ghost_layer_width: 5,
            ..SolverSpec::default()
        };
        assert!(RunConfig::default().validate(&[bad_ghost]).is_err());
        let bad_plot = RunConfig {
            plot_interval: Some(0.0),
            ..RunConfig::default()
        };
        assert!(bad_plot.validate(&[]).is_err());
    }
}
