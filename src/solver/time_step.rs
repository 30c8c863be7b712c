//! Solver-global time-step state of one rank.
//!
//! The state is read-only while a traversal runs; it only changes between
//! phases, through [`TimeStepState::start_new_time_step`],
//! [`TimeStepState::rollback_to_previous_time_step`] or the reduction hooks.
//!
//! ```text
//! Uninitialised --initialise--> Ready --begin_phase--> Advancing
//!       Ready/Advancing --start_new_time_step--> Ready
//!       Ready --rollback_to_previous_time_step--> RolledBack --begin_phase--> Advancing
//! ```

use crate::algs::reduction::{ReductionReport, TimeStepBroadcast};
use crate::engine_error::EngineError;

/// How the next step size is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TimeStepping {
    /// Recompute the admissible step size every step.
    #[default]
    Global,
    /// Keep the first admissible step size for the whole run.
    GlobalFixed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepperState {
    Uninitialised,
    Ready,
    Advancing,
    RolledBack,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimeStepState {
    time_stepping: TimeStepping,
    stepper: StepperState,

    previous_min_time_step_size: f64,
    min_time_stamp: f64,
    min_time_step_size: f64,
    min_next_time_step_size: f64,

    min_cell_size: f64,
    max_cell_size: f64,
    next_min_cell_size: f64,
    next_max_cell_size: f64,

    mesh_update_request: bool,
    next_mesh_update_request: bool,
}

impl TimeStepState {
    pub fn new(time_stepping: TimeStepping) -> Self {
        Self {
            time_stepping,
            stepper: StepperState::Uninitialised,
            previous_min_time_step_size: f64::INFINITY,
            min_time_stamp: f64::INFINITY,
            min_time_step_size: f64::INFINITY,
            min_next_time_step_size: f64::INFINITY,
            min_cell_size: f64::INFINITY,
            max_cell_size: f64::NEG_INFINITY,
            next_min_cell_size: f64::INFINITY,
            next_max_cell_size: f64::NEG_INFINITY,
            mesh_update_request: false,
            next_mesh_update_request: false,
        }
    }

    /// Zero previous/current step sizes so the very first rollback is
    /// harmless, and request the initial mesh construction.
    pub fn initialise(&mut self, time_stamp: f64) {
        self.previous_min_time_step_size = 0.0;
        self.min_time_step_size = 0.0;
        self.min_time_stamp = time_stamp;
        self.mesh_update_request = true;
        self.stepper = StepperState::Ready;
    }

    pub fn begin_phase(&mut self) -> Result<(), EngineError> {
        match self.stepper {
            StepperState::Uninitialised => Err(self.transition_error("begin_phase")),
            _ => {
                self.stepper = StepperState::Advancing;
                Ok(())
            }
        }
    }

    /// previous ← current, stamp += current, current ← next; next is reset to
    /// +∞ for [`TimeStepping::Global`] and kept for
    /// [`TimeStepping::GlobalFixed`]. Cell-size bounds move the same way.
    pub fn start_new_time_step(&mut self) -> Result<(), EngineError> {
        if self.stepper == StepperState::Uninitialised {
            return Err(self.transition_error("start_new_time_step"));
        }
        self.previous_min_time_step_size = self.min_time_step_size;
        self.min_time_stamp += self.min_time_step_size;
        self.min_time_step_size = self.min_next_time_step_size;
        if self.time_stepping == TimeStepping::Global {
            self.min_next_time_step_size = f64::INFINITY;
        }

        self.min_cell_size = self.next_min_cell_size;
        self.max_cell_size = self.next_max_cell_size;
        self.next_min_cell_size = f64::INFINITY;
        self.next_max_cell_size = f64::NEG_INFINITY;

        // sticky until the orchestrator consumes it
        self.mesh_update_request |= self.next_mesh_update_request;
        self.next_mesh_update_request = false;

        self.stepper = StepperState::Ready;
        Ok(())
    }

    /// stamp −= previous, current ← previous, previous ← +∞.
    pub fn rollback_to_previous_time_step(&mut self) -> Result<(), EngineError> {
        if self.stepper != StepperState::Ready {
            return Err(self.transition_error("rollback_to_previous_time_step"));
        }
        self.min_time_stamp -= self.previous_min_time_step_size;
        self.min_time_step_size = self.previous_min_time_step_size;
        self.previous_min_time_step_size = f64::INFINITY;
        if self.time_stepping == TimeStepping::Global {
            self.min_next_time_step_size = f64::INFINITY;
        }
        self.stepper = StepperState::RolledBack;
        Ok(())
    }

    pub fn zero_time_step_sizes(&mut self) {
        self.min_time_step_size = 0.0;
    }

    #[inline]
    pub fn update_min_next_time_step_size(&mut self, value: f64) {
        self.min_next_time_step_size = self.min_next_time_step_size.min(value);
    }

    /// Fold a patch extent into the next cell-size bounds.
    pub fn update_next_cell_size(&mut self, size: f64) {
        self.next_min_cell_size = self.next_min_cell_size.min(size);
        self.next_max_cell_size = self.next_max_cell_size.max(size);
    }

    #[inline]
    pub fn request_mesh_update(&mut self) {
        self.next_mesh_update_request = true;
    }

    pub fn clear_mesh_update_request(&mut self) {
        self.mesh_update_request = false;
    }

    // --- reduction hooks ----------------------------------------------------

    /// Values this rank reports to the coordinator, read after its own
    /// `start_new_time_step`.
    pub fn report(&self) -> ReductionReport {
        ReductionReport {
            min_next_time_step_size: self.min_time_step_size,
            mesh_update_requested: self.mesh_update_request,
            min_cell_size: self.min_cell_size,
            max_cell_size: self.max_cell_size,
        }
    }

    /// Fold a worker report into the coordinator's next-step quantities.
    pub fn merge_worker_report(&mut self, report: &ReductionReport) {
        self.update_min_next_time_step_size(report.min_next_time_step_size);
        self.next_mesh_update_request |= report.mesh_update_requested;
        self.next_min_cell_size = self.next_min_cell_size.min(report.min_cell_size);
        self.next_max_cell_size = self.next_max_cell_size.max(report.max_cell_size);
    }

    pub fn broadcast(&self) -> TimeStepBroadcast {
        TimeStepBroadcast {
            min_time_stamp: self.min_time_stamp,
            min_time_step_size: self.min_time_step_size,
            min_cell_size: self.min_cell_size,
            max_cell_size: self.max_cell_size,
        }
    }

    /// Replace the current fields by the coordinator's values.
    pub fn adopt_broadcast(&mut self, b: &TimeStepBroadcast) -> Result<(), EngineError> {
        if self.stepper == StepperState::Uninitialised {
            return Err(self.transition_error("adopt_broadcast"));
        }
        self.min_time_stamp = b.min_time_stamp;
        self.min_time_step_size = b.min_time_step_size;
        self.min_cell_size = b.min_cell_size;
        self.max_cell_size = b.max_cell_size;
        self.stepper = StepperState::Ready;
        Ok(())
    }

    /// Adopt the coordinator's reduced mesh-update flag.
    pub fn set_mesh_update_request(&mut self, requested: bool) {
        self.mesh_update_request = requested;
    }

    // --- accessors ----------------------------------------------------------

    #[inline]
    pub fn time_stepping(&self) -> TimeStepping {
        self.time_stepping
    }
    #[inline]
    pub fn stepper(&self) -> StepperState {
        self.stepper
    }
    #[inline]
    pub fn previous_min_time_step_size(&self) -> f64 {
        self.previous_min_time_step_size
    }
    #[inline]
    pub fn min_time_stamp(&self) -> f64 {
        self.min_time_stamp
    }
    #[inline]
    pub fn min_time_step_size(&self) -> f64 {
        self.min_time_step_size
    }
    #[inline]
    pub fn min_next_time_step_size(&self) -> f64 {
        self.min_next_time_step_size
    }
    #[inline]
    pub fn min_cell_size(&self) -> f64 {
        self.min_cell_size
    }
    #[inline]
    pub fn max_cell_size(&self) -> f64 {
        self.max_cell_size
    }
    #[inline]
    pub fn mesh_update_request(&self) -> bool {
        self.mesh_update_request
    }

    fn transition_error(&self, operation: &'static str) -> EngineError {
        EngineError::InvalidStepperTransition {
            from: self.stepper,
            operation,
        }
    }
}
