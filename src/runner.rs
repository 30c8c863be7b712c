//! The phase orchestrator.
//!
//! [`Runner::run`] drives a [`Repository`] through mesh construction, the
//! initial prediction, the time-stepping loop and the corrective phases that
//! solver requests ask for, until the minimal time stamp reaches the end
//! time.
//!
//! ```text
//! MeshRefinement -> {FusedPredictionInit | Prediction}
//!   -> loop { FusedTimeStep x n
//!             [-> LimiterStatusSpreading -> MeshRefinement
//!                 -> Reinitialisation -> LocalRecomputation -> FusedInit
//!                 -> GlobalRecomputation]
//!             [-> PredictionRerun] }
//!   -> terminate
//! ```

use log::{error, info, warn};

use crate::algs::communicator::Communicator;
use crate::context::SimulationContext;
use crate::engine_error::EngineError;
use crate::geometry::{equals, greater, smaller};
use crate::phase::Phase;
use crate::solver::time_step::TimeStepping;
use crate::traversal::Repository;

/// Extra mesh-refinement iterations after the grid settled.
pub const EXTRA_MESH_REFINEMENT_ITERATIONS: usize = 3;
/// Extra iterations when a global recomputation is pending, so limiter
/// status information can travel further.
pub const EXTRA_MESH_REFINEMENT_ITERATIONS_FOR_GLOBAL_RECOMPUTATION: usize = 5;
pub const LIMITER_STATUS_SPREADING_ITERATIONS: usize = 5;
/// A minimal time stamp beyond this means the run diverged.
pub const DIVERGENCE_THRESHOLD: f64 = f64::MAX / 100.0;

/// When the next plot is due. Writing plots is left to the embedding code.
#[derive(Clone, Debug, PartialEq)]
pub struct PlotSchedule {
    interval: Option<f64>,
    next: f64,
}

impl PlotSchedule {
    pub fn new(interval: Option<f64>, start: f64) -> Self {
        Self {
            interval,
            next: if interval.is_some() { start } else { f64::INFINITY },
        }
    }

    /// Whether a plot is due at `time_stamp`; if so, the next plot time moves
    /// past it.
    pub fn start_plotting_if_due(&mut self, time_stamp: f64) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        if smaller(time_stamp, self.next) {
            return false;
        }
        while !smaller(time_stamp, self.next) {
            self.next += interval;
        }
        true
    }

    pub fn time_of_next_plot(&self) -> f64 {
        self.next
    }
}

/// What a finished run reports.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunSummary {
    /// Time-stepping iterations (fused steps or unfused passes).
    pub time_steps: usize,
    pub prediction_reruns: usize,
    pub mesh_updates: usize,
    /// Minimal time stamp after every pass of the main loop.
    pub time_stamps: Vec<f64>,
    pub final_time_stamp: f64,
    pub final_time_step_size: f64,
    pub terminated_with_zero_step: bool,
}

pub struct Runner<R> {
    repository: R,
    plots: PlotSchedule,
    summary: RunSummary,
}

impl<R> Runner<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            plots: PlotSchedule::new(None, 0.0),
            summary: RunSummary::default(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn into_repository(self) -> R {
        self.repository
    }

    pub fn run<C: Communicator, const D: usize>(
        &mut self,
        ctx: &mut SimulationContext<C, D>,
    ) -> Result<RunSummary, EngineError>
    where
        R: Repository<C, D>,
    {
        ctx.validate()?;
        ctx.init_solvers(0.0);
        self.plots = PlotSchedule::new(ctx.config().plot_interval, 0.0);
        self.summary = RunSummary::default();

        self.create_mesh(ctx)?;
        self.initialise_mesh(ctx)?;
        let fused = ctx.config().fuse_algorithmic_steps;
        let plot = self.plots.start_plotting_if_due(ctx.min_time_stamp());
        let first = match (fused, plot) {
            (true, true) => Phase::PredictionAndFusedTimeSteppingInitialisationAndPlot,
            (true, false) => Phase::PredictionAndFusedTimeSteppingInitialisation,
            (false, true) => Phase::PredictionAndPlot,
            (false, false) => Phase::Prediction,
        };
        self.run_phase(ctx, first, 1, true)?;
        info!(
            "initialised {} cells, t_min={:e}, dt_min={:e}",
            ctx.store().cell_count(),
            ctx.min_time_stamp(),
            ctx.min_time_step_size()
        );

        let end_time = ctx.config().end_time;
        while smaller(ctx.min_time_stamp(), end_time) && greater(ctx.min_time_step_size(), 0.0) {
            if fused {
                self.run_one_fused_pass(ctx)?;
            } else {
                self.run_one_unfused_pass(ctx)?;
            }
            let t = ctx.min_time_stamp();
            self.summary.time_stamps.push(t);
            info!(
                "step {}: t_min={t:e} t_max={:e} dt_min={:e} dt_max={:e}",
                self.summary.time_steps,
                ctx.max_time_stamp(),
                ctx.min_time_step_size(),
                ctx.max_time_step_size()
            );
            if t > DIVERGENCE_THRESHOLD {
                error!("minimal time stamp {t:e} diverged; aborting");
                return Err(EngineError::NumericalDivergence(format!(
                    "minimal time stamp {t:e} exceeds {DIVERGENCE_THRESHOLD:e}"
                )));
            }
        }

        let dt = ctx.min_time_step_size();
        if equals(dt, 0.0) {
            warn!("run ends with a zero minimal time step size at t={:e}", ctx.min_time_stamp());
            self.summary.terminated_with_zero_step = true;
        }
        self.summary.final_time_stamp = ctx.min_time_stamp();
        self.summary.final_time_step_size = dt;
        self.repository.terminate(ctx)?;
        info!("run finished: {:?}", self.summary);
        Ok(self.summary.clone())
    }

    fn run_phase<C: Communicator, const D: usize>(
        &mut self,
        ctx: &mut SimulationContext<C, D>,
        phase: Phase,
        iterations: usize,
        exchange_boundary_data: bool,
    ) -> Result<(), EngineError>
    where
        R: Repository<C, D>,
    {
        self.repository.switch_to_phase(phase);
        self.repository.iterate(ctx, iterations, exchange_boundary_data)
    }

    /// Refine until the grid and every solver settle, then run a few more
    /// iterations.
    fn create_mesh<C: Communicator, const D: usize>(
        &mut self,
        ctx: &mut SimulationContext<C, D>,
    ) -> Result<(), EngineError>
    where
        R: Repository<C, D>,
    {
        loop {
            self.run_phase(ctx, Phase::MeshRefinement, 1, false)?;
            if !(self.repository.continue_to_construct_grid()
                || ctx.one_solver_has_not_attained_stable_state())
            {
                break;
            }
        }
        let extra = if ctx.global_recomputation_requested() {
            EXTRA_MESH_REFINEMENT_ITERATIONS_FOR_GLOBAL_RECOMPUTATION
        } else {
            EXTRA_MESH_REFINEMENT_ITERATIONS
        };
        self.run_phase(ctx, Phase::MeshRefinement, extra, false)
    }

    fn initialise_mesh<C: Communicator, const D: usize>(
        &mut self,
        ctx: &mut SimulationContext<C, D>,
    ) -> Result<(), EngineError>
    where
        R: Repository<C, D>,
    {
        self.run_phase(ctx, Phase::FinaliseMeshRefinementAndTimeStepSizeComputation, 1, false)?;
        for s in ctx.solvers_mut() {
            s.state_mut().clear_mesh_update_request();
        }
        Ok(())
    }

    /// Fixed-size steps can run in batches up to the next plot or the end
    /// time. Returns 0 when a plot is due now.
    fn number_of_steps_to_run<C: Communicator, const D: usize>(
        &mut self,
        ctx: &SimulationContext<C, D>,
    ) -> usize {
        if self.plots.start_plotting_if_due(ctx.min_time_stamp()) {
            return 0;
        }
        if !ctx.all_solvers_use(TimeStepping::GlobalFixed) {
            return 1;
        }
        let horizon = self.plots.time_of_next_plot().min(ctx.config().end_time);
        let steps = ((horizon - ctx.max_time_stamp()) / ctx.min_time_step_size()
            * ctx.config().timestep_batch_factor)
            .floor();
        if steps.is_finite() && steps >= 1.0 {
            steps as usize
        } else {
            1
        }
    }

    fn run_one_fused_pass<C: Communicator, const D: usize>(
        &mut self,
        ctx: &mut SimulationContext<C, D>,
    ) -> Result<(), EngineError>
    where
        R: Repository<C, D>,
    {
        let stationary = self.repository.is_grid_stationary();
        match self.number_of_steps_to_run(ctx) {
            0 => {
                self.run_phase(ctx, Phase::PlotAndFusedTimeStep, 1, stationary)?;
                self.summary.time_steps += 1;
            }
            steps => {
                let exchange = stationary && ctx.config().exchange_boundary_data_in_batched_time_steps;
                self.run_phase(ctx, Phase::FusedTimeStep, steps, exchange)?;
                self.summary.time_steps += steps;
            }
        }
        if ctx.mesh_or_recomputation_requested() {
            self.update_mesh_fused(ctx)?;
        }
        if ctx.stability_condition_violated() {
            info!("rerunning the prediction with dt_min={:e}", ctx.min_time_step_size());
            self.run_phase(ctx, Phase::PredictionRerun, 1, true)?;
            self.summary.prediction_reruns += 1;
        }
        Ok(())
    }

    /// Run the corrective phases the solvers asked for during the last fused
    /// step.
    fn update_mesh_fused<C: Communicator, const D: usize>(
        &mut self,
        ctx: &mut SimulationContext<C, D>,
    ) -> Result<(), EngineError>
    where
        R: Repository<C, D>,
    {
        let spreading = ctx.limiter_status_spreading_requested();
        let mesh = ctx.mesh_update_requested();
        let global = ctx.global_recomputation_requested();
        let local = ctx.local_recomputation_requested();
        info!(
            "updating mesh: spreading={spreading} mesh={mesh} global={global} local={local}"
        );

        self.run_phase(ctx, Phase::NeighbourDataDropping, 1, false)?;
        if spreading {
            self.run_phase(ctx, Phase::LimiterStatusSpreading, LIMITER_STATUS_SPREADING_ITERATIONS, false)?;
        }
        if mesh || global {
            self.create_mesh(ctx)?;
            self.summary.mesh_updates += 1;
        }
        self.run_phase(ctx, Phase::FinaliseMeshRefinementAndReinitialisation, 1, false)?;
        if local {
            self.run_phase(ctx, Phase::LocalRecomputationAndTimeStepSizeComputation, 1, true)?;
        }
        ctx.clear_consumed_requests();

        self.run_phase(ctx, Phase::PredictionAndFusedTimeSteppingInitialisation, 1, true)?;
        if global {
            let stationary = self.repository.is_grid_stationary();
            self.run_phase(ctx, Phase::FusedTimeStep, 1, stationary)?;
        }
        Ok(())
    }

    fn run_one_unfused_pass<C: Communicator, const D: usize>(
        &mut self,
        ctx: &mut SimulationContext<C, D>,
    ) -> Result<(), EngineError>
    where
        R: Repository<C, D>,
    {
        self.run_phase(ctx, Phase::NeighbourDataMerging, 1, true)?;
        self.run_phase(ctx, Phase::SolutionUpdate, 1, true)?;
        self.run_phase(ctx, Phase::TimeStepSizeComputation, 1, true)?;
        let prediction = if self.plots.start_plotting_if_due(ctx.min_time_stamp()) {
            Phase::PredictionAndPlot
        } else {
            Phase::Prediction
        };
        self.run_phase(ctx, prediction, 1, true)?;
        self.summary.time_steps += 1;
        Ok(())
    }
}
