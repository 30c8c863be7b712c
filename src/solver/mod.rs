//! Registered solver instances and the capability interface of their
//! numerical discretisation.
//!
//! The engine never implements flux functions or stencils itself; it calls
//! the [`Discretization`] strategy of each solver and moves data between
//! patches around those calls.

pub mod patch_ops;
pub mod time_step;

use crate::config::SolverSpec;
use crate::engine_error::EngineError;
use crate::geometry::{Face, centre};
use crate::patch::descriptor::PatchDescriptor;
use crate::patch::index::SolverId;
use crate::patch::layout::PatchLayout;
use crate::phase::AlgorithmSection;
use time_step::{TimeStepState, TimeStepping};

/// Variant tag for the only place where solver families behave differently:
/// limiter-coupled solvers track a per-patch limiter status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SolverKind {
    #[default]
    FiniteVolumes,
    Limiting,
}

/// Outcome of a refinement criterion evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RefinementControl {
    #[default]
    Keep,
    Refine,
    Erase,
}

/// Read-only geometry and time data of the patch a strategy call works on.
#[derive(Clone, Copy, Debug)]
pub struct PatchView<'a, const D: usize> {
    pub layout: &'a PatchLayout<D>,
    pub offset: [f64; D],
    pub size: [f64; D],
    pub level: u32,
    pub time_stamp: f64,
    pub time_step_size: f64,
}

impl<const D: usize> PatchView<'_, D> {
    #[inline]
    pub fn centre(&self) -> [f64; D] {
        centre(&self.offset, &self.size)
    }
}

/// Pluggable numerical strategy of one solver.
pub trait Discretization<const D: usize>: Send {
    /// Largest stable step size for the patch data `luh`.
    fn stable_time_step_size(&self, luh: &[f64], patch: &PatchView<'_, D>) -> f64;

    /// Advance `luh` by `patch.time_step_size` using the ghost-filled
    /// `previous`. Returns the admissible step size observed during the update.
    fn solution_update(&self, luh: &mut [f64], previous: &[f64], patch: &PatchView<'_, D>) -> f64;

    /// Compute the outward state `state_out` at a domain boundary face from
    /// the patch's own boundary layer `state_in`.
    fn boundary_conditions(
        &self,
        state_out: &mut [f64],
        state_in: &[f64],
        patch: &PatchView<'_, D>,
        face: Face,
    );

    fn use_adjust_solution(&self, _patch: &PatchView<'_, D>) -> bool {
        false
    }

    /// Impose initial conditions or source terms.
    fn adjust_solution(&self, _luh: &mut [f64], _patch: &PatchView<'_, D>) {}

    fn refinement_criterion(&self, _luh: &[f64], _patch: &PatchView<'_, D>) -> RefinementControl {
        RefinementControl::Keep
    }

    /// Write a neighbour's boundary layer into the ghost region at `face`.
    fn ghost_layer_filling(
        &self,
        luh: &mut [f64],
        layer: &[f64],
        patch: &PatchView<'_, D>,
        face: Face,
    ) -> Result<(), EngineError> {
        patch.layout.fill_ghost_layer(luh, layer, face)
    }

    /// Limiter trigger: `false` marks the patch as troubled.
    fn is_physically_admissible(&self, _luh: &[f64], _patch: &PatchView<'_, D>) -> bool {
        true
    }

    /// Robust update used when a troubled patch is recomputed.
    fn fallback_update(&self, luh: &mut [f64], previous: &[f64], patch: &PatchView<'_, D>) -> f64 {
        self.solution_update(luh, previous, patch)
    }
}

/// Request flags a solver raises during a phase for the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolverRequests {
    local_recomputation: bool,
    global_recomputation: bool,
    limiter_status_spreading: bool,
    stability_condition_violated: bool,
    attained_stable_state: bool,
}

impl Default for SolverRequests {
    fn default() -> Self {
        Self {
            local_recomputation: false,
            global_recomputation: false,
            limiter_status_spreading: false,
            stability_condition_violated: false,
            attained_stable_state: true,
        }
    }
}

impl SolverRequests {
    pub fn request_local_recomputation(&mut self) {
        self.local_recomputation = true;
    }
    pub fn request_global_recomputation(&mut self) {
        self.global_recomputation = true;
    }
    pub fn request_limiter_status_spreading(&mut self) {
        self.limiter_status_spreading = true;
    }
    pub fn set_stability_condition_violated(&mut self, violated: bool) {
        self.stability_condition_violated = violated;
    }
    pub fn set_attained_stable_state(&mut self, stable: bool) {
        self.attained_stable_state = stable;
    }

    pub fn local_recomputation(&self) -> bool {
        self.local_recomputation
    }
    pub fn global_recomputation(&self) -> bool {
        self.global_recomputation
    }
    pub fn limiter_status_spreading(&self) -> bool {
        self.limiter_status_spreading
    }
    pub fn stability_condition_violated(&self) -> bool {
        self.stability_condition_violated
    }
    pub fn attained_stable_state(&self) -> bool {
        self.attained_stable_state
    }

    /// Drop the recomputation and spreading requests once the orchestrator
    /// has run the corresponding phases.
    pub fn clear_recomputation_requests(&mut self) {
        self.local_recomputation = false;
        self.global_recomputation = false;
        self.limiter_status_spreading = false;
    }
}

/// One registered solver: its layout, its rank-local time-step state, its
/// request flags and its numerical strategy.
pub struct Solver<const D: usize> {
    id: SolverId,
    identifier: String,
    kind: SolverKind,
    layout: PatchLayout<D>,
    maximum_mesh_size: f64,
    maximum_adaptive_mesh_depth: u32,
    state: TimeStepState,
    requests: SolverRequests,
    discretization: Box<dyn Discretization<D>>,
}

impl<const D: usize> Solver<D> {
    pub fn new(
        id: SolverId,
        spec: &SolverSpec,
        discretization: Box<dyn Discretization<D>>,
    ) -> Result<Self, EngineError> {
        spec.validate()?;
        let layout = PatchLayout::new(
            spec.variables,
            spec.parameters,
            spec.nodes_per_axis,
            spec.ghost_layer_width,
        )?;
        Ok(Self {
            id,
            identifier: spec.identifier.clone(),
            kind: spec.kind,
            layout,
            maximum_mesh_size: spec.maximum_mesh_size,
            maximum_adaptive_mesh_depth: spec.maximum_adaptive_mesh_depth,
            state: TimeStepState::new(spec.time_stepping),
            requests: SolverRequests::default(),
            discretization,
        })
    }

    #[inline]
    pub fn id(&self) -> SolverId {
        self.id
    }
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
    #[inline]
    pub fn kind(&self) -> SolverKind {
        self.kind
    }
    #[inline]
    pub fn layout(&self) -> &PatchLayout<D> {
        &self.layout
    }
    #[inline]
    pub fn maximum_mesh_size(&self) -> f64 {
        self.maximum_mesh_size
    }
    #[inline]
    pub fn maximum_adaptive_mesh_depth(&self) -> u32 {
        self.maximum_adaptive_mesh_depth
    }
    #[inline]
    pub fn time_stepping(&self) -> TimeStepping {
        self.state.time_stepping()
    }
    #[inline]
    pub fn state(&self) -> &TimeStepState {
        &self.state
    }
    #[inline]
    pub fn state_mut(&mut self) -> &mut TimeStepState {
        &mut self.state
    }
    #[inline]
    pub fn requests(&self) -> &SolverRequests {
        &self.requests
    }
    #[inline]
    pub fn requests_mut(&mut self) -> &mut SolverRequests {
        &mut self.requests
    }
    pub fn discretization(&self) -> &dyn Discretization<D> {
        self.discretization.as_ref()
    }

    /// Whether patches of this solver post messages while `section` is active.
    pub fn is_sending(&self, section: AlgorithmSection) -> bool {
        matches!(
            section,
            AlgorithmSection::TimeStepping
                | AlgorithmSection::PredictionRerunAllSend
                | AlgorithmSection::MeshRefinementAllSend
                | AlgorithmSection::LocalRecomputationAllSend
                | AlgorithmSection::GlobalRecomputationAllSend
        )
    }

    /// Whether patches of this solver update their data while `section` is
    /// active.
    pub fn is_computing(&self, section: AlgorithmSection) -> bool {
        section == AlgorithmSection::TimeStepping
    }

    /// Coarsest level whose cells (domain extent / 3^level) are no larger than
    /// the solver's maximum mesh size.
    pub fn coarsest_mesh_level(&self, domain_size: &[f64; D]) -> u32 {
        let extent = domain_size.iter().copied().fold(0.0, f64::max);
        let mut level = 0;
        let mut h = extent;
        while h > self.maximum_mesh_size && level < 32 {
            h /= 3.0;
            level += 1;
        }
        level
    }

    pub fn finest_mesh_level(&self, domain_size: &[f64; D]) -> u32 {
        self.coarsest_mesh_level(domain_size) + self.maximum_adaptive_mesh_depth
    }

    /// Strategy-call view of a descriptor.
    pub fn view<'a>(&'a self, d: &PatchDescriptor<D>) -> PatchView<'a, D> {
        PatchView {
            layout: &self.layout,
            offset: d.offset,
            size: d.size,
            level: d.level,
            time_stamp: d.time_stamp,
            time_step_size: d.time_step_size,
        }
    }
}

impl<const D: usize> std::fmt::Debug for Solver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("id", &self.id)
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .field("layout", &self.layout)
            .field("state", &self.state)
            .field("requests", &self.requests)
            .finish()
    }
}
