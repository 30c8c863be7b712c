//! The simulation context: everything one rank knows about the run.
//!
//! Created at run start and passed by reference through the orchestrator,
//! the traversal and the protocols. It owns the solver collection (indexed
//! by [`SolverId`]), the patch store, the messenger and the active
//! [`AlgorithmSection`].

use std::sync::Arc;

use crate::algs::communicator::Communicator;
use crate::algs::messenger::Messenger;
use crate::background::BackgroundTasks;
use crate::config::{RunConfig, SolverSpec};
use crate::engine_error::EngineError;
use crate::patch::index::SolverId;
use crate::patch::store::PatchStore;
use crate::phase::AlgorithmSection;
use crate::solver::time_step::TimeStepping;
use crate::solver::{Discretization, Solver};

pub struct SimulationContext<C: Communicator, const D: usize> {
    config: RunConfig,
    specs: Vec<SolverSpec>,
    solvers: Vec<Solver<D>>,
    store: PatchStore<D>,
    messenger: Messenger<C>,
    tasks: Arc<BackgroundTasks>,
    section: AlgorithmSection,
    domain_offset: [f64; D],
    domain_size: [f64; D],
}

impl<C: Communicator, const D: usize> SimulationContext<C, D> {
    pub fn new(
        config: RunConfig,
        comm: C,
        domain_offset: [f64; D],
        domain_size: [f64; D],
    ) -> Result<Self, EngineError> {
        let tasks = Arc::new(BackgroundTasks::new(config.background_threads)?);
        Ok(Self {
            config,
            specs: Vec::new(),
            solvers: Vec::new(),
            store: PatchStore::new(Arc::clone(&tasks)),
            messenger: Messenger::new(comm),
            tasks,
            section: AlgorithmSection::default(),
            domain_offset,
            domain_size,
        })
    }

    pub fn register_solver(
        &mut self,
        spec: SolverSpec,
        discretization: Box<dyn Discretization<D>>,
    ) -> Result<SolverId, EngineError> {
        let id = SolverId::new(self.solvers.len());
        let solver = Solver::new(id, &spec, discretization)?;
        log::debug!("registered {solver:?}");
        self.solvers.push(solver);
        self.specs.push(spec);
        Ok(id)
    }

    /// Reject a configuration the run cannot start with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.solvers.is_empty() {
            return Err(EngineError::InvalidConfig {
                field: "solvers",
                reason: "no solver registered".into(),
            });
        }
        if let Some(k) = (0..D).find(|&k| !(self.domain_size[k].is_finite() && self.domain_size[k] > 0.0)) {
            return Err(EngineError::InvalidConfig {
                field: "domain_size",
                reason: format!("extent along axis {k} is {}", self.domain_size[k]),
            });
        }
        if self.config.coordinator_rank >= self.messenger.size() {
            return Err(EngineError::InvalidConfig {
                field: "coordinator_rank",
                reason: format!(
                    "rank {} does not exist in a run of {} ranks",
                    self.config.coordinator_rank,
                    self.messenger.size()
                ),
            });
        }
        self.config.validate(&self.specs)
    }

    /// Put every solver's time-step state into `Ready` at `time_stamp`.
    pub fn init_solvers(&mut self, time_stamp: f64) {
        for s in &mut self.solvers {
            s.state_mut().initialise(time_stamp);
        }
    }

    // --- accessors ----------------------------------------------------------

    #[inline]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }
    #[inline]
    pub fn solvers(&self) -> &[Solver<D>] {
        &self.solvers
    }
    #[inline]
    pub fn solvers_mut(&mut self) -> &mut [Solver<D>] {
        &mut self.solvers
    }
    pub fn solver(&self, id: SolverId) -> Result<&Solver<D>, EngineError> {
        self.solvers.get(id.get()).ok_or(EngineError::UnknownSolver(id))
    }
    #[inline]
    pub fn store(&self) -> &PatchStore<D> {
        &self.store
    }
    #[inline]
    pub fn store_mut(&mut self) -> &mut PatchStore<D> {
        &mut self.store
    }
    #[inline]
    pub fn messenger(&self) -> &Messenger<C> {
        &self.messenger
    }
    #[inline]
    pub fn tasks(&self) -> &Arc<BackgroundTasks> {
        &self.tasks
    }
    #[inline]
    pub fn section(&self) -> AlgorithmSection {
        self.section
    }
    pub fn set_section(&mut self, section: AlgorithmSection) {
        self.section = section;
    }
    #[inline]
    pub fn domain_offset(&self) -> &[f64; D] {
        &self.domain_offset
    }
    #[inline]
    pub fn domain_size(&self) -> &[f64; D] {
        &self.domain_size
    }

    /// Disjoint borrows for code that updates solvers and patches together.
    pub fn parts_mut(&mut self) -> (&mut [Solver<D>], &mut PatchStore<D>, &Messenger<C>) {
        (&mut self.solvers, &mut self.store, &self.messenger)
    }

    // --- request queries ----------------------------------------------------

    pub fn mesh_update_requested(&self) -> bool {
        self.solvers.iter().any(|s| s.state().mesh_update_request())
    }
    pub fn local_recomputation_requested(&self) -> bool {
        self.solvers.iter().any(|s| s.requests().local_recomputation())
    }
    pub fn global_recomputation_requested(&self) -> bool {
        self.solvers.iter().any(|s| s.requests().global_recomputation())
    }
    pub fn limiter_status_spreading_requested(&self) -> bool {
        self.solvers.iter().any(|s| s.requests().limiter_status_spreading())
    }
    pub fn stability_condition_violated(&self) -> bool {
        self.solvers.iter().any(|s| s.requests().stability_condition_violated())
    }
    pub fn one_solver_has_not_attained_stable_state(&self) -> bool {
        self.solvers.iter().any(|s| !s.requests().attained_stable_state())
    }
    /// Any request that makes the orchestrator leave plain time stepping.
    pub fn mesh_or_recomputation_requested(&self) -> bool {
        self.mesh_update_requested()
            || self.local_recomputation_requested()
            || self.global_recomputation_requested()
            || self.limiter_status_spreading_requested()
    }

    /// Clear the mesh-update and recomputation requests once the orchestrator
    /// has run the phases they asked for.
    pub fn clear_consumed_requests(&mut self) {
        for s in &mut self.solvers {
            s.requests_mut().clear_recomputation_requests();
            s.state_mut().clear_mesh_update_request();
        }
    }

    pub fn all_solvers_use(&self, time_stepping: TimeStepping) -> bool {
        self.solvers.iter().all(|s| s.time_stepping() == time_stepping)
    }

    // --- reporting ----------------------------------------------------------

    pub fn min_time_stamp(&self) -> f64 {
        self.fold_states(f64::INFINITY, f64::min, |s| s.state().min_time_stamp())
    }
    pub fn max_time_stamp(&self) -> f64 {
        self.fold_states(f64::NEG_INFINITY, f64::max, |s| s.state().min_time_stamp())
    }
    pub fn min_time_step_size(&self) -> f64 {
        self.fold_states(f64::INFINITY, f64::min, |s| s.state().min_time_step_size())
    }
    pub fn max_time_step_size(&self) -> f64 {
        self.fold_states(f64::NEG_INFINITY, f64::max, |s| s.state().min_time_step_size())
    }
    pub fn min_next_time_step_size(&self) -> f64 {
        self.fold_states(f64::INFINITY, f64::min, |s| s.state().min_next_time_step_size())
    }

    fn fold_states(
        &self,
        init: f64,
        op: impl Fn(f64, f64) -> f64,
        get: impl Fn(&Solver<D>) -> f64,
    ) -> f64 {
        self.solvers.iter().map(get).fold(init, op)
    }
}

impl<C: Communicator, const D: usize> std::fmt::Debug for SimulationContext<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationContext")
            .field("rank", &self.messenger.rank())
            .field("section", &self.section)
            .field("solvers", &self.solvers)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::geometry::Face;
    use crate::solver::PatchView;

    struct Constant(f64);

    impl Discretization<2> for Constant {
        fn stable_time_step_size(&self, _luh: &[f64], _p: &PatchView<'_, 2>) -> f64 {
            self.0
        }
        fn solution_update(&self, _luh: &mut [f64], _prev: &[f64], _p: &PatchView<'_, 2>) -> f64 {
            self.0
        }
        fn boundary_conditions(&self, _o: &mut [f64], _i: &[f64], _p: &PatchView<'_, 2>, _f: Face) {}
    }

    fn ctx() -> SimulationContext<NoComm, 2> {
        SimulationContext::new(RunConfig::default(), NoComm, [0.0; 2], [1.0; 2]).unwrap()
    }

    #[test]
    fn empty_context_is_invalid() {
        assert!(matches!(
            ctx().validate(),
            Err(EngineError::InvalidConfig { field: "solvers", .. })
        ));
    }

    #[test]
    fn reporting_folds_over_solvers() {
        let mut c = ctx();
        let a = c.register_solver(SolverSpec::default(), Box::new(Constant(0.1))).unwrap();
        let b = c.register_solver(SolverSpec::default(), Box::new(Constant(0.2))).unwrap();
        assert_eq!((a.get(), b.get()), (0, 1));
        c.validate().unwrap();
        c.init_solvers(0.5);
        assert!(c.mesh_update_requested());
        c.solvers_mut()[1].state_mut().update_min_next_time_step_size(0.2);
        c.solvers_mut()[1].state_mut().start_new_time_step().unwrap();
        assert_eq!(c.min_time_step_size(), 0.0);
        assert_eq!(c.max_time_step_size(), 0.2);
        assert_eq!(c.min_time_stamp(), 0.5);
        c.clear_consumed_requests();
        assert!(!c.mesh_or_recomputation_requested());
        assert!(c.all_solvers_use(TimeStepping::Global));
    }
}
