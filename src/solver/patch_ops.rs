//! Per-patch operations a solver performs when the traversal visits a cell.

use log::warn;

use super::{RefinementControl, Solver, SolverKind};
use crate::engine_error::EngineError;
use crate::geometry::equals;
use crate::patch::cell_kind::LimiterStatus;
use crate::patch::descriptor::PatchDescriptor;
use crate::patch::index::PatchKey;
use crate::patch::store::PatchStore;

impl<const D: usize> Solver<D> {
    /// Copy the solver-global step data into the patch.
    pub fn synchronise_time_stepping(&self, d: &mut PatchDescriptor<D>) {
        d.previous_time_step_size = self.state.previous_min_time_step_size();
        d.time_stamp = self.state.min_time_stamp();
        d.time_step_size = self.state.min_time_step_size();
    }

    /// Allocate the patch buffers if the patch at `key` carries field data and
    /// owns none yet.
    pub fn ensure_necessary_memory(
        &self,
        store: &mut PatchStore<D>,
        key: PatchKey,
    ) -> Result<bool, EngineError> {
        if store.descriptor(key)?.kind.holds_field_data() {
            store.allocate_buffers(key, self.layout.buffer_len())
        } else {
            Ok(false)
        }
    }

    /// Compute the patch's admissible step size, advance its stamp by the
    /// step it just took, and return the admissible value for the rank-wide
    /// minimum. Patches without field data return +∞.
    pub fn start_new_time_step_for_patch(
        &self,
        store: &mut PatchStore<D>,
        key: PatchKey,
    ) -> Result<f64, EngineError> {
        let d = store.descriptor(key)?;
        if !d.kind.holds_field_data() {
            return Ok(f64::INFINITY);
        }
        let view = self.view(d);
        let mut admissible = store.with_solution(key, |u| {
            self.discretization.stable_time_step_size(u, &view)
        })?;
        if admissible.is_nan() {
            warn!(
                "{}: stable time step size is NaN on patch at offset {:?} size {:?} level {}",
                self.identifier, view.offset, view.size, view.level
            );
            admissible = f64::INFINITY;
        }

        let d = store.descriptor_mut(key)?;
        d.previous_time_step_size = d.time_step_size;
        d.previous_time_stamp = d.time_stamp;
        d.time_stamp += d.time_step_size;
        d.time_step_size = admissible;
        d.next_time_step_size = admissible;
        Ok(admissible)
    }

    /// stamp −= previous step, step ← previous step, previous ← +∞.
    pub fn rollback_patch_to_previous_time_step(&self, d: &mut PatchDescriptor<D>) {
        d.time_stamp -= d.previous_time_step_size;
        d.time_step_size = d.previous_time_step_size;
        d.previous_time_step_size = f64::INFINITY;
    }

    pub fn zero_time_step_sizes_for_patch(&self, d: &mut PatchDescriptor<D>) {
        d.time_step_size = 0.0;
    }

    /// Impose initial conditions at `stamp + dt`.
    pub fn set_initial_conditions(
        &self,
        store: &mut PatchStore<D>,
        key: PatchKey,
    ) -> Result<(), EngineError> {
        let d = store.descriptor(key)?;
        if !d.kind.holds_field_data() {
            return Ok(());
        }
        let mut view = self.view(d);
        view.time_stamp += view.time_step_size;
        if self.discretization.use_adjust_solution(&view) {
            store.with_solution_mut(key, |u| self.discretization.adjust_solution(u, &view))?;
        }
        Ok(())
    }

    /// Keep the current data as `previousSolution`, advance `solution` by the
    /// patch's step size, then adjust it. An admissible step size below the
    /// one just used is a CFL violation: logged, not fatal.
    pub fn update_solution(&self, store: &mut PatchStore<D>, key: PatchKey) -> Result<(), EngineError> {
        self.advance_patch(store, key, false)
    }

    /// Like [`update_solution`](Self::update_solution) but through the
    /// discretisation's fallback scheme.
    pub fn recompute_solution(&self, store: &mut PatchStore<D>, key: PatchKey) -> Result<(), EngineError> {
        self.advance_patch(store, key, true)
    }

    fn advance_patch(
        &self,
        store: &mut PatchStore<D>,
        key: PatchKey,
        fallback: bool,
    ) -> Result<(), EngineError> {
        let d = store.descriptor(key)?;
        if !d.kind.holds_field_data() {
            return Ok(());
        }
        let view = self.view(d);
        let mut adjusted = view;
        adjusted.time_stamp += view.time_step_size;
        let disc = self.discretization.as_ref();

        let admissible = store.with_solution_and_previous_mut(key, |cur, prev| {
            prev.copy_from_slice(cur);
            let admissible = if view.time_step_size > 0.0 {
                if fallback {
                    disc.fallback_update(cur, prev, &view)
                } else {
                    disc.solution_update(cur, prev, &view)
                }
            } else {
                f64::INFINITY
            };
            if disc.use_adjust_solution(&adjusted) {
                disc.adjust_solution(cur, &adjusted);
            }
            admissible
        })?;

        if !equals(view.time_step_size, 0.0) && admissible < view.time_step_size {
            warn!(
                "{}: CFL violation on patch at offset {:?} size {:?} level {}: used dt={:e}, admissible dt={:e}",
                self.identifier, view.offset, view.size, view.level, view.time_step_size, admissible
            );
        }
        Ok(())
    }

    /// Swap `solution` and `previousSolution` so the data of the last step
    /// becomes current again.
    pub fn rollback_solution(&self, store: &mut PatchStore<D>, key: PatchKey) -> Result<(), EngineError> {
        if store.descriptor(key)?.kind.holds_field_data() {
            store.swap_solution_and_previous(key)?;
        }
        Ok(())
    }

    /// Evaluate the refinement criterion; a change within the admissible
    /// level range raises the mesh-update request.
    pub fn evaluate_refinement(
        &mut self,
        store: &PatchStore<D>,
        key: PatchKey,
        coarsest_level: u32,
    ) -> Result<RefinementControl, EngineError> {
        let d = store.descriptor(key)?;
        if !d.kind.holds_field_data() || self.maximum_adaptive_mesh_depth == 0 {
            return Ok(RefinementControl::Keep);
        }
        let view = self.view(d);
        let control =
            store.with_solution(key, |u| self.discretization.refinement_criterion(u, &view))?;
        let finest = coarsest_level + self.maximum_adaptive_mesh_depth;
        let changes = match control {
            RefinementControl::Refine => view.level < finest,
            RefinementControl::Erase => view.level > coarsest_level,
            RefinementControl::Keep => false,
        };
        if changes {
            self.state.request_mesh_update();
        }
        Ok(control)
    }

    /// Re-evaluate the limiter status of a limiting solver's patch. A patch
    /// that newly becomes troubled requests spreading and local recomputation
    /// (global recomputation when it is not on the finest level).
    ///
    /// Returns the new status.
    pub fn update_limiter_status(
        &mut self,
        store: &mut PatchStore<D>,
        key: PatchKey,
        finest_level: u32,
    ) -> Result<LimiterStatus, EngineError> {
        let d = store.descriptor(key)?;
        if self.kind != SolverKind::Limiting || !d.kind.holds_field_data() {
            return Ok(d.limiter_status);
        }
        let view = self.view(d);
        let old = d.limiter_status;
        let admissible = store.with_solution(key, |u| {
            self.discretization.is_physically_admissible(u, &view)
        })?;
        let new = if admissible {
            LimiterStatus::Ok
        } else {
            LimiterStatus::Troubled
        };
        if new == LimiterStatus::Troubled && old != LimiterStatus::Troubled {
            warn!(
                "{}: patch at offset {:?} level {} became troubled at t={:e}",
                self.identifier, view.offset, view.level, view.time_stamp
            );
            let level = view.level;
            self.requests.request_limiter_status_spreading();
            if level < finest_level {
                self.requests.request_global_recomputation();
                self.state.request_mesh_update();
            } else {
                self.requests.request_local_recomputation();
            }
        }
        store.descriptor_mut(key)?.limiter_status = new;
        Ok(new)
    }
}
