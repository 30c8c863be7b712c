//! The traversal contract the orchestrator drives, the per-phase callbacks
//! every traversal invokes, and a single-rank reference traversal.
//!
//! A traversal owns the mesh walk: cell enumeration, neighbour pairing and
//! the message plumbing at rank boundaries. It knows nothing about time
//! stepping; all of that lives in [`mappings`].

pub mod mappings;
pub mod uniform;

use crate::algs::communicator::Communicator;
use crate::context::SimulationContext;
use crate::engine_error::EngineError;
use crate::phase::Phase;

pub use mappings::CellVisit;
pub use uniform::UniformGrid;

/// What the orchestrator needs from a mesh traversal.
pub trait Repository<C: Communicator, const D: usize> {
    /// Select the adapter the next [`iterate`](Self::iterate) runs.
    fn switch_to_phase(&mut self, phase: Phase);

    fn phase(&self) -> Phase;

    /// Walk the whole mesh `iterations` times with the active phase.
    /// In time-stepping phases face data crosses rank boundaries only when
    /// `exchange_boundary_data` is set.
    fn iterate(
        &mut self,
        ctx: &mut SimulationContext<C, D>,
        iterations: usize,
        exchange_boundary_data: bool,
    ) -> Result<(), EngineError>;

    /// The last iteration changed the mesh topology.
    fn continue_to_construct_grid(&self) -> bool;

    /// The mesh has not changed since the last refinement finished.
    fn is_grid_stationary(&self) -> bool;

    /// Iterations run so far with `phase`.
    fn iterations(&self, phase: Phase) -> usize;

    /// Release resources once the run is over.
    fn terminate(&mut self, ctx: &mut SimulationContext<C, D>) -> Result<(), EngineError>;
}
