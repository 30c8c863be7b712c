#![cfg_attr(docsrs, feature(doc_cfg))]
//! # amr-stepper
//!
//! amr-stepper advances the patches of an adaptive, patch-structured mesh in
//! time, on one rank or many. It keeps the per-patch bookkeeping, moves
//! ghost layers between neighbouring patches, agrees on one time-step size
//! across ranks, and sequences the traversal phases of a run. The numerics
//! come from user code through the [`Discretization`](solver::Discretization)
//! trait; the mesh walk comes from a [`Repository`](traversal::Repository).
//!
//! ## Features
//! - Indexed [`PatchStore`](patch::PatchStore) with generation-checked buffer
//!   handles and optional background compression
//! - Solver-global [`TimeStepState`](solver::time_step::TimeStepState) with
//!   fused and unfused stepping, batched fixed steps, rollback
//! - Ghost-layer exchange on one rank, across ranks, and for cell migration
//! - Worker → coordinator → worker reduction of step sizes
//! - Pluggable communication backends (serial, Rayon, MPI behind
//!   `mpi-support`)
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! amr-stepper = "0.1"
//! # features = ["mpi-support"]
//! ```
//!
//! A run registers its solvers on a [`SimulationContext`](context::SimulationContext)
//! and hands it to a [`Runner`](runner::Runner) wrapping a traversal such as
//! [`UniformGrid`](traversal::UniformGrid).

pub mod algs;
pub mod background;
pub mod config;
pub mod context;
pub mod debug_invariants;
pub mod engine_error;
pub mod geometry;
pub mod patch;
pub mod phase;
pub mod runner;
pub mod solver;
pub mod traversal;

pub use debug_invariants::DebugInvariants;
pub use engine_error::EngineError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::messenger::{MessageType, Messenger};
    pub use crate::algs::reduction::{ReductionReport, TimeStepBroadcast};
    pub use crate::background::BackgroundTasks;
    pub use crate::config::{RunConfig, SolverSpec};
    pub use crate::context::SimulationContext;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::engine_error::EngineError;
    pub use crate::geometry::{Face, RelativePosition};
    pub use crate::patch::{
        BufferHandle, CellIndex, CellKind, LimiterStatus, ParentRef, PatchDescriptor, PatchKey,
        PatchLayout, PatchStore, SolverId,
    };
    pub use crate::phase::{AlgorithmSection, Phase};
    pub use crate::runner::{RunSummary, Runner};
    pub use crate::solver::time_step::{TimeStepState, TimeStepping};
    pub use crate::solver::{Discretization, PatchView, RefinementControl, Solver, SolverKind};
    pub use crate::traversal::{Repository, UniformGrid};
}
