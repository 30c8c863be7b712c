//! EngineError: Unified error type for amr-stepper public APIs
//!
//! Every fallible operation of the patch store, the exchange and reduction
//! protocols and the orchestrator reports through this type. Local numerical
//! trouble inside one patch is never an error (it is logged); only misuse,
//! protocol desynchronisation between ranks, configuration mistakes and
//! run-wide divergence end up here.

use thiserror::Error;

use crate::patch::arena::BufferHandle;
use crate::patch::cell_kind::CellKind;
use crate::patch::index::{CellIndex, SolverId};
use crate::solver::time_step::StepperState;

/// Unified error type for amr-stepper operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A single setting is out of its admissible range.
    #[error("invalid configuration `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    /// Two or more settings contradict each other.
    #[error("contradictory configuration: {0}")]
    ContradictoryConfig(String),

    /// No descriptor list exists for this cell index.
    #[error("no patch entry for cell {0}")]
    UnknownCell(CellIndex),
    /// The cell exists but holds no descriptor at this element index.
    #[error("cell {cell} holds no patch at element {element}")]
    UnknownElement { cell: CellIndex, element: usize },
    /// The solver id is not registered with the simulation context.
    #[error("solver {0} is not registered")]
    UnknownSolver(SolverId),
    /// A cell may hold at most one descriptor per solver.
    #[error("cell {cell} already holds a patch of solver {solver}")]
    DuplicatePatch { cell: CellIndex, solver: SolverId },
    /// A buffer handle is unallocated, released, or from an older generation.
    #[error("buffer handle {0:?} is stale or unallocated")]
    InvalidBufferHandle(BufferHandle),
    /// The operation is not defined for this cell kind.
    #[error("cell kind {kind:?} does not support `{operation}`")]
    UnsupportedCellKind {
        kind: CellKind,
        operation: &'static str,
    },

    /// Relative position entries must lie in {-1, 0, 1}.
    #[error("relative position {0:?} has entries outside {{-1, 0, 1}}")]
    InvalidRelativePosition(Vec<i64>),
    /// The relative position addresses an edge or corner, not a face.
    #[error("relative position {0:?} does not address a face neighbour")]
    NotAFaceNeighbour(Vec<i8>),
    /// A slice handed to a data-movement routine has the wrong length.
    #[error("length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    /// Exactly one side of a local neighbour pair carries field data.
    #[error("neighbour pair {a:?}/{b:?} mixes field-carrying and empty patches")]
    InconsistentNeighbourPair { a: CellKind, b: CellKind },

    /// A time-step state operation was invoked from the wrong state.
    #[error("time-step state cannot `{operation}` while {from:?}")]
    InvalidStepperTransition {
        from: StepperState,
        operation: &'static str,
    },

    /// Communication with a peer failed or timed out.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Both sides of a neighbour pair disagree about what was sent.
    #[error("protocol desynchronisation with rank {neighbor}: {detail}")]
    ProtocolDesync { neighbor: usize, detail: String },
    /// A message could not be decoded.
    #[error("wire format error: {0}")]
    Wire(String),

    /// The run-wide minimal time stamp or step size reached a sentinel extreme.
    #[error("numerical divergence: {0}")]
    NumericalDivergence(String),
    /// The background task pool could not be created.
    #[error("background task pool: {0}")]
    TaskPool(String),
}

impl EngineError {
    /// Whether the error must abort the run (as opposed to a misuse the caller
    /// may recover from).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig { .. }
                | EngineError::ContradictoryConfig(_)
                | EngineError::CommError { .. }
                | EngineError::ProtocolDesync { .. }
                | EngineError::NumericalDivergence(_)
        )
    }

    /// Process exit status an embedding binary should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::InvalidConfig { .. } | EngineError::ContradictoryConfig(_) => 2,
            EngineError::CommError { .. }
            | EngineError::ProtocolDesync { .. }
            | EngineError::Wire(_) => 3,
            EngineError::NumericalDivergence(_) => 4,
            _ => 1,
        }
    }
}
