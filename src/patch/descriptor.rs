//! Per-solver, per-cell patch descriptor.

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::engine_error::EngineError;
use crate::geometry::{Face, centre};
use crate::patch::arena::BufferHandle;
use crate::patch::cell_kind::{CellKind, LimiterStatus};
use crate::patch::index::{ParentRef, SolverId};

/// Everything the engine knows about one patch apart from its field data.
///
/// Invariant: a [`CellKind::Cell`] descriptor owns two distinct allocated
/// handles once [`PatchStore::allocate_buffers`](crate::patch::store::PatchStore::allocate_buffers)
/// ran; an [`CellKind::Erased`] descriptor owns none.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchDescriptor<const D: usize> {
    pub solver: SolverId,
    pub kind: CellKind,
    pub offset: [f64; D],
    pub size: [f64; D],
    pub level: u32,
    pub parent: ParentRef,

    pub time_stamp: f64,
    pub previous_time_stamp: f64,
    pub time_step_size: f64,
    pub previous_time_step_size: f64,
    pub next_time_step_size: f64,

    pub solution: BufferHandle,
    pub previous_solution: BufferHandle,

    pub limiter_status: LimiterStatus,
    neighbour_merges: u8,
}

impl<const D: usize> PatchDescriptor<D> {
    pub fn new(
        solver: SolverId,
        kind: CellKind,
        level: u32,
        parent: ParentRef,
        size: [f64; D],
        offset: [f64; D],
    ) -> Self {
        Self {
            solver,
            kind,
            offset,
            size,
            level,
            parent,
            time_stamp: 0.0,
            previous_time_stamp: 0.0,
            time_step_size: 0.0,
            previous_time_step_size: 0.0,
            next_time_step_size: f64::INFINITY,
            solution: BufferHandle::UNALLOCATED,
            previous_solution: BufferHandle::UNALLOCATED,
            limiter_status: LimiterStatus::Ok,
            neighbour_merges: 0,
        }
    }

    #[inline]
    pub fn centre(&self) -> [f64; D] {
        centre(&self.offset, &self.size)
    }

    /// Both buffer handles are allocated.
    #[inline]
    pub fn has_buffers(&self) -> bool {
        self.solution.is_allocated() && self.previous_solution.is_allocated()
    }

    /// Forget the handles, e.g. after receiving a descriptor from another rank.
    pub fn reset_buffer_handles(&mut self) {
        self.solution = BufferHandle::UNALLOCATED;
        self.previous_solution = BufferHandle::UNALLOCATED;
    }

    pub fn reset_neighbour_merge_flags(&mut self) {
        self.neighbour_merges = 0;
    }

    pub fn mark_neighbour_merge(&mut self, face: Face) {
        self.neighbour_merges |= 1 << face.index();
    }

    #[inline]
    pub fn neighbour_merge_performed(&self, face: Face) -> bool {
        self.neighbour_merges & (1 << face.index()) != 0
    }

    /// Every face received ghost data since the last reset.
    pub fn all_neighbour_merges_performed(&self) -> bool {
        let all = ((1u16 << (2 * D)) - 1) as u8;
        self.neighbour_merges == all
    }
}

impl<const D: usize> DebugInvariants for PatchDescriptor<D> {
    fn validate_invariants(&self) -> Result<(), EngineError> {
        match self.kind {
            CellKind::Erased => ensure(
                !self.solution.is_allocated() && !self.previous_solution.is_allocated(),
                || EngineError::UnsupportedCellKind {
                    kind: self.kind,
                    operation: "own field-data buffers",
                },
            ),
            CellKind::Cell if self.solution.is_allocated() || self.previous_solution.is_allocated() => {
                ensure(
                    self.has_buffers() && self.solution != self.previous_solution,
                    || EngineError::InvalidBufferHandle(self.previous_solution),
                )
            }
            _ => Ok(()),
        }
    }
}
