//! Patch type and limiter status tags.

use crate::engine_error::EngineError;

/// Role of a patch descriptor in the tree.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CellKind {
    /// Leaf patch carrying field data.
    Cell,
    /// Placeholder left behind after coarsening; owns no buffers.
    #[default]
    Erased,
    /// Parent of leaves, holding restricted face data.
    Ancestor,
    /// Child of a leaf, holding prolongated face data.
    Descendant,
    /// Parent of leaves without data.
    EmptyAncestor,
    /// Child of a leaf without data.
    EmptyDescendant,
}

impl CellKind {
    /// Only leaves own `solution`/`previousSolution` buffers.
    #[inline]
    pub fn holds_field_data(self) -> bool {
        matches!(self, CellKind::Cell)
    }

    /// Types that take part in face-data exchange.
    #[inline]
    pub fn holds_face_data(self) -> bool {
        matches!(
            self,
            CellKind::Cell | CellKind::Ancestor | CellKind::Descendant
        )
    }

    pub fn to_wire(self) -> i32 {
        match self {
            CellKind::Erased => 0,
            CellKind::Cell => 1,
            CellKind::Ancestor => 2,
            CellKind::Descendant => 3,
            CellKind::EmptyAncestor => 4,
            CellKind::EmptyDescendant => 5,
        }
    }

    pub fn from_wire(raw: i32) -> Result<Self, EngineError> {
        Ok(match raw {
            0 => CellKind::Erased,
            1 => CellKind::Cell,
            2 => CellKind::Ancestor,
            3 => CellKind::Descendant,
            4 => CellKind::EmptyAncestor,
            5 => CellKind::EmptyDescendant,
            other => return Err(EngineError::Wire(format!("unknown cell kind {other}"))),
        })
    }
}

/// Per-patch marker telling limiter-coupled solvers whether the fallback
/// scheme must run on (or next to) this patch.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum LimiterStatus {
    #[default]
    Ok,
    NeighbourOfNeighbourOfTroubled,
    NeighbourOfTroubled,
    Troubled,
}

impl LimiterStatus {
    #[inline]
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(v: u8) -> Result<Self, EngineError> {
        Ok(match v {
            0 => LimiterStatus::Ok,
            1 => LimiterStatus::NeighbourOfNeighbourOfTroubled,
            2 => LimiterStatus::NeighbourOfTroubled,
            3 => LimiterStatus::Troubled,
            other => return Err(EngineError::Wire(format!("unknown limiter status {other}"))),
        })
    }

    /// Status after hearing from a neighbour: the neighbour's status decays by
    /// one level across the face.
    pub fn merged_with(self, neighbour: LimiterStatus) -> Self {
        let decayed = neighbour.value().saturating_sub(1);
        if decayed > self.value() {
            // decayed <= 2 by construction
            LimiterStatus::from_value(decayed).unwrap_or(self)
        } else {
            self
        }
    }

    #[inline]
    pub fn needs_recomputation(self) -> bool {
        self != LimiterStatus::Ok
    }
}
