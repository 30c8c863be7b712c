//! Opaque handles into the patch store.
//!
//! A patch is addressed by the pair (`CellIndex`, `ElementIndex`): the cell
//! index is handed out by the store when the traversal first visits a mesh
//! cell, the element index is the position of the solver's descriptor in that
//! cell's descriptor list. Parent links use [`ParentRef`] instead of raw
//! negative sentinels.

use std::fmt;

use crate::engine_error::EngineError;

/// Handle of one mesh cell's descriptor list.
///
/// # Memory layout
/// `repr(transparent)` over `u64`, so it can travel on the wire unchanged.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct CellIndex(u64);

impl CellIndex {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        CellIndex(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CellIndex").field(&self.0).finish()
    }
}

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a descriptor within its cell's descriptor list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementIndex(usize);

impl ElementIndex {
    #[inline]
    pub const fn new(raw: usize) -> Self {
        ElementIndex(raw)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// Index of a registered solver in the simulation context.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SolverId(usize);

impl SolverId {
    #[inline]
    pub const fn new(raw: usize) -> Self {
        SolverId(raw)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for SolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full address of one patch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchKey {
    pub cell: CellIndex,
    pub element: ElementIndex,
}

impl PatchKey {
    #[inline]
    pub const fn new(cell: CellIndex, element: ElementIndex) -> Self {
        PatchKey { cell, element }
    }
}

/// Link from a patch to the descriptor list of its parent cell.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ParentRef {
    /// No parent (coarsest level, or not yet known).
    #[default]
    Invalid,
    /// The parent lives on another rank.
    Remote,
    /// The parent's descriptor list on this rank.
    Cell(CellIndex),
}

impl ParentRef {
    /// Raw encoding of [`ParentRef::Invalid`].
    pub const INVALID_RAW: i64 = -1;
    /// Raw encoding of [`ParentRef::Remote`].
    pub const REMOTE_RAW: i64 = -2;

    #[inline]
    pub fn is_local(self) -> bool {
        matches!(self, ParentRef::Cell(_))
    }

    /// Encode for the wire. Cell indices beyond `i64::MAX` cannot be encoded.
    pub fn to_raw(self) -> Result<i64, EngineError> {
        match self {
            ParentRef::Invalid => Ok(Self::INVALID_RAW),
            ParentRef::Remote => Ok(Self::REMOTE_RAW),
            ParentRef::Cell(c) => i64::try_from(c.get())
                .map_err(|_| EngineError::Wire(format!("cell index {c} does not fit a parent reference"))),
        }
    }

    pub fn from_raw(raw: i64) -> Result<Self, EngineError> {
        match raw {
            Self::INVALID_RAW => Ok(ParentRef::Invalid),
            Self::REMOTE_RAW => Ok(ParentRef::Remote),
            r if r >= 0 => Ok(ParentRef::Cell(CellIndex::new(r as u64))),
            r => Err(EngineError::Wire(format!("unknown parent sentinel {r}"))),
        }
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(CellIndex, u64);
}
