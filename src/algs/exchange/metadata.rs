//! Neighbour metadata: what each rank holds at a shared face, announced
//! before any patch data crosses the rank boundary.
//!
//! The message carries [`NEIGHBOUR_METADATA_PER_SOLVER`] integers per
//! registered solver, `[cell kind, limiter status, -1, -1]`, or all
//! [`INVALID_METADATA_ENTRY`] when the sender has no patch of that solver.

use crate::algs::communicator::Communicator;
use crate::algs::messenger::{MessageType, Messenger};
use crate::engine_error::EngineError;
use crate::patch::cell_kind::{CellKind, LimiterStatus};
use crate::patch::index::{CellIndex, ElementIndex, PatchKey, SolverId};
use crate::patch::store::PatchStore;

pub const NEIGHBOUR_METADATA_PER_SOLVER: usize = 4;
pub const INVALID_METADATA_ENTRY: i32 = -1;

/// Decoded metadata of one solver's patch on the other side of a face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeighbourMetadata {
    /// `None` when the neighbour has no such patch.
    pub kind: Option<CellKind>,
    pub limiter_status: Option<LimiterStatus>,
}

impl NeighbourMetadata {
    pub const NOT_FOUND: Self = Self {
        kind: None,
        limiter_status: None,
    };

    #[inline]
    pub fn holds_field_data(&self) -> bool {
        self.kind.is_some_and(CellKind::holds_field_data)
    }
}

/// Metadata of every solver's patch in `cell`, solvers in id order.
pub fn encode_neighbour_metadata<const D: usize>(
    store: &PatchStore<D>,
    cell: Option<CellIndex>,
    solvers: usize,
) -> Result<Vec<i32>, EngineError> {
    let mut out = vec![INVALID_METADATA_ENTRY; solvers * NEIGHBOUR_METADATA_PER_SOLVER];
    let Some(cell) = cell else {
        return Ok(out);
    };
    for s in 0..solvers {
        if let Some(element) = store.try_locate(cell, SolverId::new(s)) {
            let d = store.descriptor(PatchKey::new(cell, element))?;
            let base = s * NEIGHBOUR_METADATA_PER_SOLVER;
            out[base] = d.kind.to_wire();
            out[base + 1] = i32::from(d.limiter_status.value());
        }
    }
    Ok(out)
}

/// Entry of `solver` in a received metadata message.
pub fn decode_neighbour_metadata(
    raw: &[i32],
    solver: SolverId,
) -> Result<NeighbourMetadata, EngineError> {
    let base = solver.get() * NEIGHBOUR_METADATA_PER_SOLVER;
    let entry = raw
        .get(base..base + NEIGHBOUR_METADATA_PER_SOLVER)
        .ok_or_else(|| {
            EngineError::Wire(format!(
                "metadata of {} entries has no slot for solver {solver}",
                raw.len()
            ))
        })?;
    if entry[0] == INVALID_METADATA_ENTRY {
        return Ok(NeighbourMetadata::NOT_FOUND);
    }
    let status = u8::try_from(entry[1])
        .map_err(|_| EngineError::Wire(format!("limiter status {} out of range", entry[1])))?;
    Ok(NeighbourMetadata {
        kind: Some(CellKind::from_wire(entry[0])?),
        limiter_status: Some(LimiterStatus::from_value(status)?),
    })
}

pub fn send_neighbour_metadata<C: Communicator, const D: usize>(
    messenger: &Messenger<C>,
    to: usize,
    store: &PatchStore<D>,
    cell: Option<CellIndex>,
    solvers: usize,
    x: &[f64],
    level: u32,
) -> Result<(), EngineError> {
    let raw = encode_neighbour_metadata(store, cell, solvers)?;
    messenger.send(to, MessageType::NeighbourMetadata, x, level, &raw);
    Ok(())
}

/// Receive the metadata message of a neighbour. Its length must match the
/// number of solvers registered here.
pub fn receive_neighbour_metadata<C: Communicator>(
    messenger: &Messenger<C>,
    from: usize,
    solvers: usize,
    x: &[f64],
    level: u32,
) -> Result<Vec<i32>, EngineError> {
    let raw = messenger.receive::<i32>(from, MessageType::NeighbourMetadata, x, level)?;
    let expected = solvers * NEIGHBOUR_METADATA_PER_SOLVER;
    if raw.len() != expected {
        log::error!("metadata from rank {from} has {} entries, expected {expected}", raw.len());
        return Err(EngineError::ProtocolDesync {
            neighbor: from,
            detail: format!("metadata of {} entries, expected {expected}", raw.len()),
        });
    }
    Ok(raw)
}

/// Local element of `solver` in `cell`, if any.
pub fn locate<const D: usize>(
    store: &PatchStore<D>,
    cell: Option<CellIndex>,
    solver: SolverId,
) -> Option<PatchKey> {
    let cell = cell?;
    let element: ElementIndex = store.try_locate(cell, solver)?;
    Some(PatchKey::new(cell, element))
}
