//! Patch data exchange across rank boundaries.
//!
//! Every face shared with another rank carries exactly
//! [`DATA_MESSAGES_PER_NEIGHBOUR_COMMUNICATION`] data messages per solver and
//! direction. A side without field data still sends, just an empty message,
//! and the receiver consumes every message either by merging or by dropping
//! it. Skipping either call leaves the two ranks out of step.
//!
//! `src` and `dest` are the integer cell positions of sender and receiver.

use crate::algs::communicator::Communicator;
use crate::algs::messenger::{MessageType, Messenger};
use crate::engine_error::EngineError;
use crate::geometry::RelativePosition;
use crate::patch::index::PatchKey;
use crate::patch::store::PatchStore;
use crate::solver::Solver;

use super::metadata::NeighbourMetadata;

pub const DATA_MESSAGES_PER_NEIGHBOUR_COMMUNICATION: usize = 1;

/// What happened to a received data message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MergeOutcome {
    /// The payload was written into the local patch's ghost region.
    Merged,
    /// A payload arrived but the local side has no patch to take it.
    Dropped,
    /// An empty message was consumed.
    Skipped,
}

/// Send the boundary layer of `key` that faces `dest`, or an empty message
/// if the patch carries no field data.
#[allow(clippy::too_many_arguments)]
pub fn send_data_to_neighbour<C: Communicator, const D: usize>(
    messenger: &Messenger<C>,
    to: usize,
    solver: &Solver<D>,
    store: &PatchStore<D>,
    key: PatchKey,
    src: [i32; D],
    dest: [i32; D],
    x: &[f64],
    level: u32,
) -> Result<(), EngineError> {
    let face = RelativePosition::between(src, dest)?.require_face()?;
    if !store.descriptor(key)?.kind.holds_field_data() {
        send_empty_data_to_neighbour(messenger, to, x, level);
        return Ok(());
    }
    let layout = solver.layout();
    let layer = store.with_solution(key, |u| layout.extract_boundary_layer(u, face))??;
    messenger.send(to, MessageType::NeighbourData, x, level, &layer);
    Ok(())
}

/// Counterpart of [`send_data_to_neighbour`] when there is no local patch.
pub fn send_empty_data_to_neighbour<C: Communicator>(
    messenger: &Messenger<C>,
    to: usize,
    x: &[f64],
    level: u32,
) {
    for _ in 0..DATA_MESSAGES_PER_NEIGHBOUR_COMMUNICATION {
        messenger.send_empty(to, MessageType::NeighbourData, x, level);
    }
}

/// Receive the neighbour's data message and write it into the ghost region of
/// `key` facing `src`.
///
/// The payload must agree with the metadata the neighbour announced: data if
/// and only if its patch holds field data, and exactly one face worth of
/// unknowns. Anything else is a protocol desynchronisation.
#[allow(clippy::too_many_arguments)]
pub fn merge_with_neighbour_data<C: Communicator, const D: usize>(
    messenger: &Messenger<C>,
    from: usize,
    solver: &Solver<D>,
    store: &mut PatchStore<D>,
    metadata: &NeighbourMetadata,
    key: Option<PatchKey>,
    src: [i32; D],
    dest: [i32; D],
    x: &[f64],
    level: u32,
) -> Result<MergeOutcome, EngineError> {
    let payload = messenger.receive::<f64>(from, MessageType::NeighbourData, x, level)?;
    if metadata.holds_field_data() == payload.is_empty() {
        return Err(desync(
            from,
            format!(
                "neighbour announced {:?} but sent {} values",
                metadata.kind,
                payload.len()
            ),
        ));
    }

    let local = match key {
        Some(k) if store.descriptor(k)?.kind.holds_field_data() => Some(k),
        _ => None,
    };
    let Some(key) = local else {
        return Ok(if payload.is_empty() {
            MergeOutcome::Skipped
        } else {
            MergeOutcome::Dropped
        });
    };
    if payload.is_empty() {
        return Ok(MergeOutcome::Skipped);
    }

    let expected = solver.layout().unknowns_per_face();
    if payload.len() != expected {
        return Err(desync(
            from,
            format!("face payload of {} values, expected {expected}", payload.len()),
        ));
    }
    let face = RelativePosition::between(dest, src)?.require_face()?;
    solver.synchronise_time_stepping(store.descriptor_mut(key)?);
    let view = solver.view(store.descriptor(key)?);
    let disc = solver.discretization();
    store.with_solution_mut(key, |u| disc.ghost_layer_filling(u, &payload, &view, face))??;
    store.descriptor_mut(key)?.mark_neighbour_merge(face);
    Ok(MergeOutcome::Merged)
}

/// Consume the neighbour's data messages without looking at them.
pub fn drop_neighbour_data<C: Communicator>(
    messenger: &Messenger<C>,
    from: usize,
    x: &[f64],
    level: u32,
) -> Result<(), EngineError> {
    for _ in 0..DATA_MESSAGES_PER_NEIGHBOUR_COMMUNICATION {
        messenger.drop_message(from, MessageType::NeighbourData, x, level)?;
    }
    Ok(())
}

fn desync(neighbor: usize, detail: String) -> EngineError {
    log::error!("protocol desynchronisation with rank {neighbor}: {detail}");
    EngineError::ProtocolDesync { neighbor, detail }
}
