//! Moving cells between ranks when the load balancer forks or joins a
//! subdomain.
//!
//! A move is two messages per cell: the descriptor list
//! ([`MessageType::ForkJoinDescriptors`]) and then the field data of each
//! patch ([`MessageType::ForkJoinData`]). Like the neighbour exchange, every
//! send has an empty counterpart and every receive has a drop counterpart.

use crate::algs::communicator::Communicator;
use crate::algs::messenger::{MessageType, Messenger};
use crate::algs::wire::WireDescriptor;
use crate::engine_error::EngineError;
use crate::geometry::equals;
use crate::patch::index::{CellIndex, ParentRef, PatchKey};
use crate::patch::store::PatchStore;
use crate::solver::Solver;

use super::remote::MergeOutcome;

/// Ship the descriptors of `cell`; an empty message if it has none.
pub fn send_cell_descriptions<C: Communicator, const D: usize>(
    messenger: &Messenger<C>,
    to: usize,
    store: &PatchStore<D>,
    cell: CellIndex,
    x: &[f64],
    level: u32,
) -> Result<(), EngineError> {
    let wire = store
        .descriptors(cell)?
        .iter()
        .map(WireDescriptor::encode)
        .collect::<Result<Vec<_>, _>>()?;
    messenger.send(to, MessageType::ForkJoinDescriptors, x, level, &wire);
    Ok(())
}

pub fn send_empty_cell_descriptions<C: Communicator>(
    messenger: &Messenger<C>,
    to: usize,
    x: &[f64],
    level: u32,
) {
    messenger.send_empty(to, MessageType::ForkJoinDescriptors, x, level);
}

/// Adopt the descriptors another rank sent for `cell`.
///
/// Received descriptors get a [`ParentRef::Remote`] parent and fresh handles.
/// Patches missing locally are added with newly allocated buffers; patches
/// that exist already must agree on time stamp and step size.
///
/// Returns the keys of the patches that were added.
pub fn merge_cell_descriptions_with_remote_data<C: Communicator, const D: usize>(
    messenger: &Messenger<C>,
    from: usize,
    solvers: &[Solver<D>],
    store: &mut PatchStore<D>,
    cell: CellIndex,
    x: &[f64],
    level: u32,
) -> Result<Vec<PatchKey>, EngineError> {
    let wire = messenger.receive::<WireDescriptor>(from, MessageType::ForkJoinDescriptors, x, level)?;
    store.ensure_cell(cell);
    let mut added = Vec::new();
    for w in &wire {
        let mut d = w.decode::<D>()?;
        d.parent = ParentRef::Remote;
        d.reset_buffer_handles();
        let solver = solvers
            .get(d.solver.get())
            .ok_or(EngineError::UnknownSolver(d.solver))?;
        match store.try_locate(cell, d.solver) {
            None => {
                let key = store.insert_descriptor(cell, d)?;
                solver.ensure_necessary_memory(store, key)?;
                added.push(key);
            }
            Some(element) => {
                let local = store.descriptor(PatchKey::new(cell, element))?;
                if !equals(local.time_stamp, d.time_stamp)
                    || !equals(local.time_step_size, d.time_step_size)
                {
                    let detail = format!(
                        "cell {cell} solver {}: local (t={}, dt={}) vs remote (t={}, dt={})",
                        d.solver, local.time_stamp, local.time_step_size, d.time_stamp, d.time_step_size
                    );
                    log::error!("fork/join with rank {from}: {detail}");
                    return Err(EngineError::ProtocolDesync { neighbor: from, detail });
                }
            }
        }
    }
    Ok(added)
}

/// Consume a descriptor message that this rank does not need.
pub fn drop_cell_descriptions<C: Communicator>(
    messenger: &Messenger<C>,
    from: usize,
    x: &[f64],
    level: u32,
) -> Result<(), EngineError> {
    messenger.drop_message(from, MessageType::ForkJoinDescriptors, x, level)
}

/// Ship `solution` followed by `previousSolution` of `key`; an empty message
/// if the patch carries no field data.
pub fn send_data_due_to_fork_or_join<C: Communicator, const D: usize>(
    messenger: &Messenger<C>,
    to: usize,
    store: &PatchStore<D>,
    key: PatchKey,
    x: &[f64],
    level: u32,
) -> Result<(), EngineError> {
    let d = store.descriptor(key)?;
    if !d.kind.holds_field_data() {
        send_empty_data_due_to_fork_or_join(messenger, to, x, level);
        return Ok(());
    }
    let (solution, previous) = (d.solution, d.previous_solution);
    let mut payload = store.with_buffer(solution, <[f64]>::to_vec)?;
    store.with_buffer(previous, |p| payload.extend_from_slice(p))?;
    messenger.send(to, MessageType::ForkJoinData, x, level, &payload);
    Ok(())
}

pub fn send_empty_data_due_to_fork_or_join<C: Communicator>(
    messenger: &Messenger<C>,
    to: usize,
    x: &[f64],
    level: u32,
) {
    messenger.send_empty(to, MessageType::ForkJoinData, x, level);
}

/// Copy received field data into `key`'s buffers.
pub fn merge_with_data_due_to_fork_or_join<C: Communicator, const D: usize>(
    messenger: &Messenger<C>,
    from: usize,
    store: &mut PatchStore<D>,
    key: PatchKey,
    x: &[f64],
    level: u32,
) -> Result<MergeOutcome, EngineError> {
    let payload = messenger.receive::<f64>(from, MessageType::ForkJoinData, x, level)?;
    let holds = store.descriptor(key)?.kind.holds_field_data();
    match (holds, payload.is_empty()) {
        (false, true) => Ok(MergeOutcome::Skipped),
        (false, false) => Ok(MergeOutcome::Dropped),
        (true, true) => Err(EngineError::ProtocolDesync {
            neighbor: from,
            detail: format!("no field data for patch {key:?}"),
        }),
        (true, false) => {
            store.with_solution_and_previous_mut(key, |cur, prev| {
                if payload.len() != cur.len() + prev.len() {
                    return Err(EngineError::ProtocolDesync {
                        neighbor: from,
                        detail: format!(
                            "fork/join payload of {} values, expected {}",
                            payload.len(),
                            cur.len() + prev.len()
                        ),
                    });
                }
                let (a, b) = payload.split_at(cur.len());
                cur.copy_from_slice(a);
                prev.copy_from_slice(b);
                Ok(())
            })??;
            Ok(MergeOutcome::Merged)
        }
    }
}

pub fn drop_data_due_to_fork_or_join<C: Communicator>(
    messenger: &Messenger<C>,
    from: usize,
    x: &[f64],
    level: u32,
) -> Result<(), EngineError> {
    messenger.drop_message(from, MessageType::ForkJoinData, x, level)
}
