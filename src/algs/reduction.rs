//! Worker → coordinator → worker reduction of the solver-global time-step
//! data.
//!
//! After a phase, every worker advances its own [`TimeStepState`] and reports
//! four scalars to the coordinator. The coordinator folds the reports into
//! its next-step fields, advances once, and broadcasts the agreed values,
//! which each worker adopts verbatim. All messages of one solver travel with
//! the solver index in the header's level field.

use crate::algs::communicator::Communicator;
use crate::algs::messenger::{MessageType, Messenger};
use crate::engine_error::EngineError;
use crate::patch::index::SolverId;
use crate::solver::time_step::TimeStepState;

/// Worker → coordinator message.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReductionReport {
    pub min_next_time_step_size: f64,
    pub mesh_update_requested: bool,
    pub min_cell_size: f64,
    pub max_cell_size: f64,
}

impl ReductionReport {
    pub const WIRE_LEN: usize = 4;

    /// Neutral element of [`merge`](Self::merge).
    pub fn identity() -> Self {
        Self {
            min_next_time_step_size: f64::INFINITY,
            mesh_update_requested: false,
            min_cell_size: f64::INFINITY,
            max_cell_size: f64::NEG_INFINITY,
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            min_next_time_step_size: self.min_next_time_step_size.min(other.min_next_time_step_size),
            mesh_update_requested: self.mesh_update_requested || other.mesh_update_requested,
            min_cell_size: self.min_cell_size.min(other.min_cell_size),
            max_cell_size: self.max_cell_size.max(other.max_cell_size),
        }
    }

    pub fn fold(reports: impl IntoIterator<Item = Self>) -> Self {
        reports.into_iter().fold(Self::identity(), Self::merge)
    }

    /// `[min next dt, ±1.0 flag, min cell size, max cell size]`.
    pub fn to_wire(&self) -> [f64; 4] {
        [
            self.min_next_time_step_size,
            if self.mesh_update_requested { 1.0 } else { -1.0 },
            self.min_cell_size,
            self.max_cell_size,
        ]
    }

    pub fn from_wire(raw: &[f64]) -> Result<Self, EngineError> {
        let [dt, flag, min, max] = fixed(raw, "reduction report")?;
        Ok(Self {
            min_next_time_step_size: dt,
            mesh_update_requested: flag > 0.0,
            min_cell_size: min,
            max_cell_size: max,
        })
    }
}

/// Coordinator → worker message.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeStepBroadcast {
    pub min_time_stamp: f64,
    pub min_time_step_size: f64,
    pub min_cell_size: f64,
    pub max_cell_size: f64,
}

impl TimeStepBroadcast {
    pub const WIRE_LEN: usize = 4;

    pub fn to_wire(&self) -> [f64; 4] {
        [
            self.min_time_stamp,
            self.min_time_step_size,
            self.min_cell_size,
            self.max_cell_size,
        ]
    }

    pub fn from_wire(raw: &[f64]) -> Result<Self, EngineError> {
        let [t, dt, min, max] = fixed(raw, "time-step broadcast")?;
        Ok(Self {
            min_time_stamp: t,
            min_time_step_size: dt,
            min_cell_size: min,
            max_cell_size: max,
        })
    }
}

fn fixed<const N: usize>(raw: &[f64], what: &str) -> Result<[f64; N], EngineError> {
    <[f64; N]>::try_from(raw)
        .map_err(|_| EngineError::Wire(format!("{what} of {} values, expected {N}", raw.len())))
}

fn solver_level(solver: SolverId) -> u32 {
    solver.get() as u32
}

pub fn send_data_to_master<C: Communicator>(
    messenger: &Messenger<C>,
    master: usize,
    solver: SolverId,
    state: &TimeStepState,
) {
    let report = state.report();
    log::debug!("rank {} reports {report:?} for solver {solver}", messenger.rank());
    messenger.send(master, MessageType::MasterWorker, &[], solver_level(solver), &report.to_wire());
}

/// Fold one worker's report into the coordinator's next-step fields.
pub fn merge_with_worker_data<C: Communicator>(
    messenger: &Messenger<C>,
    worker: usize,
    solver: SolverId,
    state: &mut TimeStepState,
) -> Result<ReductionReport, EngineError> {
    let raw = messenger.receive::<f64>(worker, MessageType::MasterWorker, &[], solver_level(solver))?;
    let report = ReductionReport::from_wire(&raw)?;
    state.merge_worker_report(&report);
    Ok(report)
}

/// Broadcast the coordinator's current fields and reduced mesh-update flag.
pub fn send_data_to_worker<C: Communicator>(
    messenger: &Messenger<C>,
    worker: usize,
    solver: SolverId,
    state: &TimeStepState,
) {
    let level = solver_level(solver);
    messenger.send(worker, MessageType::MasterWorker, &[], level, &state.broadcast().to_wire());
    let flag = if state.mesh_update_request() { 1.0 } else { -1.0 };
    messenger.send(worker, MessageType::MasterWorker, &[], level, &[flag]);
}

/// Replace the worker's current fields by the coordinator's broadcast.
pub fn merge_with_master_data<C: Communicator>(
    messenger: &Messenger<C>,
    master: usize,
    solver: SolverId,
    state: &mut TimeStepState,
) -> Result<TimeStepBroadcast, EngineError> {
    let level = solver_level(solver);
    let raw = messenger.receive::<f64>(master, MessageType::MasterWorker, &[], level)?;
    let broadcast = TimeStepBroadcast::from_wire(&raw)?;
    let [flag] = fixed::<1>(
        &messenger.receive::<f64>(master, MessageType::MasterWorker, &[], level)?,
        "mesh-update flag",
    )?;
    state.adopt_broadcast(&broadcast)?;
    state.set_mesh_update_request(flag > 0.0);
    Ok(broadcast)
}

/// Advance `state` once for the whole run.
///
/// On a single rank this is just [`TimeStepState::start_new_time_step`]. With
/// more ranks, workers advance, report and adopt the broadcast; the
/// coordinator folds the reports in ascending rank order, advances and
/// broadcasts.
pub fn reduce_and_broadcast<C: Communicator>(
    state: &mut TimeStepState,
    messenger: &Messenger<C>,
    solver: SolverId,
    coordinator: usize,
) -> Result<(), EngineError> {
    let size = messenger.size();
    if size <= 1 {
        return state.start_new_time_step();
    }
    if messenger.rank() == coordinator {
        for worker in (0..size).filter(|&r| r != coordinator) {
            merge_with_worker_data(messenger, worker, solver, state)?;
        }
        state.start_new_time_step()?;
        for worker in (0..size).filter(|&r| r != coordinator) {
            send_data_to_worker(messenger, worker, solver, state);
        }
    } else {
        state.start_new_time_step()?;
        send_data_to_master(messenger, coordinator, solver, state);
        merge_with_master_data(messenger, coordinator, solver, state)?;
    }
    Ok(())
}
