//! Indexed arena of patch descriptors and their field-data buffers.
//!
//! Descriptors live in per-cell lists (one entry per solver); field data lives
//! in a separate [`DataArena`] shared with background compression tasks. The
//! arena is the only structure behind a lock: every allocation or release
//! first waits for background quiescence, then takes the arena mutex.

use std::sync::Arc;

use dashmap::DashMap;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::background::BackgroundTasks;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::engine_error::EngineError;
use crate::patch::arena::{BufferHandle, DataArena};
use crate::patch::cell_kind::CellKind;
use crate::patch::compression::CompressedPatch;
use crate::patch::descriptor::PatchDescriptor;
use crate::patch::index::{CellIndex, ElementIndex, ParentRef, PatchKey, SolverId};

pub struct PatchStore<const D: usize> {
    cells: HashMap<CellIndex, Vec<PatchDescriptor<D>>>,
    arena: Arc<Mutex<DataArena>>,
    snapshots: Arc<DashMap<BufferHandle, CompressedPatch>>,
    tasks: Arc<BackgroundTasks>,
    next_cell: u64,
}

impl<const D: usize> PatchStore<D> {
    pub fn new(tasks: Arc<BackgroundTasks>) -> Self {
        Self {
            cells: HashMap::new(),
            arena: Arc::new(Mutex::new(DataArena::new())),
            snapshots: Arc::new(DashMap::new()),
            tasks,
            next_cell: 0,
        }
    }

    pub fn tasks(&self) -> &Arc<BackgroundTasks> {
        &self.tasks
    }

    // --- cell entries -------------------------------------------------------

    /// Open an empty descriptor list under a fresh cell index.
    pub fn create_cell(&mut self) -> CellIndex {
        let cell = CellIndex::new(self.next_cell);
        self.next_cell += 1;
        self.cells.insert(cell, Vec::new());
        cell
    }

    /// Open an empty descriptor list under an index chosen by the caller
    /// (e.g. one received from another rank). No-op if it exists.
    pub fn ensure_cell(&mut self, cell: CellIndex) {
        self.next_cell = self.next_cell.max(cell.get().saturating_add(1));
        self.cells.entry(cell).or_default();
    }

    #[inline]
    pub fn contains_cell(&self, cell: CellIndex) -> bool {
        self.cells.contains_key(&cell)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn patch_count(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// Release every buffer of the cell and drop its descriptor list.
    pub fn remove_cell(&mut self, cell: CellIndex) -> Result<(), EngineError> {
        self.erase_descriptors(cell)?;
        self.cells.remove(&cell);
        Ok(())
    }

    // --- descriptors --------------------------------------------------------

    pub fn try_locate(&self, cell: CellIndex, solver: SolverId) -> Option<ElementIndex> {
        self.cells
            .get(&cell)?
            .iter()
            .position(|d| d.solver == solver)
            .map(ElementIndex::new)
    }

    /// Append a descriptor with unallocated buffers.
    pub fn add_descriptor(
        &mut self,
        cell: CellIndex,
        solver: SolverId,
        kind: CellKind,
        level: u32,
        parent: ParentRef,
        size: [f64; D],
        offset: [f64; D],
    ) -> Result<PatchKey, EngineError> {
        self.insert_descriptor(
            cell,
            PatchDescriptor::new(solver, kind, level, parent, size, offset),
        )
    }

    /// Append a prepared descriptor. Its handles must be unallocated.
    pub fn insert_descriptor(
        &mut self,
        cell: CellIndex,
        mut descriptor: PatchDescriptor<D>,
    ) -> Result<PatchKey, EngineError> {
        if self.try_locate(cell, descriptor.solver).is_some() {
            return Err(EngineError::DuplicatePatch {
                cell,
                solver: descriptor.solver,
            });
        }
        let list = self
            .cells
            .get_mut(&cell)
            .ok_or(EngineError::UnknownCell(cell))?;
        descriptor.reset_buffer_handles();
        list.push(descriptor);
        Ok(PatchKey::new(cell, ElementIndex::new(list.len() - 1)))
    }

    pub fn descriptors(&self, cell: CellIndex) -> Result<&[PatchDescriptor<D>], EngineError> {
        self.cells
            .get(&cell)
            .map(Vec::as_slice)
            .ok_or(EngineError::UnknownCell(cell))
    }

    pub fn descriptor(&self, key: PatchKey) -> Result<&PatchDescriptor<D>, EngineError> {
        self.cells
            .get(&key.cell)
            .ok_or(EngineError::UnknownCell(key.cell))?
            .get(key.element.get())
            .ok_or(EngineError::UnknownElement {
                cell: key.cell,
                element: key.element.get(),
            })
    }

    pub fn descriptor_mut(&mut self, key: PatchKey) -> Result<&mut PatchDescriptor<D>, EngineError> {
        self.cells
            .get_mut(&key.cell)
            .ok_or(EngineError::UnknownCell(key.cell))?
            .get_mut(key.element.get())
            .ok_or(EngineError::UnknownElement {
                cell: key.cell,
                element: key.element.get(),
            })
    }

    /// Every patch key, cells in ascending index order.
    pub fn patch_keys(&self) -> Vec<PatchKey> {
        let mut cells: Vec<CellIndex> = self.cells.keys().copied().collect();
        cells.sort_unstable();
        cells
            .into_iter()
            .flat_map(|c| {
                (0..self.cells[&c].len()).map(move |e| PatchKey::new(c, ElementIndex::new(e)))
            })
            .collect()
    }

    /// Patch keys of one solver, cells in ascending index order.
    pub fn patch_keys_of(&self, solver: SolverId) -> Vec<PatchKey> {
        self.patch_keys()
            .into_iter()
            .filter(|k| self.cells[&k.cell][k.element.get()].solver == solver)
            .collect()
    }

    /// Turn every descriptor of `cell` into `Erased`, release its buffers,
    /// and remove it from the cell's list. Returns how many were removed.
    pub fn erase_descriptors(&mut self, cell: CellIndex) -> Result<usize, EngineError> {
        let n = self.descriptors(cell)?.len();
        for e in 0..n {
            let key = PatchKey::new(cell, ElementIndex::new(e));
            self.descriptor_mut(key)?.kind = CellKind::Erased;
            self.release_buffers(key)?;
        }
        if let Some(list) = self.cells.get_mut(&cell) {
            list.clear();
        }
        Ok(n)
    }

    // --- buffers ------------------------------------------------------------

    /// Allocate `solution` and `previousSolution` for a `Cell` that owns none
    /// yet. `Erased` is a no-op; any other kind is unsupported.
    ///
    /// Returns whether buffers were allocated by this call.
    pub fn allocate_buffers(&mut self, key: PatchKey, buffer_len: usize) -> Result<bool, EngineError> {
        let d = self.descriptor(key)?;
        let (kind, complete, partial) = (
            d.kind,
            d.has_buffers(),
            d.solution.is_allocated() || d.previous_solution.is_allocated(),
        );
        match kind {
            CellKind::Cell => {
                if complete {
                    return Ok(false);
                }
                if partial {
                    return Err(EngineError::InvalidBufferHandle(BufferHandle::UNALLOCATED));
                }
                self.tasks.wait_until_quiescent();
                let (solution, previous) = {
                    let mut arena = self.arena.lock();
                    (arena.allocate(buffer_len), arena.allocate(buffer_len))
                };
                let d = self.descriptor_mut(key)?;
                d.solution = solution;
                d.previous_solution = previous;
                crate::debug_invariants!(d.validate_invariants(), "allocate_buffers");
                Ok(true)
            }
            CellKind::Erased => Ok(false),
            other => {
                debug_assert!(false, "buffers requested for unsupported cell kind {other:?}");
                Err(EngineError::UnsupportedCellKind {
                    kind: other,
                    operation: "allocate_buffers",
                })
            }
        }
    }

    /// Release whatever buffers the descriptor owns and reset its handles to
    /// [`BufferHandle::UNALLOCATED`]. Releasing twice is a no-op.
    ///
    /// Returns whether buffers were released by this call.
    pub fn release_buffers(&mut self, key: PatchKey) -> Result<bool, EngineError> {
        let d = self.descriptor(key)?;
        let handles = [d.solution, d.previous_solution];
        if handles.iter().all(|h| !h.is_allocated()) {
            return Ok(false);
        }
        self.tasks.wait_until_quiescent();
        {
            let mut arena = self.arena.lock();
            for h in handles.into_iter().filter(|h| h.is_allocated()) {
                self.snapshots.remove(&h);
                arena.release(h)?;
            }
        }
        self.descriptor_mut(key)?.reset_buffer_handles();
        Ok(true)
    }

    /// Release buffers still held by an `Erased` descriptor.
    pub fn ensure_no_unnecessary_memory(&mut self, key: PatchKey) -> Result<(), EngineError> {
        let d = self.descriptor(key)?;
        let (kind, owns_any) = (
            d.kind,
            d.solution.is_allocated() || d.previous_solution.is_allocated(),
        );
        match kind {
            CellKind::Erased => self.release_buffers(key).map(|_| ()),
            CellKind::Cell => Ok(()),
            other if owns_any => {
                Err(EngineError::UnsupportedCellKind {
                    kind: other,
                    operation: "own field-data buffers",
                })
            }
            _ => Ok(()),
        }
    }

    /// Exchange the roles of `solution` and `previousSolution`.
    pub fn swap_solution_and_previous(&mut self, key: PatchKey) -> Result<(), EngineError> {
        let d = self.descriptor_mut(key)?;
        std::mem::swap(&mut d.solution, &mut d.previous_solution);
        Ok(())
    }

    pub fn with_buffer<R>(
        &self,
        handle: BufferHandle,
        f: impl FnOnce(&[f64]) -> R,
    ) -> Result<R, EngineError> {
        let arena = self.arena.lock();
        Ok(f(arena.get(handle)?))
    }

    pub fn with_buffer_mut<R>(
        &self,
        handle: BufferHandle,
        f: impl FnOnce(&mut [f64]) -> R,
    ) -> Result<R, EngineError> {
        let mut arena = self.arena.lock();
        Ok(f(arena.get_mut(handle)?))
    }

    pub fn with_solution<R>(&self, key: PatchKey, f: impl FnOnce(&[f64]) -> R) -> Result<R, EngineError> {
        self.with_buffer(self.descriptor(key)?.solution, f)
    }

    pub fn with_solution_mut<R>(
        &self,
        key: PatchKey,
        f: impl FnOnce(&mut [f64]) -> R,
    ) -> Result<R, EngineError> {
        self.with_buffer_mut(self.descriptor(key)?.solution, f)
    }

    /// `f(solution, previous_solution)` of one patch.
    pub fn with_solution_and_previous_mut<R>(
        &self,
        key: PatchKey,
        f: impl FnOnce(&mut [f64], &mut [f64]) -> R,
    ) -> Result<R, EngineError> {
        let d = self.descriptor(key)?;
        let mut arena = self.arena.lock();
        let (cur, prev) = arena.get_pair_mut(d.solution, d.previous_solution)?;
        Ok(f(cur, prev))
    }

    /// `f(solution of a, solution of b)` for two distinct patches.
    pub fn with_two_solutions_mut<R>(
        &self,
        a: PatchKey,
        b: PatchKey,
        f: impl FnOnce(&mut [f64], &mut [f64]) -> R,
    ) -> Result<R, EngineError> {
        let (ha, hb) = (self.descriptor(a)?.solution, self.descriptor(b)?.solution);
        let mut arena = self.arena.lock();
        let (sa, sb) = arena.get_pair_mut(ha, hb)?;
        Ok(f(sa, sb))
    }

    /// Number of live buffers across all patches.
    pub fn live_buffers(&self) -> usize {
        self.arena.lock().live()
    }

    // --- compression --------------------------------------------------------

    /// Store a compressed snapshot of the patch's current solution, on the
    /// background pool when `background` is set.
    pub fn compress_solution(
        &self,
        key: PatchKey,
        accuracy: f64,
        background: bool,
    ) -> Result<(), EngineError> {
        let handle = self.descriptor(key)?.solution;
        if !handle.is_allocated() {
            return Ok(());
        }
        let arena = Arc::clone(&self.arena);
        let snapshots = Arc::clone(&self.snapshots);
        let task = move || {
            let compressed = {
                let arena = arena.lock();
                arena.get(handle).ok().map(|v| CompressedPatch::compress(v, accuracy))
            };
            if let Some(c) = compressed {
                snapshots.insert(handle, c);
            }
        };
        if background {
            self.tasks.spawn(task);
        } else {
            task();
        }
        Ok(())
    }

    /// Latest compressed snapshot of the patch's current solution.
    pub fn compressed_solution(&self, key: PatchKey) -> Result<Option<CompressedPatch>, EngineError> {
        let handle = self.descriptor(key)?.solution;
        Ok(self.snapshots.get(&handle).map(|c| c.value().clone()))
    }

    /// Total bytes held by compressed snapshots.
    pub fn compressed_bytes(&self) -> usize {
        self.snapshots.iter().map(|c| c.value().compressed_bytes()).sum()
    }
}

impl<const D: usize> DebugInvariants for PatchStore<D> {
    fn validate_invariants(&self) -> Result<(), EngineError> {
        let mut owned = 0;
        for (cell, list) in &self.cells {
            for (e, d) in list.iter().enumerate() {
                d.validate_invariants()?;
                ensure(
                    list.iter().filter(|o| o.solver == d.solver).count() == 1,
                    || EngineError::DuplicatePatch {
                        cell: *cell,
                        solver: d.solver,
                    },
                )?;
                if d.has_buffers() {
                    let arena = self.arena.lock();
                    ensure(arena.is_valid(d.solution), || {
                        EngineError::InvalidBufferHandle(d.solution)
                    })?;
                    ensure(arena.is_valid(d.previous_solution), || {
                        EngineError::UnknownElement {
                            cell: *cell,
                            element: e,
                        }
                    })?;
                    owned += 2;
                }
            }
        }
        let live = self.live_buffers();
        ensure(owned == live, || EngineError::LengthMismatch {
            expected: owned,
            found: live,
        })
    }
}

impl<const D: usize> std::fmt::Debug for PatchStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchStore")
            .field("cells", &self.cells.len())
            .field("patches", &self.patch_count())
            .field("arena", &*self.arena.lock())
            .finish()
    }
}
