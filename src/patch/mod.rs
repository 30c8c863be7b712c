//! Patch store: descriptors, field-data buffers, and their memory layout.

pub mod arena;
pub mod cell_kind;
pub mod compression;
pub mod descriptor;
pub mod index;
pub mod layout;
pub mod store;

pub use arena::{BufferHandle, DataArena};
pub use cell_kind::{CellKind, LimiterStatus};
pub use descriptor::PatchDescriptor;
pub use index::{CellIndex, ElementIndex, ParentRef, PatchKey, SolverId};
pub use layout::PatchLayout;
pub use store::PatchStore;
