//! Ghost-layer exchange between neighbouring patches, on one rank and across
//! rank boundaries, plus cell migration for load balancing.

pub mod fork_join;
pub mod local;
pub mod metadata;
pub mod remote;

pub use local::{extract_boundary_layer, fill_ghost_layer, merge_at_boundary, merge_local_neighbours};
pub use metadata::{NeighbourMetadata, decode_neighbour_metadata, encode_neighbour_metadata};
pub use remote::{DATA_MESSAGES_PER_NEIGHBOUR_COMMUNICATION, MergeOutcome};
