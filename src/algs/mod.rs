//! Communication and data-movement algorithms.

pub mod communicator;
pub mod exchange;
pub mod messenger;
pub mod reduction;
pub mod wire;

pub use communicator::{Communicator, NoComm, RayonComm, Wait};
pub use messenger::{MessageType, Messenger};
pub use reduction::reduce_and_broadcast;
