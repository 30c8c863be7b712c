//! Framed, typed point-to-point messages on top of a [`Communicator`].
//!
//! A message is addressed by `(peer rank, message type)`; messages of one
//! type between two ranks arrive in posting order. The receiver knows the
//! coordinate and level it expects and checks them against the header, which
//! is how a missing or surplus message (a desynchronised protocol) shows up.

use parking_lot::Mutex;

use super::communicator::{Communicator, Wait};
use super::wire::{WireMessageHeader, WireScalar, cast_slice};
use crate::engine_error::EngineError;
use crate::geometry::equals;

const MESSAGE_TYPES: usize = 5;

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    NeighbourMetadata = 1,
    NeighbourData = 2,
    MasterWorker = 3,
    ForkJoinDescriptors = 4,
    ForkJoinData = 5,
}

impl MessageType {
    pub const ALL: [MessageType; MESSAGE_TYPES] = [
        MessageType::NeighbourMetadata,
        MessageType::NeighbourData,
        MessageType::MasterWorker,
        MessageType::ForkJoinDescriptors,
        MessageType::ForkJoinData,
    ];

    #[inline]
    pub fn tag(self) -> u16 {
        self as u16
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    fn slot(self) -> usize {
        self as usize - 1
    }
}

/// Message statistics of one [`MessageType`] on one rank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageCounters {
    pub data_sent: usize,
    pub empty_sent: usize,
    pub received: usize,
    pub dropped: usize,
}

impl MessageCounters {
    pub fn sent(&self) -> usize {
        self.data_sent + self.empty_sent
    }
    pub fn consumed(&self) -> usize {
        self.received + self.dropped
    }
}

pub struct Messenger<C: Communicator> {
    comm: C,
    counters: Mutex<[MessageCounters; MESSAGE_TYPES]>,
}

impl<C: Communicator> Messenger<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            counters: Mutex::new([MessageCounters::default(); MESSAGE_TYPES]),
        }
    }

    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }
    #[inline]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }
    #[inline]
    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn counters(&self, ty: MessageType) -> MessageCounters {
        self.counters.lock()[ty.slot()]
    }

    /// Send `payload` to `to`. A zero-length payload counts as an empty
    /// message.
    pub fn send<T: WireScalar>(
        &self,
        to: usize,
        ty: MessageType,
        x: &[f64],
        level: u32,
        payload: &[T],
    ) {
        let hdr = WireMessageHeader::new(ty.tag(), x, level, payload.len(), T::SIZE);
        let mut bytes = Vec::with_capacity(WireMessageHeader::SIZE + payload.len() * T::SIZE);
        bytes.extend_from_slice(cast_slice(&[hdr]));
        T::encode_into(payload, &mut bytes);
        self.comm.isend(to, ty.tag(), &bytes).wait();

        let mut counters = self.counters.lock();
        if payload.is_empty() {
            counters[ty.slot()].empty_sent += 1;
        } else {
            counters[ty.slot()].data_sent += 1;
        }
    }

    /// Zero-length counterpart of [`send`](Self::send).
    pub fn send_empty(&self, to: usize, ty: MessageType, x: &[f64], level: u32) {
        self.send::<u8>(to, ty, x, level, &[]);
    }

    /// Receive the next message of type `ty` from `from` and decode it as `T`.
    /// An empty message yields an empty vector.
    pub fn receive<T: WireScalar>(
        &self,
        from: usize,
        ty: MessageType,
        x: &[f64],
        level: u32,
    ) -> Result<Vec<T>, EngineError> {
        let bytes = self.receive_raw(from, ty, x, level)?;
        let (hdr, payload) = WireMessageHeader::split(&bytes)?;
        if hdr.count() > 0 && hdr.elem_size() != T::SIZE {
            return Err(self.desync(
                from,
                format!(
                    "{ty:?} elements of {} bytes, expected {}",
                    hdr.elem_size(),
                    T::SIZE
                ),
            ));
        }
        self.counters.lock()[ty.slot()].received += 1;
        Ok(T::decode(payload))
    }

    /// Receive and discard the next message of type `ty` from `from`.
    pub fn drop_message(
        &self,
        from: usize,
        ty: MessageType,
        x: &[f64],
        level: u32,
    ) -> Result<(), EngineError> {
        self.receive_raw(from, ty, x, level)?;
        self.counters.lock()[ty.slot()].dropped += 1;
        Ok(())
    }

    fn receive_raw(
        &self,
        from: usize,
        ty: MessageType,
        x: &[f64],
        level: u32,
    ) -> Result<Vec<u8>, EngineError> {
        let bytes = self.comm.irecv(from, ty.tag()).wait().ok_or_else(|| {
            log::error!(
                "rank {}: no {ty:?} message from rank {from} (x={x:?}, level={level})",
                self.rank()
            );
            EngineError::CommError {
                neighbor: from,
                source: format!("no {ty:?} message arrived before the timeout").into(),
            }
        })?;
        let (hdr, _) = WireMessageHeader::split(&bytes)?;
        if hdr.kind() != ty.tag() {
            return Err(self.desync(
                from,
                format!("received message type {} while expecting {ty:?}", hdr.kind()),
            ));
        }
        let hx = hdr.x();
        let same_x = x.iter().zip(hx.iter()).all(|(a, b)| equals(*a, *b));
        if hdr.level() != level || !same_x {
            return Err(self.desync(
                from,
                format!(
                    "{ty:?} for x={:?} level {}, expected x={x:?} level {level}",
                    &hx[..x.len().min(hx.len())],
                    hdr.level()
                ),
            ));
        }
        Ok(bytes)
    }

    fn desync(&self, neighbor: usize, detail: String) -> EngineError {
        log::error!("rank {}: protocol desynchronisation with rank {neighbor}: {detail}", self.rank());
        EngineError::ProtocolDesync { neighbor, detail }
    }
}

impl<C: Communicator + std::fmt::Debug> std::fmt::Debug for Messenger<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("comm", &self.comm)
            .field("counters", &*self.counters.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::RayonComm;
    use std::time::Duration;

    fn pair() -> (Messenger<RayonComm>, Messenger<RayonComm>) {
        let mut world = RayonComm::world(2).into_iter();
        let a = world.next().unwrap().with_timeout(Duration::from_millis(50));
        let b = world.next().unwrap().with_timeout(Duration::from_millis(50));
        (Messenger::new(a), Messenger::new(b))
    }

    #[test]
    fn tags_are_distinct() {
        for ty in MessageType::ALL {
            assert_eq!(MessageType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(MessageType::from_tag(0), None);
    }

    #[test]
    fn data_and_empty_are_counted() {
        let (a, b) = pair();
        a.send(1, MessageType::NeighbourData, &[0.5], 1, &[1.0f64, 2.0]);
        a.send_empty(1, MessageType::NeighbourData, &[0.5], 1);
        assert_eq!(
            b.receive::<f64>(0, MessageType::NeighbourData, &[0.5], 1).unwrap(),
            vec![1.0, 2.0]
        );
        b.drop_message(0, MessageType::NeighbourData, &[0.5], 1).unwrap();

        let sent = a.counters(MessageType::NeighbourData);
        let got = b.counters(MessageType::NeighbourData);
        assert_eq!((sent.data_sent, sent.empty_sent), (1, 1));
        assert_eq!((got.received, got.dropped), (1, 1));
        assert_eq!(sent.sent(), got.consumed());
    }

    #[test]
    fn wrong_position_is_a_desync() {
        let (a, b) = pair();
        a.send(1, MessageType::NeighbourMetadata, &[0.5, 0.5], 2, &[1i32]);
        assert!(matches!(
            b.receive::<i32>(0, MessageType::NeighbourMetadata, &[0.5, 0.25], 2),
            Err(EngineError::ProtocolDesync { neighbor: 0, .. })
        ));
    }

    #[test]
    fn missing_message_is_a_comm_error() {
        let (_a, b) = pair();
        assert!(matches!(
            b.receive::<f64>(0, MessageType::MasterWorker, &[], 0),
            Err(EngineError::CommError { neighbor: 0, .. })
        ));
    }
}
