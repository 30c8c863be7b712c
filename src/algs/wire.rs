//! Fixed, versioned, little-endian wire types for the exchange protocols.
//!
//! Every message is a [`WireMessageHeader`] followed by `count` payload
//! elements of `elem_size` bytes each. All multi-byte integers in these
//! structs are little-endian on the wire; we store them pre-LE with
//! `.to_le()` and decode with `from_le()`. Floats travel as their LE bit
//! patterns.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

use crate::engine_error::EngineError;
use crate::patch::cell_kind::{CellKind, LimiterStatus};
use crate::patch::descriptor::PatchDescriptor;
use crate::patch::index::{ParentRef, SolverId};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), EngineError> {
    if actual == expected {
        Ok(())
    } else {
        Err(EngineError::Wire(format!("expected {expected} bytes, got {actual}")))
    }
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Largest dimension a wire record can carry.
pub const WIRE_MAX_DIM: usize = 3;

// ===== Header ==============================================================

/// Header of every message: protocol version, message type, sender-side
/// level and position, and the payload shape.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMessageHeader {
    pub version_le: u16,
    pub kind_le: u16,
    pub level_le: u32,
    pub count_le: u32,
    pub elem_size_le: u32,
    /// Cell-centre coordinates, unused axes zero.
    pub x_le: [u64; WIRE_MAX_DIM],
}

impl WireMessageHeader {
    pub const SIZE: usize = 40;

    pub fn new(kind: u16, x: &[f64], level: u32, count: usize, elem_size: usize) -> Self {
        let mut x_le = [0u64; WIRE_MAX_DIM];
        for (slot, v) in x_le.iter_mut().zip(x) {
            *slot = v.to_bits().to_le();
        }
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            level_le: level.to_le(),
            count_le: (count as u32).to_le(),
            elem_size_le: (elem_size as u32).to_le(),
            x_le,
        }
    }

    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn level(&self) -> u32 {
        u32::from_le(self.level_le)
    }
    pub fn count(&self) -> usize {
        u32::from_le(self.count_le) as usize
    }
    pub fn elem_size(&self) -> usize {
        u32::from_le(self.elem_size_le) as usize
    }
    pub fn x(&self) -> [f64; WIRE_MAX_DIM] {
        self.x_le.map(|b| f64::from_bits(u64::from_le(b)))
    }

    /// Split a message into its header and payload bytes.
    pub fn split(bytes: &[u8]) -> Result<(Self, &[u8]), EngineError> {
        if bytes.len() < Self::SIZE {
            return Err(EngineError::Wire(format!(
                "message of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let (head, payload) = bytes.split_at(Self::SIZE);
        let hdr: Self = bytemuck::pod_read_unaligned(head);
        if hdr.version() != WIRE_VERSION {
            return Err(EngineError::Wire(format!(
                "wire version {} (expected {WIRE_VERSION})",
                hdr.version()
            )));
        }
        expect_exact_len(payload.len(), hdr.count() * hdr.elem_size())?;
        Ok((hdr, payload))
    }
}

// ===== Scalars =============================================================

/// Element types a payload can be made of.
pub trait WireScalar: Copy + Sized {
    const SIZE: usize;
    fn encode_into(values: &[Self], out: &mut Vec<u8>);
    fn decode(bytes: &[u8]) -> Vec<Self>;
}

impl WireScalar for f64 {
    const SIZE: usize = 8;
    fn encode_into(values: &[Self], out: &mut Vec<u8>) {
        out.reserve(values.len() * Self::SIZE);
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes
            .chunks_exact(Self::SIZE)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                f64::from_le_bytes(b)
            })
            .collect()
    }
}

impl WireScalar for i32 {
    const SIZE: usize = 4;
    fn encode_into(values: &[Self], out: &mut Vec<u8>) {
        out.reserve(values.len() * Self::SIZE);
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes
            .chunks_exact(Self::SIZE)
            .map(|c| {
                let mut b = [0u8; 4];
                b.copy_from_slice(c);
                i32::from_le_bytes(b)
            })
            .collect()
    }
}

impl WireScalar for u8 {
    const SIZE: usize = 1;
    fn encode_into(values: &[Self], out: &mut Vec<u8>) {
        out.extend_from_slice(values);
    }
    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes.to_vec()
    }
}

// ===== Patch descriptors ===================================================

/// A patch descriptor without its buffer handles, as shipped when cells
/// move between ranks.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireDescriptor {
    pub solver_le: u32,
    pub kind_le: i32,
    pub level_le: u32,
    pub limiter_le: u32,
    pub parent_le: i64,
    pub time_stamp_le: u64,
    pub previous_time_stamp_le: u64,
    pub time_step_size_le: u64,
    pub previous_time_step_size_le: u64,
    pub next_time_step_size_le: u64,
    pub offset_le: [u64; WIRE_MAX_DIM],
    pub size_le: [u64; WIRE_MAX_DIM],
}

impl WireDescriptor {
    pub const SIZE: usize = 112;

    pub fn encode<const D: usize>(d: &PatchDescriptor<D>) -> Result<Self, EngineError> {
        if D > WIRE_MAX_DIM {
            return Err(EngineError::Wire(format!("dimension {D} exceeds {WIRE_MAX_DIM}")));
        }
        let mut offset_le = [0u64; WIRE_MAX_DIM];
        let mut size_le = [0u64; WIRE_MAX_DIM];
        for k in 0..D {
            offset_le[k] = d.offset[k].to_bits().to_le();
            size_le[k] = d.size[k].to_bits().to_le();
        }
        let f = |v: f64| v.to_bits().to_le();
        Ok(Self {
            solver_le: (d.solver.get() as u32).to_le(),
            kind_le: d.kind.to_wire().to_le(),
            level_le: d.level.to_le(),
            limiter_le: u32::from(d.limiter_status.value()).to_le(),
            parent_le: d.parent.to_raw()?.to_le(),
            time_stamp_le: f(d.time_stamp),
            previous_time_stamp_le: f(d.previous_time_stamp),
            time_step_size_le: f(d.time_step_size),
            previous_time_step_size_le: f(d.previous_time_step_size),
            next_time_step_size_le: f(d.next_time_step_size),
            offset_le,
            size_le,
        })
    }

    /// Rebuild a descriptor; buffer handles start unallocated.
    pub fn decode<const D: usize>(&self) -> Result<PatchDescriptor<D>, EngineError> {
        if D > WIRE_MAX_DIM {
            return Err(EngineError::Wire(format!("dimension {D} exceeds {WIRE_MAX_DIM}")));
        }
        let f = |b: u64| f64::from_bits(u64::from_le(b));
        let kind = CellKind::from_wire(i32::from_le(self.kind_le))?;
        let limiter = u8::try_from(u32::from_le(self.limiter_le))
            .map_err(|_| EngineError::Wire("limiter status out of range".into()))
            .and_then(LimiterStatus::from_value)?;
        let mut offset = [0.0; D];
        let mut size = [0.0; D];
        for k in 0..D {
            offset[k] = f(self.offset_le[k]);
            size[k] = f(self.size_le[k]);
        }
        let mut d = PatchDescriptor::new(
            SolverId::new(u32::from_le(self.solver_le) as usize),
            kind,
            u32::from_le(self.level_le),
            ParentRef::from_raw(i64::from_le(self.parent_le))?,
            size,
            offset,
        );
        d.time_stamp = f(self.time_stamp_le);
        d.previous_time_stamp = f(self.previous_time_stamp_le);
        d.time_step_size = f(self.time_step_size_le);
        d.previous_time_step_size = f(self.previous_time_step_size_le);
        d.next_time_step_size = f(self.next_time_step_size_le);
        d.limiter_status = limiter;
        Ok(d)
    }
}

impl WireScalar for WireDescriptor {
    const SIZE: usize = Self::SIZE;
    fn encode_into(values: &[Self], out: &mut Vec<u8>) {
        out.extend_from_slice(cast_slice(values));
    }
    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes
            .chunks_exact(Self::SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    // Pod/Zeroable ensures no padding contains uninit when cast to bytes.
    assert!(size_of::<WireMessageHeader>() == WireMessageHeader::SIZE);
    assert!(size_of::<WireDescriptor>() == WireDescriptor::SIZE);
    assert!(align_of::<WireDescriptor>() == 8);
};
