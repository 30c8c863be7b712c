//! Lossy fixed-accuracy compression of patch buffers.
//!
//! Values are quantised to integer multiples of the requested accuracy
//! relative to the buffer minimum; codes are stored little-endian in the
//! narrowest of 1, 2, 4 or 8 bytes that holds the largest code.

use bytes::{BufMut, Bytes, BytesMut};

/// Codes from here on are no longer exact integers in an `f64`.
const MAX_CODE: f64 = (1u64 << f64::MANTISSA_DIGITS) as f64;

#[derive(Clone, Debug, PartialEq)]
pub struct CompressedPatch {
    accuracy: f64,
    base: f64,
    bytes_per_value: u8,
    len: usize,
    codes: Bytes,
}

impl CompressedPatch {
    /// Compress `values` so that every decompressed value is within
    /// `accuracy / 2` of its input. Non-finite input, a non-positive
    /// accuracy or a range too wide for integer codes at that accuracy keeps
    /// the raw 8-byte representation.
    pub fn compress(values: &[f64], accuracy: f64) -> Self {
        let finite = values.iter().all(|v| v.is_finite());
        if !(accuracy > 0.0) || !finite {
            return Self::raw(values);
        }
        let base = values.iter().copied().fold(f64::INFINITY, f64::min);
        let base = if base.is_finite() { base } else { 0.0 };
        let top = values.iter().copied().fold(base, f64::max);
        if !((top - base) / accuracy < MAX_CODE) {
            return Self::raw(values);
        }
        let codes: Vec<u64> = values
            .iter()
            .map(|&v| ((v - base) / accuracy).round() as u64)
            .collect();
        let max = codes.iter().copied().max().unwrap_or(0);
        let width: u8 = match max {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            0x1_0000..=0xFFFF_FFFF => 4,
            _ => 8,
        };
        let mut out = BytesMut::with_capacity(codes.len() * width as usize);
        for c in codes {
            match width {
                1 => out.put_u8(c as u8),
                2 => out.put_u16_le(c as u16),
                4 => out.put_u32_le(c as u32),
                _ => out.put_u64_le(c),
            }
        }
        Self {
            accuracy,
            base,
            bytes_per_value: width,
            len: values.len(),
            codes: out.freeze(),
        }
    }

    fn raw(values: &[f64]) -> Self {
        let mut out = BytesMut::with_capacity(values.len() * 8);
        for &v in values {
            out.put_f64_le(v);
        }
        Self {
            accuracy: 0.0,
            base: 0.0,
            bytes_per_value: 8,
            len: values.len(),
            codes: out.freeze(),
        }
    }

    pub fn decompress(&self) -> Vec<f64> {
        let w = self.bytes_per_value as usize;
        self.codes
            .chunks_exact(w)
            .map(|c| {
                if self.accuracy == 0.0 {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    return f64::from_le_bytes(b);
                }
                let mut b = [0u8; 8];
                b[..w].copy_from_slice(c);
                self.base + u64::from_le_bytes(b) as f64 * self.accuracy
            })
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bytes_per_value(&self) -> u8 {
        self.bytes_per_value
    }

    /// Size of the compressed codes in bytes.
    #[inline]
    pub fn compressed_bytes(&self) -> usize {
        self.codes.len()
    }
}
