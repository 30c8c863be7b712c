//! Geometry helpers shared by the patch store, the exchange protocol and the
//! orchestrator: relative positions of neighbouring patches, faces, and
//! tolerant scalar comparisons.

use std::fmt;

use num_traits::Float;

use crate::engine_error::EngineError;

/// Absolute tolerance used by [`smaller`], [`greater`] and [`equals`],
/// scaled by the magnitude of the operands when they exceed one.
pub const NUMERICAL_ZERO_DIFFERENCE: f64 = 1.0e-8;

#[inline]
fn tolerance<T: Float>(a: T, b: T) -> T {
    let eps = T::from(NUMERICAL_ZERO_DIFFERENCE).unwrap_or_else(T::epsilon);
    eps * T::one().max(a.abs()).max(b.abs())
}

/// `a < b` by more than the numerical zero difference.
#[inline]
pub fn smaller<T: Float>(a: T, b: T) -> bool {
    b - a > tolerance(a, b)
}

/// `a > b` by more than the numerical zero difference.
#[inline]
pub fn greater<T: Float>(a: T, b: T) -> bool {
    a - b > tolerance(a, b)
}

/// `a == b` up to the numerical zero difference.
#[inline]
pub fn equals<T: Float>(a: T, b: T) -> bool {
    !smaller(a, b) && !greater(a, b)
}

/// Geometric centre of a patch.
pub fn centre<const D: usize>(offset: &[f64; D], size: &[f64; D]) -> [f64; D] {
    std::array::from_fn(|d| offset[d] + 0.5 * size[d])
}

/// One of the `2*D` faces of a patch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Face {
    /// Axis normal to the face.
    pub normal: usize,
    /// Whether the face lies on the upper end of `normal`.
    pub positive: bool,
}

impl Face {
    /// `2*normal + 1` for the upper face, `2*normal` for the lower one.
    #[inline]
    pub fn index(self) -> usize {
        2 * self.normal + usize::from(self.positive)
    }

    #[inline]
    pub fn opposite(self) -> Self {
        Face {
            normal: self.normal,
            positive: !self.positive,
        }
    }
}

/// Integer offset vector from one patch to an adjacent one, entries in
/// `{-1, 0, 1}`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct RelativePosition<const D: usize>([i8; D]);

impl<const D: usize> RelativePosition<D> {
    pub fn new(entries: [i8; D]) -> Result<Self, EngineError> {
        if entries.iter().all(|e| (-1..=1).contains(e)) {
            Ok(Self(entries))
        } else {
            Err(EngineError::InvalidRelativePosition(
                entries.iter().map(|&e| i64::from(e)).collect(),
            ))
        }
    }

    /// Offset of `to` as seen from `from`, i.e. `to - from`.
    pub fn between(from: [i32; D], to: [i32; D]) -> Result<Self, EngineError> {
        let diff: [i64; D] = std::array::from_fn(|d| i64::from(to[d]) - i64::from(from[d]));
        if diff.iter().all(|e| (-1..=1).contains(e)) {
            Ok(Self(std::array::from_fn(|d| diff[d] as i8)))
        } else {
            Err(EngineError::InvalidRelativePosition(diff.to_vec()))
        }
    }

    /// Unit offset across `face`.
    pub fn of_face(face: Face) -> Self {
        let mut entries = [0i8; D];
        entries[face.normal] = if face.positive { 1 } else { -1 };
        Self(entries)
    }

    #[inline]
    pub fn entries(&self) -> [i8; D] {
        self.0
    }

    #[inline]
    pub fn inverse(self) -> Self {
        Self(self.0.map(|e| -e))
    }

    /// The face this offset crosses, or `None` for edges, corners and the
    /// zero vector.
    pub fn face(self) -> Option<Face> {
        let mut found = None;
        for (d, &e) in self.0.iter().enumerate() {
            if e != 0 {
                if found.is_some() {
                    return None;
                }
                found = Some(Face {
                    normal: d,
                    positive: e > 0,
                });
            }
        }
        found
    }

    /// Like [`face`](Self::face) but reports non-face offsets as an error.
    pub fn require_face(self) -> Result<Face, EngineError> {
        self.face()
            .ok_or_else(|| EngineError::NotAFaceNeighbour(self.0.to_vec()))
    }
}

impl<const D: usize> fmt::Debug for RelativePosition<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RelativePosition").field(&self.0).finish()
    }
}
