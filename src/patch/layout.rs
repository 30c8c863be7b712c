//! Memory layout of one patch buffer and the pure data movement used by the
//! exchange protocol.
//!
//! A buffer stores `(n + 2g)^D` nodes, axis 0 fastest, each node holding
//! `variables + parameters` consecutive values. Interior nodes have indices
//! `g..g+n` along every axis; the `g` outermost layers on each side form the
//! ghost region filled from neighbours or boundary conditions.

use crate::engine_error::EngineError;
use crate::geometry::Face;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PatchLayout<const D: usize> {
    variables: usize,
    parameters: usize,
    nodes_per_axis: usize,
    ghost_layer_width: usize,
}

impl<const D: usize> PatchLayout<D> {
    pub fn new(
        variables: usize,
        parameters: usize,
        nodes_per_axis: usize,
        ghost_layer_width: usize,
    ) -> Result<Self, EngineError> {
        if variables == 0 {
            return Err(EngineError::InvalidConfig {
                field: "variables",
                reason: "a patch needs at least one variable".into(),
            });
        }
        if nodes_per_axis == 0 {
            return Err(EngineError::InvalidConfig {
                field: "nodes_per_axis",
                reason: "a patch needs at least one node per axis".into(),
            });
        }
        if ghost_layer_width == 0 || ghost_layer_width > nodes_per_axis {
            return Err(EngineError::InvalidConfig {
                field: "ghost_layer_width",
                reason: format!(
                    "must lie in 1..={nodes_per_axis}, got {ghost_layer_width}"
                ),
            });
        }
        Ok(Self {
            variables,
            parameters,
            nodes_per_axis,
            ghost_layer_width,
        })
    }

    #[inline]
    pub fn variables(&self) -> usize {
        self.variables
    }
    #[inline]
    pub fn parameters(&self) -> usize {
        self.parameters
    }
    #[inline]
    pub fn nodes_per_axis(&self) -> usize {
        self.nodes_per_axis
    }
    #[inline]
    pub fn ghost_layer_width(&self) -> usize {
        self.ghost_layer_width
    }

    /// Values stored per node.
    #[inline]
    pub fn values_per_node(&self) -> usize {
        self.variables + self.parameters
    }

    /// Nodes per axis including both ghost regions.
    #[inline]
    pub fn nodes_per_axis_with_ghosts(&self) -> usize {
        self.nodes_per_axis + 2 * self.ghost_layer_width
    }

    /// `(vars + params) * n^D`
    pub fn unknowns_per_patch(&self) -> usize {
        self.values_per_node() * self.nodes_per_axis.pow(D as u32)
    }

    /// `(vars + params) * (n + 2g)^D - unknowns_per_patch`
    pub fn ghost_unknowns_per_patch(&self) -> usize {
        self.buffer_len() - self.unknowns_per_patch()
    }

    /// Length of one `solution` buffer.
    pub fn buffer_len(&self) -> usize {
        self.values_per_node() * self.nodes_per_axis_with_ghosts().pow(D as u32)
    }

    /// `g * (vars + params) * n^(D-1)`
    pub fn unknowns_per_face(&self) -> usize {
        self.ghost_layer_width
            * self.values_per_node()
            * self.nodes_per_axis.pow(D.saturating_sub(1) as u32)
    }

    /// `2D` faces worth of face unknowns.
    pub fn unknowns_per_boundary(&self) -> usize {
        2 * D * self.unknowns_per_face()
    }

    /// Offset of the first value of node `idx` (ghost-inclusive indices).
    #[inline]
    pub fn node_offset(&self, idx: &[usize; D]) -> usize {
        let m = self.nodes_per_axis_with_ghosts();
        let mut linear = 0;
        for d in (0..D).rev() {
            linear = linear * m + idx[d];
        }
        linear * self.values_per_node()
    }

    /// Visit every interior node with its ghost-inclusive index.
    pub fn for_each_interior_node(&self, mut f: impl FnMut(&[usize; D])) {
        let g = self.ghost_layer_width;
        let ranges = [(g, g + self.nodes_per_axis); D];
        for_each_node(&ranges, &mut f);
    }

    /// Copy the `g` interior layers adjacent to `face` into a fresh vector.
    pub fn extract_boundary_layer(&self, buffer: &[f64], face: Face) -> Result<Vec<f64>, EngineError> {
        self.check_buffer(buffer)?;
        let q = self.values_per_node();
        let mut layer = Vec::with_capacity(self.unknowns_per_face());
        for_each_node(&self.boundary_ranges(face), &mut |idx| {
            let o = self.node_offset(idx);
            layer.extend_from_slice(&buffer[o..o + q]);
        });
        Ok(layer)
    }

    /// Write `layer` into the ghost region on the side of `face`.
    pub fn fill_ghost_layer(&self, buffer: &mut [f64], layer: &[f64], face: Face) -> Result<(), EngineError> {
        self.check_buffer(buffer)?;
        if layer.len() != self.unknowns_per_face() {
            return Err(EngineError::LengthMismatch {
                expected: self.unknowns_per_face(),
                found: layer.len(),
            });
        }
        let q = self.values_per_node();
        let mut chunks = layer.chunks_exact(q);
        for_each_node(&self.ghost_ranges(face), &mut |idx| {
            if let Some(src) = chunks.next() {
                let o = self.node_offset(idx);
                buffer[o..o + q].copy_from_slice(src);
            }
        });
        Ok(())
    }

    /// Read the ghost region on the side of `face` in the order
    /// [`fill_ghost_layer`](Self::fill_ghost_layer) writes it.
    pub fn read_ghost_layer(&self, buffer: &[f64], face: Face) -> Result<Vec<f64>, EngineError> {
        self.check_buffer(buffer)?;
        let q = self.values_per_node();
        let mut layer = Vec::with_capacity(self.unknowns_per_face());
        for_each_node(&self.ghost_ranges(face), &mut |idx| {
            let o = self.node_offset(idx);
            layer.extend_from_slice(&buffer[o..o + q]);
        });
        Ok(layer)
    }

    fn check_buffer(&self, buffer: &[f64]) -> Result<(), EngineError> {
        if buffer.len() == self.buffer_len() {
            Ok(())
        } else {
            Err(EngineError::LengthMismatch {
                expected: self.buffer_len(),
                found: buffer.len(),
            })
        }
    }

    fn interior_ranges(&self) -> [(usize, usize); D] {
        let g = self.ghost_layer_width;
        [(g, g + self.nodes_per_axis); D]
    }

    fn boundary_ranges(&self, face: Face) -> [(usize, usize); D] {
        let (g, n) = (self.ghost_layer_width, self.nodes_per_axis);
        let mut r = self.interior_ranges();
        r[face.normal] = if face.positive { (n, n + g) } else { (g, 2 * g) };
        r
    }

    fn ghost_ranges(&self, face: Face) -> [(usize, usize); D] {
        let (g, n) = (self.ghost_layer_width, self.nodes_per_axis);
        let mut r = self.interior_ranges();
        r[face.normal] = if face.positive { (g + n, n + 2 * g) } else { (0, g) };
        r
    }
}

/// Odometer over the box `ranges`, axis 0 fastest.
fn for_each_node<const D: usize>(ranges: &[(usize, usize); D], f: &mut impl FnMut(&[usize; D])) {
    if ranges.iter().any(|&(lo, hi)| lo >= hi) {
        return;
    }
    let mut idx: [usize; D] = std::array::from_fn(|d| ranges[d].0);
    loop {
        f(&idx);
        let mut d = 0;
        loop {
            if d == D {
                return;
            }
            idx[d] += 1;
            if idx[d] < ranges[d].1 {
                break;
            }
            idx[d] = ranges[d].0;
            d += 1;
        }
    }
}
