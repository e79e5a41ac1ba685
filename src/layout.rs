use crate::estimate::FitError;
use ndarray::{Array1, ArrayD, IxDyn, ShapeBuilder};

/// Mixed-radix mapping between per-axis node subscripts and flat offsets into a
/// grid-sized buffer.
///
/// Axis 0 varies fastest: `flat = i0 + i1*n0 + i2*n0*n1 + ...` with 0-based
/// subscripts. Sparse-matrix columns and the reshaped solution both go through
/// this type, so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridLayout {
    shape: Vec<usize>,
    strides: Vec<usize>,
    total: usize,
}

impl GridLayout {
    pub fn new(shape: &[usize]) -> Result<Self, FitError> {
        if shape.is_empty() {
            return Err(FitError::EmptyInput { field: "grid" });
        }
        let mut strides = vec![1usize; shape.len()];
        let mut acc = 1usize;
        for (axis, &len) in shape.iter().enumerate() {
            strides[axis] = acc;
            acc = acc.checked_mul(len).ok_or_else(|| {
                FitError::SparseAssembly(format!(
                    "grid with shape {shape:?} has too many nodes to index"
                ))
            })?;
        }
        Ok(Self {
            shape: shape.to_vec(),
            strides,
            total: acc,
        })
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Offset between neighbouring nodes along `axis`.
    #[inline]
    pub fn stride(&self, axis: usize) -> usize {
        self.strides[axis]
    }

    pub fn total_nodes(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn flat_index(&self, subscripts: &[usize]) -> usize {
        debug_assert_eq!(subscripts.len(), self.shape.len());
        let mut flat = 0usize;
        for ((&idx, &len), &stride) in subscripts.iter().zip(&self.shape).zip(&self.strides) {
            debug_assert!(idx < len, "subscript {idx} out of range for axis of length {len}");
            flat += idx * stride;
        }
        flat
    }

    /// Writes the per-axis subscripts of `flat` into `out`.
    #[inline]
    pub fn subscripts_into(&self, flat: usize, out: &mut [usize]) {
        debug_assert!(flat < self.total);
        let mut rem = flat;
        for (slot, &len) in out.iter_mut().zip(&self.shape) {
            *slot = rem % len;
            rem /= len;
        }
    }

    pub fn subscripts(&self, flat: usize) -> Vec<usize> {
        let mut out = vec![0usize; self.shape.len()];
        self.subscripts_into(flat, &mut out);
        out
    }

    /// Reshapes a flat solution vector into a grid-shaped array.
    pub fn reshape(&self, flat: Array1<f64>) -> Result<ArrayD<f64>, FitError> {
        if flat.len() != self.total {
            return Err(FitError::InputShape {
                field: "solution",
                expected: self.total,
                found: flat.len(),
            });
        }
        let data = flat.to_vec();
        ArrayD::from_shape_vec(IxDyn(&self.shape).f(), data)
            .map_err(|e| FitError::SparseAssembly(format!("failed to reshape solution: {e}")))
    }

    /// Inverse of [`GridLayout::reshape`].
    pub fn flatten(&self, array: &ArrayD<f64>) -> Result<Array1<f64>, FitError> {
        if array.shape() != self.shape.as_slice() {
            return Err(FitError::InputShape {
                field: "grid values",
                expected: self.total,
                found: array.len(),
            });
        }
        let mut subs = vec![0usize; self.shape.len()];
        let mut out = Array1::<f64>::zeros(self.total);
        for (flat, slot) in out.iter_mut().enumerate() {
            self.subscripts_into(flat, &mut subs);
            *slot = array[IxDyn(&subs)];
        }
        Ok(out)
    }
}
