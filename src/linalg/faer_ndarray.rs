use faer::MatRef;
use ndarray::{Array1, ArrayBase, Data, Ix1};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("sparse Cholesky factorization failed: {0}")]
    Cholesky(String),
    #[error("sparse QR factorization failed: {0}")]
    Qr(String),
}

/// Read-only faer column view over a 1-D ndarray.
pub struct FaerColView<'a> {
    ptr: *const f64,
    len: usize,
    stride: isize,
    owned: Option<Array1<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerColView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix1>) -> Self {
        let len = array.len();
        let stride = array.strides()[0];
        // Reversed or broadcast layouts are materialized into a compact copy.
        if stride <= 0 {
            let owned = array.to_owned();
            return Self {
                ptr: owned.as_ptr(),
                len,
                stride: 1,
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            len,
            stride,
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, len, stride) = if let Some(owned) = &self.owned {
            (owned.as_ptr(), owned.len(), 1)
        } else {
            (self.ptr, self.len, self.stride)
        };
        // SAFETY: pointer, length and stride come either from a live ndarray
        // view with positive stride, or from the compact copy owned by this
        // wrapper, which outlives the returned view.
        unsafe { MatRef::from_raw_parts(ptr, len, 1, stride, 0) }
    }
}

/// Copies the first `len` entries of column 0 of a faer matrix.
pub fn column_to_array(mat: MatRef<'_, f64>, len: usize) -> Array1<f64> {
    debug_assert!(mat.nrows() >= len);
    Array1::from_shape_fn(len, |i| mat[(i, 0)])
}
