//! Dense parameter arrays.
//!
//! The averager only needs three things from an array: its shape, in-place
//! elementwise addition and in-place division by a scalar. [`ParamArray`]
//! captures exactly that, so any tensor backend can be averaged without
//! touching the algorithm. [`Tensor`] is the host-memory implementation used
//! by the safetensors loader and writer.

use safetensors::Dtype;

/// Capability set required to average an array.
pub trait ParamArray: Clone {
    /// Shape of the array.
    fn shape(&self) -> &[usize];

    /// Add `other` elementwise into `self`.
    ///
    /// Callers must check that both shapes are equal first.
    fn add_assign(&mut self, other: &Self);

    /// Divide every element by `divisor`.
    fn div_assign(&mut self, divisor: f32);
}

/// Row-major f32 tensor with the dtype it was stored as.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    dtype: Dtype,
}

impl Tensor {
    /// Create an f32 tensor. Returns `None` if `data` does not fill `shape`.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Option<Self> {
        Self::with_dtype(data, shape, Dtype::F32)
    }

    /// Create a tensor that remembers its source storage dtype.
    pub fn with_dtype(data: Vec<f32>, shape: Vec<usize>, dtype: Dtype) -> Option<Self> {
        let expected: usize = shape.iter().product();
        (expected == data.len()).then_some(Self { shape, data, dtype })
    }

    /// One-dimensional f32 tensor.
    pub fn from_slice(data: &[f32]) -> Self {
        Self {
            shape: vec![data.len()],
            data: data.to_vec(),
            dtype: Dtype::F32,
        }
    }

    /// Element values.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Storage dtype this tensor was loaded from.
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Number of elements.
    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    /// Consume the tensor, returning its elements.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

impl ParamArray for Tensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn add_assign(&mut self, other: &Self) {
        debug_assert_eq!(self.shape, other.shape);
        for (w, v) in self.data.iter_mut().zip(&other.data) {
            *w += *v;
        }
    }

    fn div_assign(&mut self, divisor: f32) {
        for w in &mut self.data {
            *w /= divisor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(Tensor::new(vec![1.0, 2.0, 3.0], vec![2, 2]).is_none());
        assert!(Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]).is_some());
    }

    #[test]
    fn test_scalar_shape() {
        let t = Tensor::new(vec![7.0], vec![]).unwrap();
        assert_eq!(t.num_elements(), 1);
        assert!(t.shape().is_empty());
    }

    #[test]
    fn test_add_and_divide() {
        let mut a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
        let b = Tensor::new(vec![3.0, 2.0, 1.0, 0.0], vec![2, 2]).unwrap();

        a.add_assign(&b);
        assert_eq!(a.as_slice(), &[4.0, 4.0, 4.0, 4.0]);

        a.div_assign(2.0);
        assert_eq!(a.as_slice(), &[2.0, 2.0, 2.0, 2.0]);
        assert_eq!(a.shape(), &[2, 2]);
    }

    #[test]
    fn test_dtype_is_kept() {
        let t = Tensor::with_dtype(vec![0.5; 4], vec![4], Dtype::BF16).unwrap();
        assert_eq!(t.dtype(), Dtype::BF16);
        assert_eq!(Tensor::from_slice(&[1.0]).dtype(), Dtype::F32);
    }
}
