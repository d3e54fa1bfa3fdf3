use burn::prelude::*;

use crate::error::{Result, SyncBnError};

/// `(N, C, L)` view of a rank-`D` activation tensor. Every axis after the
/// channel axis is folded into `L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout<const D: usize> {
    dims: [usize; D],
}

impl<const D: usize> ChannelLayout<D> {
    pub fn of<B: Backend>(
        operation: &'static str,
        tensor: &Tensor<B, D>,
    ) -> Result<Self> {
        let dims = tensor.dims();

        if D < 2 {
            return Err(SyncBnError::shape(
                operation,
                "(N, C) or (N, C, L...)",
                &dims,
            ));
        }

        Ok(Self { dims })
    }

    pub fn dims(&self) -> [usize; D] {
        self.dims
    }

    pub fn batch(&self) -> usize {
        self.dims[0]
    }

    pub fn channels(&self) -> usize {
        self.dims[1]
    }

    pub fn spatial(&self) -> usize {
        self.dims[2..].iter().product()
    }

    /// Elements reduced into each channel's statistics.
    pub fn count(&self) -> usize {
        self.batch() * self.spatial()
    }

    pub fn flatten<B: Backend>(&self, tensor: Tensor<B, D>) -> Tensor<B, 3> {
        tensor.reshape([self.batch(), self.channels(), self.spatial()])
    }

    pub fn restore<B: Backend>(&self, tensor: Tensor<B, 3>) -> Tensor<B, D> {
        tensor.reshape(self.dims)
    }

    pub fn check_channels<B: Backend>(
        &self,
        operation: &'static str,
        name: &str,
        tensor: &Tensor<B, 1>,
    ) -> Result<()> {
        let [len] = tensor.dims();

        if len != self.channels() {
            return Err(SyncBnError::shape(
                operation,
                format!("{name} of length {}", self.channels()),
                &[len],
            ));
        }

        Ok(())
    }

    pub fn check_same<B: Backend>(
        &self,
        operation: &'static str,
        name: &str,
        tensor: &Tensor<B, D>,
    ) -> Result<()> {
        let dims = tensor.dims();

        if dims != self.dims {
            return Err(SyncBnError::shape(
                operation,
                format!("{name} with dims {:?}", self.dims),
                &dims,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type B = NdArray<f32>;

    #[test]
    fn folds_trailing_axes() {
        let device = Default::default();
        let x = Tensor::<B, 4>::zeros([2, 3, 4, 5], &device);
        let layout = ChannelLayout::of("test", &x).unwrap();

        assert_eq!(layout.channels(), 3);
        assert_eq!(layout.spatial(), 20);
        assert_eq!(layout.count(), 40);
        assert_eq!(layout.flatten(x).dims(), [2, 3, 20]);
    }

    #[test]
    fn rank_two_has_unit_spatial() {
        let device = Default::default();
        let x = Tensor::<B, 2>::zeros([4, 8], &device);
        let layout = ChannelLayout::of("test", &x).unwrap();

        assert_eq!(layout.spatial(), 1);
        assert_eq!(layout.restore(layout.flatten(x)).dims(), [4, 8]);
    }

    #[test]
    fn rejects_rank_one() {
        let device = Default::default();
        let x = Tensor::<B, 1>::zeros([4], &device);

        assert!(matches!(
            ChannelLayout::of("test", &x),
            Err(SyncBnError::ShapeMismatch { got, .. }) if got == vec![4]
        ));
    }

    #[test]
    fn rejects_wrong_parameter_length() {
        let device = Default::default();
        let x = Tensor::<B, 2>::zeros([4, 8], &device);
        let layout = ChannelLayout::of("test", &x).unwrap();

        assert!(
            layout
                .check_channels("test", "gamma", &Tensor::<B, 1>::zeros([7], &device))
                .is_err()
        );
        assert!(
            layout
                .check_channels("test", "gamma", &Tensor::<B, 1>::zeros([8], &device))
                .is_ok()
        );
    }
}
