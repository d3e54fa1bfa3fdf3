//! Numerical kernels behind the two operators.
//!
//! Kernels always see activations as `(N, C, L)`; reshaping from the caller's
//! rank happens in [`crate::function`]. Each [`ComputePath`] has one
//! implementation of [`NormKernels`]; only the accelerator one can go backward.

use burn::prelude::*;
use derive_new::new;

use crate::{device::ComputePath, error::Result};

mod accelerator;
mod host;

pub use accelerator::AcceleratorKernels;
pub use host::HostKernels;

/// Uncombined per-channel reduction of one replica's batch.
#[derive(new, Debug, Clone)]
pub struct ChannelStatistics<B: Backend> {
    pub sum: Tensor<B, 1>,
    pub sum_squares: Tensor<B, 1>,
}

impl<B: Backend> ChannelStatistics<B> {
    pub fn channels(&self) -> usize {
        self.sum.dims()[0]
    }

    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            sum: self.sum.to_device(device),
            sum_squares: self.sum_squares.to_device(device),
        }
    }

    /// Adds another replica's partial sums, on this replica's device.
    pub fn combine(self, other: Self) -> Self {
        let device = self.sum.device();
        let other = other.to_device(&device);

        Self {
            sum: self.sum + other.sum,
            sum_squares: self.sum_squares + other.sum_squares,
        }
    }
}

/// Per-channel statistics and affine parameters fed to the normalization.
#[derive(new, Debug, Clone)]
pub struct NormalizationParameters<B: Backend> {
    pub mean: Tensor<B, 1>,
    pub std: Tensor<B, 1>,
    pub gamma: Tensor<B, 1>,
    pub beta: Tensor<B, 1>,
}

impl<B: Backend> NormalizationParameters<B> {
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            mean: self.mean.to_device(device),
            std: self.std.to_device(device),
            gamma: self.gamma.to_device(device),
            beta: self.beta.to_device(device),
        }
    }
}

/// Gradients of the normalization with respect to each of its inputs.
#[derive(new, Debug, Clone)]
pub struct GradientBundle<B: Backend, const D: usize> {
    pub grad_input: Tensor<B, D>,
    pub grad_mean: Tensor<B, 1>,
    pub grad_std: Tensor<B, 1>,
    pub grad_gamma: Tensor<B, 1>,
    pub grad_beta: Tensor<B, 1>,
}

impl<B: Backend, const D: usize> GradientBundle<B, D> {
    pub fn map_input<const D2: usize>(
        self,
        f: impl FnOnce(Tensor<B, D>) -> Tensor<B, D2>,
    ) -> GradientBundle<B, D2> {
        GradientBundle {
            grad_input: f(self.grad_input),
            grad_mean: self.grad_mean,
            grad_std: self.grad_std,
            grad_gamma: self.grad_gamma,
            grad_beta: self.grad_beta,
        }
    }
}

/// The kernel set every compute path provides.
pub trait NormKernels<B: Backend>: Sync {
    fn path(&self) -> ComputePath;

    fn sumsquare_forward(&self, input: Tensor<B, 3>) -> Result<ChannelStatistics<B>>;

    fn sumsquare_backward(
        &self,
        input: Tensor<B, 3>,
        grad_sum: Tensor<B, 1>,
        grad_square: Tensor<B, 1>,
    ) -> Result<Tensor<B, 3>>;

    fn batchnorm_forward(
        &self,
        input: Tensor<B, 3>,
        params: &NormalizationParameters<B>,
    ) -> Result<Tensor<B, 3>>;

    /// With `statistics_grad` unset, mean and std are constants and their
    /// gradients are zero.
    fn batchnorm_backward(
        &self,
        grad_output: Tensor<B, 3>,
        input: Tensor<B, 3>,
        params: &NormalizationParameters<B>,
        statistics_grad: bool,
    ) -> Result<GradientBundle<B, 3>>;
}

impl ComputePath {
    pub fn kernels<B: Backend>(self) -> &'static dyn NormKernels<B> {
        match self {
            ComputePath::Host => &HostKernels,
            ComputePath::Accelerator => &AcceleratorKernels,
        }
    }
}

/// `(N, C, L)` to `(C)` by summing over batch and spatial axes.
pub(crate) fn reduce_channels<B: Backend>(tensor: Tensor<B, 3>) -> Tensor<B, 1> {
    let [_, channels, _] = tensor.dims();

    tensor.sum_dim(2).sum_dim(0).reshape([channels])
}

/// `(C)` to `(1, C, 1)` for broadcasting against `(N, C, L)`.
pub(crate) fn per_channel<B: Backend>(tensor: Tensor<B, 1>) -> Tensor<B, 3> {
    let [channels] = tensor.dims();

    tensor.reshape([1, channels, 1])
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type B = NdArray<f32>;

    #[test]
    fn combine_adds_partial_sums() {
        let device = Default::default();
        let left = ChannelStatistics::<B>::new(
            Tensor::from_floats([1.0, 2.0], &device),
            Tensor::from_floats([1.0, 4.0], &device),
        );
        let right = ChannelStatistics::<B>::new(
            Tensor::from_floats([3.0, 4.0], &device),
            Tensor::from_floats([9.0, 16.0], &device),
        );

        let combined = left.combine(right);

        assert_eq!(combined.channels(), 2);
        assert_eq!(
            combined.sum.into_data().iter::<f32>().collect::<Vec<_>>(),
            vec![4.0, 6.0]
        );
        assert_eq!(
            combined.sum_squares.into_data().iter::<f32>().collect::<Vec<_>>(),
            vec![10.0, 20.0]
        );
    }

    #[test]
    fn paths_resolve_to_their_kernels() {
        assert_eq!(
            ComputePath::Host.kernels::<B>().path(),
            ComputePath::Host
        );
        assert_eq!(
            ComputePath::Accelerator.kernels::<B>().path(),
            ComputePath::Accelerator
        );
    }
}
