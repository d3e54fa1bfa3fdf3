use burn::prelude::*;

use super::{
    ChannelStatistics, GradientBundle, NormKernels, NormalizationParameters, per_channel,
    reduce_channels,
};
use crate::{device::ComputePath, error::Result};

/// Kernels written as backend tensor ops, so they run wherever the tensors live.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceleratorKernels;

impl<B: Backend> NormKernels<B> for AcceleratorKernels {
    fn path(&self) -> ComputePath {
        ComputePath::Accelerator
    }

    fn sumsquare_forward(&self, input: Tensor<B, 3>) -> Result<ChannelStatistics<B>> {
        let sum_squares = reduce_channels(input.clone() * input.clone());
        let sum = reduce_channels(input);

        Ok(ChannelStatistics::new(sum, sum_squares))
    }

    fn sumsquare_backward(
        &self,
        input: Tensor<B, 3>,
        grad_sum: Tensor<B, 1>,
        grad_square: Tensor<B, 1>,
    ) -> Result<Tensor<B, 3>> {
        Ok(input
            .mul(per_channel(grad_square))
            .mul_scalar(2.0)
            .add(per_channel(grad_sum)))
    }

    fn batchnorm_forward(
        &self,
        input: Tensor<B, 3>,
        params: &NormalizationParameters<B>,
    ) -> Result<Tensor<B, 3>> {
        Ok(input
            .sub(per_channel(params.mean.clone()))
            .div(per_channel(params.std.clone()))
            .mul(per_channel(params.gamma.clone()))
            .add(per_channel(params.beta.clone())))
    }

    fn batchnorm_backward(
        &self,
        grad_output: Tensor<B, 3>,
        input: Tensor<B, 3>,
        params: &NormalizationParameters<B>,
        statistics_grad: bool,
    ) -> Result<GradientBundle<B, 3>> {
        let xhat = input
            .sub(per_channel(params.mean.clone()))
            .div(per_channel(params.std.clone()));
        // gamma / std
        let scale = params.gamma.clone().div(params.std.clone());

        let grad_beta = reduce_channels(grad_output.clone());
        let grad_gamma = reduce_channels(grad_output.clone().mul(xhat));
        let grad_input = grad_output.mul(per_channel(scale.clone()));

        let (grad_mean, grad_std) = if statistics_grad {
            (
                grad_beta.clone().mul(scale.clone()).neg(),
                grad_gamma.clone().mul(scale).neg(),
            )
        } else {
            (grad_beta.zeros_like(), grad_gamma.zeros_like())
        };

        Ok(GradientBundle::new(
            grad_input, grad_mean, grad_std, grad_gamma, grad_beta,
        ))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use burn::backend::NdArray;

    use super::*;

    type B = NdArray<f32>;

    fn values<const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
        tensor.into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_sumsquare_forward_values() {
        let device = Default::default();
        let x = Tensor::<B, 3>::from_floats([[[1.0], [2.0]], [[3.0], [4.0]]], &device);

        let stats = AcceleratorKernels.sumsquare_forward(x).unwrap();

        assert_eq!(values(stats.sum), vec![4.0, 6.0]);
        assert_eq!(values(stats.sum_squares), vec![10.0, 20.0]);
    }

    #[test]
    fn test_sumsquare_backward_values() {
        let device = Default::default();
        let x = Tensor::<B, 3>::from_floats([[[1.0, -1.0], [2.0, 0.5]]], &device);
        let grad_sum = Tensor::from_floats([0.5, 1.0], &device);
        let grad_square = Tensor::from_floats([1.0, 2.0], &device);

        let grad = AcceleratorKernels
            .sumsquare_backward(x, grad_sum, grad_square)
            .unwrap();

        // g_sum + 2 * x * g_sq
        assert_eq!(values(grad), vec![2.5, -1.5, 9.0, 3.0]);
    }

    #[test]
    fn test_batchnorm_backward_values() {
        let device = Default::default();
        // one channel, xhat = [-1, 1]
        let x = Tensor::<B, 3>::from_floats([[[1.0, 5.0]]], &device);
        let grad_output = Tensor::<B, 3>::from_floats([[[1.0, 3.0]]], &device);
        let params = NormalizationParameters::new(
            Tensor::from_floats([3.0], &device),
            Tensor::from_floats([2.0], &device),
            Tensor::from_floats([4.0], &device),
            Tensor::from_floats([1.0], &device),
        );

        let grads = AcceleratorKernels
            .batchnorm_backward(grad_output, x, &params, true)
            .unwrap();

        assert_eq!(values(grads.grad_input), vec![2.0, 6.0]);
        assert_relative_eq!(values(grads.grad_beta)[0], 4.0);
        assert_relative_eq!(values(grads.grad_gamma)[0], 2.0);
        assert_relative_eq!(values(grads.grad_mean)[0], -8.0);
        assert_relative_eq!(values(grads.grad_std)[0], -4.0);
    }

    #[test]
    fn test_frozen_statistics_have_zero_gradient() {
        let device = Default::default();
        let x = Tensor::<B, 3>::from_floats([[[1.0, 5.0]]], &device);
        let params = NormalizationParameters::new(
            Tensor::from_floats([3.0], &device),
            Tensor::from_floats([2.0], &device),
            Tensor::from_floats([4.0], &device),
            Tensor::from_floats([1.0], &device),
        );

        let grads = AcceleratorKernels
            .batchnorm_backward(x.clone(), x, &params, false)
            .unwrap();

        assert_eq!(values(grads.grad_mean), vec![0.0]);
        assert_eq!(values(grads.grad_std), vec![0.0]);
        assert_relative_eq!(values(grads.grad_beta)[0], 6.0);
    }
}
