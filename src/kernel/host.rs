use burn::prelude::*;

use super::{ChannelStatistics, GradientBundle, NormKernels, NormalizationParameters};
use crate::{
    device::ComputePath,
    error::{Result, SyncBnError},
};

/// Reference loops over host copies of the tensors.
///
/// Values are read into `f64` whatever the backend's float element, and only
/// converted back when the result tensor is built. There are no gradient
/// kernels on this path.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostKernels;

fn host_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f64> {
    tensor
        .into_data()
        .iter::<B::FloatElem>()
        .map(|value| value.elem::<f64>())
        .collect()
}

impl<B: Backend> NormKernels<B> for HostKernels {
    fn path(&self) -> ComputePath {
        ComputePath::Host
    }

    fn sumsquare_forward(&self, input: Tensor<B, 3>) -> Result<ChannelStatistics<B>> {
        let [batch, channels, spatial] = input.dims();
        let device = input.device();
        let values = host_values(input);

        let mut sum = vec![0f64; channels];
        let mut sum_squares = vec![0f64; channels];

        for n in 0..batch {
            for c in 0..channels {
                let start = (n * channels + c) * spatial;

                for &x in &values[start..start + spatial] {
                    sum[c] += x;
                    sum_squares[c] += x * x;
                }
            }
        }

        let to_tensor =
            |acc: Vec<f64>| Tensor::from_data(TensorData::new(acc, [channels]), &device);

        Ok(ChannelStatistics::new(to_tensor(sum), to_tensor(sum_squares)))
    }

    fn sumsquare_backward(
        &self,
        _input: Tensor<B, 3>,
        _grad_sum: Tensor<B, 1>,
        _grad_square: Tensor<B, 1>,
    ) -> Result<Tensor<B, 3>> {
        Err(SyncBnError::UnsupportedDevicePath {
            operation: "sumsquare_backward",
            path: ComputePath::Host,
        })
    }

    fn batchnorm_forward(
        &self,
        input: Tensor<B, 3>,
        params: &NormalizationParameters<B>,
    ) -> Result<Tensor<B, 3>> {
        let dims @ [batch, channels, spatial] = input.dims();
        let device = input.device();
        let mut values = host_values(input);

        let mean = host_values(params.mean.clone());
        let std = host_values(params.std.clone());
        let gamma = host_values(params.gamma.clone());
        let beta = host_values(params.beta.clone());

        for n in 0..batch {
            for c in 0..channels {
                let start = (n * channels + c) * spatial;

                for x in &mut values[start..start + spatial] {
                    *x = (*x - mean[c]) / std[c] * gamma[c] + beta[c];
                }
            }
        }

        Ok(Tensor::from_data(TensorData::new(values, dims), &device))
    }

    fn batchnorm_backward(
        &self,
        _grad_output: Tensor<B, 3>,
        _input: Tensor<B, 3>,
        _params: &NormalizationParameters<B>,
        _statistics_grad: bool,
    ) -> Result<GradientBundle<B, 3>> {
        Err(SyncBnError::UnsupportedDevicePath {
            operation: "batchnorm_backward",
            path: ComputePath::Host,
        })
    }
}
