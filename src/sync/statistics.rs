use burn::prelude::*;

use crate::{
    error::{Result, SyncBnError},
    kernel::ChannelStatistics,
};

/// Sums every replica's partial statistics on `device`.
pub fn all_reduce<B: Backend>(
    partials: Vec<ChannelStatistics<B>>,
    device: &B::Device,
) -> Result<ChannelStatistics<B>> {
    let replicas = partials.len();

    let combined = partials
        .into_iter()
        .map(|stats| stats.to_device(device))
        .reduce(ChannelStatistics::combine)
        .ok_or(SyncBnError::EmptyReplicaSet {
            operation: "all_reduce",
        })?;

    log::debug!(
        "all_reduce: combined {replicas} replicas over {} channels",
        combined.channels()
    );

    Ok(combined)
}

/// Global batch statistics derived from combined sums.
#[derive(Debug, Clone)]
pub struct NormalizationStatistics<B: Backend> {
    pub mean: Tensor<B, 1>,
    /// Biased variance, clamped at zero.
    pub var: Tensor<B, 1>,
    /// `sqrt(var + epsilon)`
    pub std: Tensor<B, 1>,
    pub count: usize,
}

impl<B: Backend> NormalizationStatistics<B> {
    pub fn from_reduced(
        stats: &ChannelStatistics<B>,
        count: usize,
        epsilon: f64,
    ) -> Result<Self> {
        if count == 0 {
            return Err(SyncBnError::EmptyBatch {
                operation: "from_reduced",
            });
        }

        let mean = stats.sum.clone().div_scalar(count as f64);
        // Cancellation can push this slightly below zero.
        let var = stats
            .sum_squares
            .clone()
            .div_scalar(count as f64)
            .sub(mean.clone() * mean.clone())
            .clamp_min(0.0);
        let std = var.clone().add_scalar(epsilon).sqrt();

        Ok(Self {
            mean,
            var,
            std,
            count,
        })
    }

    /// Chains mean/std gradients back to the sums they were computed from.
    ///
    /// Returns `(grad_sum, grad_square)`.
    pub fn backward(
        &self,
        grad_mean: Tensor<B, 1>,
        grad_std: Tensor<B, 1>,
    ) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let count = self.count as f64;
        let grad_var = grad_std.div(self.std.clone().mul_scalar(2.0));

        let grad_sum = grad_mean
            .sub(self.mean.clone().mul(grad_var.clone()).mul_scalar(2.0))
            .div_scalar(count);
        let grad_square = grad_var.div_scalar(count);

        (grad_sum, grad_square)
    }
}

/// Exponential moving averages used outside of training.
#[derive(Debug, Clone)]
pub struct RunningStatistics<B: Backend> {
    pub mean: Tensor<B, 1>,
    pub var: Tensor<B, 1>,
}

impl<B: Backend> RunningStatistics<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            mean: Tensor::zeros([channels], device),
            var: Tensor::ones([channels], device),
        }
    }

    /// Folds in one batch, using its unbiased variance.
    pub fn update(&mut self, batch: &NormalizationStatistics<B>, momentum: f64) {
        let device = self.mean.device();
        let count = batch.count as f64;
        let correction = if batch.count > 1 {
            count / (count - 1.0)
        } else {
            1.0
        };

        let mean = batch.mean.clone().to_device(&device);
        let var = batch.var.clone().to_device(&device).mul_scalar(correction);

        self.mean = self
            .mean
            .clone()
            .mul_scalar(1.0 - momentum)
            .add(mean.mul_scalar(momentum));
        self.var = self
            .var
            .clone()
            .mul_scalar(1.0 - momentum)
            .add(var.mul_scalar(momentum));
    }
}
