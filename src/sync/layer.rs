use burn::prelude::*;
use tap::Pipe;

use super::statistics::{NormalizationStatistics, RunningStatistics, all_reduce};
use crate::{
    device::{ComputePath, DeviceAffinity},
    error::{self, SyncBnError},
    function::{
        BatchNormTrainConfig, BatchNormTrainContext, SumSquareContext, batch_norm_train_on,
        sum_square_on,
    },
    kernel::{ChannelStatistics, NormalizationParameters},
    layout::ChannelLayout,
};

const OPERATION: &str = "sync_batch_norm";

#[derive(Config, Debug)]
pub struct SyncBatchNormConfig {
    pub num_features: usize,
    #[config(default = 1e-5)]
    pub epsilon: f64,
    #[config(default = 0.1)]
    pub momentum: f64,
}

impl SyncBatchNormConfig {
    /// Returns the initialized layer: `gamma = 1`, `beta = 0`, running mean 0 and
    /// running variance 1.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SyncBatchNorm<B> {
        SyncBatchNorm {
            gamma: Tensor::ones([self.num_features], device),
            beta: Tensor::zeros([self.num_features], device),
            running: RunningStatistics::new(self.num_features, device),
            epsilon: self.epsilon,
            momentum: self.momentum,
        }
    }
}

/// Batch normalization whose training statistics span every replica's shard.
#[derive(Debug, Clone)]
pub struct SyncBatchNorm<B: Backend> {
    pub gamma: Tensor<B, 1>,
    pub beta: Tensor<B, 1>,
    pub running: RunningStatistics<B>,
    epsilon: f64,
    momentum: f64,
}

/// State kept from [`SyncBatchNorm::forward_train_on`] until backward.
#[derive(Debug)]
pub struct SyncBatchNormContext<B: Backend, const D: usize> {
    replicas: Vec<(SumSquareContext<B, D>, BatchNormTrainContext<B, D>)>,
    statistics: NormalizationStatistics<B>,
}

#[derive(Debug, Clone)]
pub struct SyncBatchNormGrads<B: Backend, const D: usize> {
    pub grad_inputs: Vec<Tensor<B, D>>,
    pub grad_gamma: Tensor<B, 1>,
    pub grad_beta: Tensor<B, 1>,
}

impl<B: Backend> SyncBatchNorm<B> {
    pub fn num_features(&self) -> usize {
        self.gamma.dims()[0]
    }

    /// Training forward, each replica on the path its own device maps to.
    pub fn forward_train<const D: usize>(
        &mut self,
        replicas: Vec<Tensor<B, D>>,
    ) -> error::Result<(Vec<Tensor<B, D>>, SyncBatchNormContext<B, D>)>
    where
        B::Device: DeviceAffinity,
    {
        let paths = replicas
            .iter()
            .map(|input| input.device().compute_path())
            .collect();

        self.forward_train_paths(paths, replicas)
    }

    /// Training forward with every replica on `path`.
    pub fn forward_train_on<const D: usize>(
        &mut self,
        path: ComputePath,
        replicas: Vec<Tensor<B, D>>,
    ) -> error::Result<(Vec<Tensor<B, D>>, SyncBatchNormContext<B, D>)> {
        self.forward_train_paths(vec![path; replicas.len()], replicas)
    }

    /// `paths[i]` runs the kernels of `replicas[i]`. Running statistics only
    /// change once every replica has been normalized.
    fn forward_train_paths<const D: usize>(
        &mut self,
        paths: Vec<ComputePath>,
        replicas: Vec<Tensor<B, D>>,
    ) -> error::Result<(Vec<Tensor<B, D>>, SyncBatchNormContext<B, D>)> {
        let primary = replicas
            .first()
            .ok_or(SyncBnError::EmptyReplicaSet {
                operation: OPERATION,
            })?
            .device();

        let mut count = 0;
        let mut partials = Vec::with_capacity(replicas.len());
        let mut reducers = Vec::with_capacity(replicas.len());

        for (input, &path) in replicas.iter().cloned().zip(&paths) {
            let layout = ChannelLayout::of(OPERATION, &input)?;
            if layout.channels() != self.num_features() {
                return Err(SyncBnError::shape(
                    OPERATION,
                    format!("{} channels", self.num_features()),
                    &layout.dims(),
                ));
            }

            let (stats, ctx) = sum_square_on(path, input)?;
            count += layout.count();
            partials.push(stats);
            reducers.push(ctx);
        }

        let statistics = all_reduce(partials, &primary)?
            .pipe(|stats: ChannelStatistics<B>| {
                NormalizationStatistics::from_reduced(&stats, count, self.epsilon)
            })?;

        log::debug!(
            "{OPERATION}: {} replicas, {count} elements per channel",
            replicas.len()
        );

        let config = BatchNormTrainConfig::new();
        let mut outputs = Vec::with_capacity(replicas.len());
        let mut contexts = Vec::with_capacity(replicas.len());

        for ((input, reducer), path) in replicas.into_iter().zip(reducers).zip(paths) {
            let params = NormalizationParameters::new(
                statistics.mean.clone(),
                statistics.std.clone(),
                self.gamma.clone(),
                self.beta.clone(),
            )
            .to_device(&input.device());

            let (output, ctx) = batch_norm_train_on(path, input, params, &config)?;
            outputs.push(output);
            contexts.push((reducer, ctx));
        }

        self.running.update(&statistics, self.momentum);

        Ok((
            outputs,
            SyncBatchNormContext {
                replicas: contexts,
                statistics,
            },
        ))
    }

    /// Normalizes with the running statistics; nothing is synchronized.
    pub fn forward_eval<const D: usize>(&self, input: Tensor<B, D>) -> error::Result<Tensor<B, D>>
    where
        B::Device: DeviceAffinity,
    {
        let device = input.device();
        let params = NormalizationParameters::new(
            self.running.mean.clone(),
            self.running.var.clone().add_scalar(self.epsilon).sqrt(),
            self.gamma.clone(),
            self.beta.clone(),
        )
        .to_device(&device);
        let config = BatchNormTrainConfig::new().with_statistics_grad(false);

        let (output, _) =
            batch_norm_train_on(device.compute_path(), input, params, &config)?;

        Ok(output)
    }
}

impl<B: Backend, const D: usize> SyncBatchNormContext<B, D> {
    pub fn statistics(&self) -> &NormalizationStatistics<B> {
        &self.statistics
    }

    /// Kernel path each replica ran on, in replica order.
    pub fn paths(&self) -> Vec<ComputePath> {
        self.replicas
            .iter()
            .map(|(reducer, _)| reducer.path())
            .collect()
    }

    /// Gradients for every replica's input plus the shared affine parameters.
    ///
    /// `grad_outputs` must be ordered like the replicas given to forward.
    pub fn backward(self, grad_outputs: Vec<Tensor<B, D>>) -> error::Result<SyncBatchNormGrads<B, D>> {
        if grad_outputs.len() != self.replicas.len() {
            return Err(SyncBnError::ReplicaMismatch {
                operation: OPERATION,
                expected: self.replicas.len(),
                got: grad_outputs.len(),
            });
        }

        let device = self.statistics.mean.device();
        let channels = self.statistics.mean.dims()[0];
        let zeros = || Tensor::<B, 1>::zeros([channels], &device);

        let (mut grad_mean, mut grad_std) = (zeros(), zeros());
        let (mut grad_gamma, mut grad_beta) = (zeros(), zeros());
        let mut pending = Vec::with_capacity(self.replicas.len());

        for ((reducer, normalizer), grad_output) in self.replicas.into_iter().zip(grad_outputs) {
            let bundle = normalizer.backward(grad_output)?;

            grad_mean = grad_mean + bundle.grad_mean.to_device(&device);
            grad_std = grad_std + bundle.grad_std.to_device(&device);
            grad_gamma = grad_gamma + bundle.grad_gamma.to_device(&device);
            grad_beta = grad_beta + bundle.grad_beta.to_device(&device);

            pending.push((reducer, bundle.grad_input));
        }

        let (grad_sum, grad_square) = self.statistics.backward(grad_mean, grad_std);

        let grad_inputs = pending
            .into_iter()
            .map(|(reducer, grad_input)| {
                let device = grad_input.device();
                let through_stats = reducer.backward(
                    grad_sum.clone().to_device(&device),
                    grad_square.clone().to_device(&device),
                )?;

                Ok(grad_input + through_stats)
            })
            .collect::<error::Result<Vec<_>>>()?;

        Ok(SyncBatchNormGrads {
            grad_inputs,
            grad_gamma,
            grad_beta,
        })
    }
}
