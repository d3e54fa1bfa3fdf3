use burn::prelude::*;

use crate::{
    device::{ComputePath, DeviceAffinity},
    error::{self, SyncBnError},
    kernel::{GradientBundle, NormalizationParameters},
    layout::ChannelLayout,
};

const OPERATION: &str = "batch_norm_train";

#[derive(Config, Debug)]
pub struct BatchNormTrainConfig {
    /// Reject `std <= 0` (and NaN) before dispatch instead of letting the
    /// division produce inf/nan.
    #[config(default = true)]
    pub validate_std: bool,
    /// Produce mean/std gradients. When unset they are zero.
    #[config(default = true)]
    pub statistics_grad: bool,
}

/// Tensors saved by one [`batch_norm_train`] call.
#[derive(Debug)]
pub struct BatchNormTrainContext<B: Backend, const D: usize> {
    input: Tensor<B, 3>,
    params: NormalizationParameters<B>,
    layout: ChannelLayout<D>,
    path: ComputePath,
    statistics_grad: bool,
}

impl<B: Backend, const D: usize> BatchNormTrainContext<B, D> {
    pub fn path(&self) -> ComputePath {
        self.path
    }

    pub fn backward(self, grad_output: Tensor<B, D>) -> error::Result<GradientBundle<B, D>> {
        self.layout
            .check_same(OPERATION, "grad_output", &grad_output)?;

        log::trace!("{OPERATION} backward on {} path", self.path);

        let layout = self.layout;
        let grads = self.path.kernels::<B>().batchnorm_backward(
            layout.flatten(grad_output),
            self.input,
            &self.params,
            self.statistics_grad,
        )?;

        Ok(grads.map_input(|grad| layout.restore(grad)))
    }
}

/// `(input - mean) / std * gamma + beta`, on the path the input's device maps to.
pub fn batch_norm_train<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    params: NormalizationParameters<B>,
    config: &BatchNormTrainConfig,
) -> error::Result<(Tensor<B, D>, BatchNormTrainContext<B, D>)>
where
    B::Device: DeviceAffinity,
{
    let path = input.device().compute_path();

    batch_norm_train_on(path, input, params, config)
}

/// [`batch_norm_train`] with an explicit kernel path.
pub fn batch_norm_train_on<B: Backend, const D: usize>(
    path: ComputePath,
    input: Tensor<B, D>,
    params: NormalizationParameters<B>,
    config: &BatchNormTrainConfig,
) -> error::Result<(Tensor<B, D>, BatchNormTrainContext<B, D>)> {
    let layout = ChannelLayout::of(OPERATION, &input)?;

    layout.check_channels(OPERATION, "mean", &params.mean)?;
    layout.check_channels(OPERATION, "std", &params.std)?;
    layout.check_channels(OPERATION, "gamma", &params.gamma)?;
    layout.check_channels(OPERATION, "beta", &params.beta)?;

    if config.validate_std {
        check_std(&params.std)?;
    }

    let input = layout.flatten(input);

    log::trace!("{OPERATION} forward on {path} path: {:?}", layout.dims());

    let output = path
        .kernels::<B>()
        .batchnorm_forward(input.clone(), &params)?;

    let ctx = BatchNormTrainContext {
        input,
        params,
        layout,
        path,
        statistics_grad: config.statistics_grad,
    };

    Ok((layout.restore(output), ctx))
}

fn check_std<B: Backend>(std: &Tensor<B, 1>) -> error::Result<()> {
    let degenerate = std
        .to_data()
        .iter::<f32>()
        .enumerate()
        .find(|(_, value)| !(*value > 0.0));

    match degenerate {
        Some((channel, value)) => Err(SyncBnError::DegenerateStatistics {
            operation: OPERATION,
            channel,
            value,
        }),
        None => Ok(()),
    }
}
