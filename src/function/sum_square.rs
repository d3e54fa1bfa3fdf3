use burn::prelude::*;

use crate::{
    device::{ComputePath, DeviceAffinity},
    error::Result,
    kernel::ChannelStatistics,
    layout::ChannelLayout,
};

const OPERATION: &str = "sum_square";

/// Saved input of one [`sum_square`] call.
#[derive(Debug)]
pub struct SumSquareContext<B: Backend, const D: usize> {
    input: Tensor<B, 3>,
    layout: ChannelLayout<D>,
    path: ComputePath,
}

impl<B: Backend, const D: usize> SumSquareContext<B, D> {
    pub fn path(&self) -> ComputePath {
        self.path
    }

    /// Gradient of both reductions with respect to the input.
    pub fn backward(
        self,
        grad_sum: Tensor<B, 1>,
        grad_square: Tensor<B, 1>,
    ) -> Result<Tensor<B, D>> {
        self.layout.check_channels(OPERATION, "grad_sum", &grad_sum)?;
        self.layout
            .check_channels(OPERATION, "grad_square", &grad_square)?;

        log::trace!("{OPERATION} backward on {} path", self.path);

        let grad = self
            .path
            .kernels::<B>()
            .sumsquare_backward(self.input, grad_sum, grad_square)?;

        Ok(self.layout.restore(grad))
    }
}

/// Per-channel sum and sum of squares, on the path the input's device maps to.
pub fn sum_square<B: Backend, const D: usize>(
    input: Tensor<B, D>,
) -> Result<(ChannelStatistics<B>, SumSquareContext<B, D>)>
where
    B::Device: DeviceAffinity,
{
    let path = input.device().compute_path();

    sum_square_on(path, input)
}

/// [`sum_square`] with an explicit kernel path.
pub fn sum_square_on<B: Backend, const D: usize>(
    path: ComputePath,
    input: Tensor<B, D>,
) -> Result<(ChannelStatistics<B>, SumSquareContext<B, D>)> {
    let layout = ChannelLayout::of(OPERATION, &input)?;
    let input = layout.flatten(input);

    log::trace!("{OPERATION} forward on {path} path: {:?}", layout.dims());

    let stats = path.kernels::<B>().sumsquare_forward(input.clone())?;

    Ok((stats, SumSquareContext { input, layout, path }))
}
