//! Differentiable operators.
//!
//! A forward call returns its output together with a context that owns the
//! tensors the backward pass needs. Calling `backward` consumes the context.

mod batch_norm_train;
mod sum_square;

pub use batch_norm_train::{
    BatchNormTrainConfig, BatchNormTrainContext, batch_norm_train, batch_norm_train_on,
};
pub use sum_square::{SumSquareContext, sum_square, sum_square_on};
