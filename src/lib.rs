//! Synchronized batch normalization for burn backends.
//!
//! Two differentiable operators, [`sum_square`] and [`batch_norm_train`], each
//! backed by a host and an accelerator kernel set. The [`sync`] module builds
//! cross-replica batch normalization on top of them.

pub mod device;
pub mod error;
pub mod function;
pub mod gradcheck;
pub mod kernel;
pub mod layout;
pub mod sync;

pub use device::{ComputePath, DeviceAffinity};
pub use error::{Result, SyncBnError};
pub use function::{
    BatchNormTrainConfig, BatchNormTrainContext, SumSquareContext, batch_norm_train,
    batch_norm_train_on, sum_square, sum_square_on,
};
pub use kernel::{ChannelStatistics, GradientBundle, NormKernels, NormalizationParameters};
pub use sync::{SyncBatchNorm, SyncBatchNormConfig};
