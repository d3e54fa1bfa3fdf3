//! Cross-replica synchronization on top of the two operators.
//!
//! Each replica reduces its own shard with `sum_square`, the partial sums are
//! added on one device, and every replica is normalized with the resulting
//! global statistics.

mod layer;
mod statistics;

pub use layer::{SyncBatchNorm, SyncBatchNormConfig, SyncBatchNormContext, SyncBatchNormGrads};
pub use statistics::{NormalizationStatistics, RunningStatistics, all_reduce};
