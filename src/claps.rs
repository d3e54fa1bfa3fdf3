use burning_syncbn::ComputePath;
use clap::{Args, Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub enum Things {
    /// Per-channel sums of a random activation tensor.
    Stats {
        #[command(flatten)]
        shape: ShapeArgs,
    },
    /// Synchronized forward/backward over simulated replicas.
    Sync {
        #[command(flatten)]
        shape: ShapeArgs,
        #[arg(long, default_value_t = 2)]
        replicas: usize,
        #[arg(long, value_enum, default_value_t = PathArg::Accelerator)]
        path: PathArg,
        /// Largest accepted deviation from the single-device reference.
        #[arg(long, default_value_t = 1e-3)]
        tolerance: f32,
    },
    /// Finite-difference check of the normalization gradients.
    Gradcheck {
        #[command(flatten)]
        shape: ShapeArgs,
        #[arg(long, default_value_t = 5e-3)]
        step: f32,
        #[arg(long, default_value_t = 1e-2)]
        tolerance: f64,
    },
}

#[derive(Args, Debug, Clone, Copy)]
pub struct ShapeArgs {
    #[arg(long, default_value_t = 4)]
    pub batch: usize,
    #[arg(long, default_value_t = 8)]
    pub channels: usize,
    #[arg(long, default_value_t = 16)]
    pub length: usize,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum PathArg {
    Host,
    Accelerator,
}

impl From<PathArg> for ComputePath {
    fn from(value: PathArg) -> Self {
        match value {
            PathArg::Host => ComputePath::Host,
            PathArg::Accelerator => ComputePath::Accelerator,
        }
    }
}
