use std::fmt;

use burn::backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice};

/// Which family of kernels runs an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputePath {
    /// Plain loops over host memory. Forward only.
    Host,
    /// Tensor ops executed by the backend on its own device.
    Accelerator,
}

impl fmt::Display for ComputePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputePath::Host => write!(f, "host"),
            ComputePath::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Maps a backend device to the kernel path its tensors dispatch to.
pub trait DeviceAffinity {
    fn compute_path(&self) -> ComputePath;
}

impl DeviceAffinity for NdArrayDevice {
    fn compute_path(&self) -> ComputePath {
        ComputePath::Host
    }
}

impl DeviceAffinity for WgpuDevice {
    fn compute_path(&self) -> ComputePath {
        match self {
            WgpuDevice::Cpu => ComputePath::Host,
            _ => ComputePath::Accelerator,
        }
    }
}
