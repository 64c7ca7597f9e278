use crate::error::CalibError;
use serde::{Deserialize, Serialize};

/// Compute device holding estimator parameters and intermediate buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// Accelerator with the given ordinal.
    Cuda(usize),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            _ => s
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| CalibError::InvalidConfig(format!("unknown device '{s}'"))),
        }
    }
}

impl Device {
    /// Fail unless this build can run on the device.
    pub fn ensure_supported(self) -> Result<(), CalibError> {
        match self {
            Device::Cpu => Ok(()),
            Device::Cuda(_) => Err(CalibError::UnsupportedDevice(self)),
        }
    }

    /// Fail unless `component` lives on this device.
    pub fn ensure_same(self, component: &'static str, actual: Device) -> Result<(), CalibError> {
        if self != actual {
            return Err(CalibError::DeviceMismatch {
                component,
                expected: self,
                actual,
            });
        }
        Ok(())
    }
}
