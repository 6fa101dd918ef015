//! Compute device selection
//!
//! The choice is re-probed for every model load rather than cached for
//! the process, so a model loaded late in a session never inherits a
//! stale decision made when the accelerator looked free.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Environment override: `cpu`, `cuda`, `cuda:<n>` or `metal`
pub const DEVICE_OVERRIDE_ENV: &str = "NEUROCHAT_DEVICE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda(usize),
    Metal,
    Cpu,
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Device::Cpu)
    }

    /// Parse `cpu`, `cuda`, `cuda:1`, `metal`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "cpu" => Some(Device::Cpu),
            "metal" | "mps" => Some(Device::Metal),
            "cuda" | "gpu" => Some(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|ordinal| ordinal.parse().ok())
                .map(Device::Cuda),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            Device::Metal => f.write_str("metal"),
            Device::Cpu => f.write_str("cpu"),
        }
    }
}

/// Availability probe for an accelerator
pub trait DeviceProbe: Send + Sync {
    /// The accelerator to use, or `None` when only the CPU is usable
    fn accelerator(&self) -> Option<Device>;
}

/// Probe that inspects the host it runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    fn cuda_hidden() -> bool {
        matches!(
            std::env::var("CUDA_VISIBLE_DEVICES").as_deref(),
            Ok("") | Ok("-1")
        )
    }

    fn cuda_present() -> bool {
        cfg!(target_os = "linux")
            && Path::new("/dev/nvidiactl").exists()
            && Path::new("/dev/nvidia0").exists()
    }

    fn metal_present() -> bool {
        cfg!(all(target_os = "macos", target_arch = "aarch64"))
    }
}

impl DeviceProbe for SystemProbe {
    fn accelerator(&self) -> Option<Device> {
        if let Ok(value) = std::env::var(DEVICE_OVERRIDE_ENV) {
            match Device::parse(&value) {
                Some(Device::Cpu) => return None,
                Some(device) => return Some(device),
                None => debug!("Ignoring unrecognized {}={:?}", DEVICE_OVERRIDE_ENV, value),
            }
        }

        if !Self::cuda_hidden() && Self::cuda_present() {
            return Some(Device::Cuda(0));
        }

        if Self::metal_present() {
            return Some(Device::Metal);
        }

        None
    }
}

/// Probe that never reports an accelerator
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuOnlyProbe;

impl DeviceProbe for CpuOnlyProbe {
    fn accelerator(&self) -> Option<Device> {
        None
    }
}

/// Accelerator when one is available, otherwise the CPU
pub fn resolve_device(probe: &dyn DeviceProbe) -> Device {
    let device = probe.accelerator().unwrap_or(Device::Cpu);
    debug!("Resolved compute device: {}", device);
    device
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        calls: AtomicUsize,
    }

    impl DeviceProbe for CountingProbe {
        fn accelerator(&self) -> Option<Device> {
            // Accelerator only on the first probe
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Some(Device::Cuda(0)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_parse_devices() {
        assert_eq!(Device::parse("cpu"), Some(Device::Cpu));
        assert_eq!(Device::parse("CUDA"), Some(Device::Cuda(0)));
        assert_eq!(Device::parse("cuda:2"), Some(Device::Cuda(2)));
        assert_eq!(Device::parse("metal"), Some(Device::Metal));
        assert_eq!(Device::parse("tpu"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Device::Cuda(1).to_string(), "cuda:1");
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert!(Device::Metal.is_accelerator());
        assert!(!Device::Cpu.is_accelerator());
    }

    #[test]
    fn test_cpu_fallback() {
        assert_eq!(resolve_device(&CpuOnlyProbe), Device::Cpu);
    }

    #[test]
    fn test_resolution_is_not_cached() {
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
        };
        assert_eq!(resolve_device(&probe), Device::Cuda(0));
        assert_eq!(resolve_device(&probe), Device::Cpu);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }
}
