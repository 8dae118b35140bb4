use candle_core::Device;

/// Where model weights are placed, used by pipeline builders and the auto classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceMap {
    /// CUDA device 0 if available, then Metal device 0, otherwise CPU.
    #[default]
    Auto,
    /// Force CPU even if an accelerator is available.
    Cpu,
    /// Select a specific CUDA device by index.
    Cuda(usize),
    /// Select a specific Metal device by index.
    Metal(usize),
}

impl DeviceMap {
    /// Resolve the request into an actual [`Device`].
    pub fn resolve(self) -> anyhow::Result<Device> {
        let device = match self {
            DeviceMap::Auto => auto_device(),
            DeviceMap::Cpu => Device::Cpu,
            DeviceMap::Cuda(i) => Device::new_cuda(i)?,
            DeviceMap::Metal(i) => Device::new_metal(i)?,
        };
        tracing::debug!(request = ?self, ?device, "resolved device");
        Ok(device)
    }
}

fn auto_device() -> Device {
    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => tracing::warn!(error = %e, "CUDA reported available but failed to open"),
        }
    }
    if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => tracing::warn!(error = %e, "Metal reported available but failed to open"),
        }
    }
    Device::Cpu
}

/// Trait providing convenience methods for pipeline builders to select a device.
pub trait DeviceSelectable: Sized {
    /// Returns a mutable reference to the builder's internal [`DeviceMap`].
    fn device_map_mut(&mut self) -> &mut DeviceMap;

    fn device_map(mut self, device_map: DeviceMap) -> Self {
        *self.device_map_mut() = device_map;
        self
    }

    /// Force the pipeline to run on CPU.
    fn cpu(self) -> Self {
        self.device_map(DeviceMap::Cpu)
    }

    /// Select a specific CUDA device by index.
    fn cuda_device(self, index: usize) -> Self {
        self.device_map(DeviceMap::Cuda(index))
    }

    /// Select a specific Metal device by index.
    fn metal_device(self, index: usize) -> Self {
        self.device_map(DeviceMap::Metal(index))
    }
}
