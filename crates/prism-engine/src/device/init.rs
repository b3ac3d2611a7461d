/// Initialization parameters for the wgpu device.
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct DeviceInit {
    /// Adapter power preference.
    ///
    /// High performance favours the discrete GPU on dual-GPU machines.
    pub power_preference: wgpu::PowerPreference,

    /// Allow a software (fallback) adapter when no hardware adapter exists.
    pub force_fallback_adapter: bool,

    /// Additional wgpu features to require on top of the ones the engine
    /// negotiates itself (timestamp queries).
    pub required_features: wgpu::Features,

    /// Base limits requested from the adapter.
    ///
    /// Compute workgroup limits are raised to what 32×32 thread groups need
    /// when the adapter allows it.
    pub required_limits: wgpu::Limits,

    /// Request timestamp queries for GPU/kernel timing when available.
    ///
    /// Without them, timing falls back to CPU-measured submit→completion time.
    pub timestamp_queries: bool,

    /// WGSL shader library source. `None` selects the bundled library.
    pub shader_source: Option<String>,
}

impl Default for DeviceInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            timestamp_queries: true,
            shader_source: None,
        }
    }
}
