/// Raw timestamps of one completed command buffer, in seconds.
///
/// The origin is backend-defined; only differences are meaningful.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GpuTimestamps {
    /// GPU started executing the command buffer.
    pub gpu_start: f64,
    /// GPU finished executing the command buffer.
    pub gpu_end: f64,
    /// First shader/kernel work began.
    pub kernel_start: f64,
    /// Last shader/kernel work ended.
    pub kernel_end: f64,
}

impl GpuTimestamps {
    /// Timestamps for a backend that can only measure one interval.
    pub fn single_interval(start: f64, end: f64) -> Self {
        Self {
            gpu_start: start,
            gpu_end: end,
            kernel_start: start,
            kernel_end: end,
        }
    }
}

/// Timing of one completed submission.
///
/// Produced once per completed command buffer; immutable.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ExecutionInfo {
    /// GPU start → end, in seconds.
    pub gpu_time: f64,
    /// Shader/kernel execution, in seconds.
    pub kernel_time: f64,
}

impl ExecutionInfo {
    /// Derives durations from raw timestamps.
    ///
    /// Negative intervals (clock wrap, unresolved queries) clamp to zero.
    /// The two intervals are otherwise independent.
    pub fn from_timestamps(ts: GpuTimestamps) -> Self {
        Self {
            gpu_time: non_negative(ts.gpu_end - ts.gpu_start),
            kernel_time: non_negative(ts.kernel_end - ts.kernel_start),
        }
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

/// Formats a duration in seconds as milliseconds with 4 fixed decimals,
/// e.g. `0.00123456` → `"1.2346ms"`.
pub fn format_millis(seconds: f64) -> String {
    format!("{:.4}ms", seconds * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_end_minus_start() {
        let info = ExecutionInfo::from_timestamps(GpuTimestamps {
            gpu_start: 10.0,
            gpu_end: 10.5,
            kernel_start: 10.1,
            kernel_end: 10.3,
        });
        assert!((info.gpu_time - 0.5).abs() < 1e-12);
        assert!((info.kernel_time - 0.2).abs() < 1e-9);
    }

    #[test]
    fn kernel_time_is_not_capped_by_gpu_time() {
        let info = ExecutionInfo::from_timestamps(GpuTimestamps {
            gpu_start: 0.0,
            gpu_end: 1.0,
            kernel_start: 0.0,
            kernel_end: 3.0,
        });
        assert_eq!(info.gpu_time, 1.0);
        assert_eq!(info.kernel_time, 3.0);
    }

    #[test]
    fn reversed_intervals_clamp_to_zero() {
        let info = ExecutionInfo::from_timestamps(GpuTimestamps::single_interval(5.0, 4.0));
        assert_eq!(info.gpu_time, 0.0);
        assert_eq!(info.kernel_time, 0.0);
    }

    #[test]
    fn millis_use_four_fixed_decimals() {
        assert_eq!(format_millis(0.00123456), "1.2346ms");
        assert_eq!(format_millis(0.0), "0.0000ms");
        assert_eq!(format_millis(2.0), "2000.0000ms");
    }
}
