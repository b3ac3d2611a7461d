use crate::device::Device;

/// Diagnostic capture region bracketing the GPU work of one submission.
///
/// Opened per submission; closed explicitly after commit or, on early
/// returns, when dropped. Backends without capture support ignore both ends.
pub(crate) struct CaptureScope<'d, D: Device> {
    device: &'d D,
    label: &'d str,
    open: bool,
}

impl<'d, D: Device> CaptureScope<'d, D> {
    pub(crate) fn begin(device: &'d D, label: &'d str) -> Self {
        log::trace!("capture '{label}' begin");
        device.begin_capture(label);
        Self {
            device,
            label,
            open: true,
        }
    }

    /// Closes the region. Does not wait for submitted work.
    pub(crate) fn end(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            self.device.end_capture(self.label);
            log::trace!("capture '{}' end", self.label);
        }
    }
}

impl<D: Device> Drop for CaptureScope<'_, D> {
    fn drop(&mut self) {
        self.close();
    }
}
