use std::sync::Arc;

use tracing::{instrument, Span};

use self::metrics::NodeDeviceMetric::{
    ActiveDeviceHandles, FreedDeviceHandles, UseAfterFreeRejections,
};
use crate::connection::ConnectionCore;
use crate::driver::{NodeDriver, RawDeviceHandle};
use crate::error::VirtnodeError;
use crate::list::fetch_names;
use crate::registry::Key;
use crate::{int_counter_inc, int_gauge_dec, int_gauge_inc, log_then_return, Result};

/// Metric definitions for the node-device module.
pub mod metrics;

/// A proxy for one node device obtained from a [`Connection`].
///
/// The proxy holds a shared reference to its owning connection; the
/// connection's storage therefore outlives every proxy, and the driver's
/// last-error record is always reachable for error context.
///
/// The native resource behind the proxy is released by [`free`] and only by
/// [`free`]: dropping the proxy leaves the native resource allocated. Once
/// freed, every operation fails with [`VirtnodeError::UseAfterFree`] before
/// the driver is reached; a second [`free`] fails with
/// [`VirtnodeError::AlreadyFreed`] and performs no driver call.
///
/// [`Connection`]: crate::connection::Connection
/// [`free`]: NodeDevice::free
#[derive(Debug)]
pub struct NodeDevice {
    core: Arc<ConnectionCore>,
    key: Key,
}

impl NodeDevice {
    pub(crate) fn new(core: Arc<ConnectionCore>, raw: RawDeviceHandle) -> Self {
        let key = core.with_registry(|r| r.register(raw));
        int_gauge_inc!(&ActiveDeviceHandles);
        Self { core, key }
    }

    /// Whether this device handle is still live, i.e. [`free`] has not been
    /// called on it.
    ///
    /// [`free`]: NodeDevice::free
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn is_live(&self) -> bool {
        self.core.with_registry(|r| r.is_live(self.key))
    }

    /// Resolve the raw handle, rejecting the call before the driver is
    /// reached when the handle has been freed.
    fn live_raw(&self, op: &'static str) -> Result<RawDeviceHandle> {
        match self.core.with_registry(|r| r.get(self.key)) {
            Some(raw) => Ok(raw),
            None => {
                int_counter_inc!(&UseAfterFreeRejections);
                log_then_return!(VirtnodeError::UseAfterFree(op));
            }
        }
    }

    /// The device's name.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn name(&self) -> Result<String> {
        const OP: &str = "device_name";
        let raw = self.live_raw(OP)?;
        self.core.ensure_open(OP)?;
        match self.core.driver().device_name(raw) {
            Some(name) => Ok(name),
            None => Err(self.core.retrieve_error(OP)),
        }
    }

    /// The name of the device's parent, or `Ok(None)` for a device at the
    /// root of the device tree. A missing parent is a valid outcome here,
    /// not a retrieval failure.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn parent(&self) -> Result<Option<String>> {
        const OP: &str = "device_parent";
        let raw = self.live_raw(OP)?;
        self.core.ensure_open(OP)?;
        Ok(self.core.driver().device_parent(raw))
    }

    /// The number of capabilities the device carries.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn num_of_caps(&self) -> Result<usize> {
        const OP: &str = "num_of_caps";
        let raw = self.live_raw(OP)?;
        self.core.ensure_open(OP)?;
        let num = self.core.driver().num_of_caps(raw);
        if num < 0 {
            return Err(self.core.retrieve_error(OP));
        }
        Ok(num as usize)
    }

    /// The names of the device's capabilities.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn list_caps(&self) -> Result<Vec<String>> {
        const COUNT_OP: &str = "num_of_caps";
        const FETCH_OP: &str = "list_caps";
        let raw = self.live_raw(FETCH_OP)?;
        self.core.ensure_open(FETCH_OP)?;
        let driver = self.core.driver();
        fetch_names(
            COUNT_OP,
            FETCH_OP,
            self.core.config().max_list_capacity,
            || driver.num_of_caps(raw),
            |names| driver.list_caps(raw, names),
            |op| self.core.retrieve_error(op),
        )
    }

    /// The device's full descriptor document.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn xml_desc(&self, flags: u32) -> Result<String> {
        const OP: &str = "device_xml_desc";
        let raw = self.live_raw(OP)?;
        self.core.ensure_open(OP)?;
        match self.core.driver().device_xml_desc(raw, flags) {
            Some(xml) => Ok(xml),
            None => Err(self.core.retrieve_error(OP)),
        }
    }

    /// Run a status-returning driver call against the live raw handle.
    fn driver_status(
        &self,
        op: &'static str,
        call: impl FnOnce(&dyn NodeDriver, RawDeviceHandle) -> i32,
    ) -> Result<()> {
        let raw = self.live_raw(op)?;
        self.core.ensure_open(op)?;
        if call(self.core.driver(), raw) < 0 {
            return Err(self.core.operation_error(op));
        }
        Ok(())
    }

    /// Detach the device from the host. The handle stays live.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn detach(&self) -> Result<()> {
        self.driver_status("detach", |d, raw| d.detach(raw))
    }

    /// Reattach a previously detached device to the host.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn reattach(&self) -> Result<()> {
        self.driver_status("reattach", |d, raw| d.reattach(raw))
    }

    /// Reset the device.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn reset(&self) -> Result<()> {
        self.driver_status("reset", |d, raw| d.reset(raw))
    }

    /// Tear down the device's active configuration. The handle itself stays
    /// live and must still be released with [`free`].
    ///
    /// Fails with [`VirtnodeError::NotSupported`] when the underlying driver
    /// cannot destroy devices; see
    /// [`Connection::supports_device_destroy`].
    ///
    /// [`free`]: NodeDevice::free
    /// [`Connection::supports_device_destroy`]: crate::connection::Connection::supports_device_destroy
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn destroy(&self) -> Result<()> {
        const OP: &str = "destroy";
        let raw = self.live_raw(OP)?;
        self.core.ensure_open(OP)?;
        if !self.core.driver().capabilities().device_destroy {
            log_then_return!(VirtnodeError::NotSupported(OP));
        }
        if self.core.driver().destroy(raw) < 0 {
            return Err(self.core.operation_error(OP));
        }
        Ok(())
    }

    /// Release the native resource behind this proxy and mark the handle
    /// freed. Safe to call on a device that has been detached or destroyed.
    ///
    /// The handle is only marked freed after the driver reports a
    /// successful release, so a failed free leaves the handle live and
    /// retryable. A second call fails with
    /// [`VirtnodeError::AlreadyFreed`] without reaching the driver.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn free(&self) -> Result<()> {
        const OP: &str = "free";
        let raw = match self.core.with_registry(|r| r.get(self.key)) {
            Some(raw) => raw,
            None => {
                log_then_return!(VirtnodeError::AlreadyFreed(OP));
            }
        };
        self.core.ensure_open(OP)?;
        if self.core.driver().free_device(raw) < 0 {
            return Err(self.core.operation_error(OP));
        }
        self.core.with_registry(|r| r.mark_freed(self.key));
        int_gauge_dec!(&ActiveDeviceHandles);
        int_counter_inc!(&FreedDeviceHandles);
        Ok(())
    }
}

