use std::cell::{Cell, RefCell};
use std::sync::Arc;

use tracing::{instrument, Span};

use crate::config::ConnectionConfiguration;
use crate::driver::{DriverCapabilities, DriverError, NodeDriver};
use crate::error::VirtnodeError;
use crate::list::fetch_names;
use crate::nodedev::metrics::NodeDeviceMetric::TranslatedDriverFailures;
use crate::nodedev::NodeDevice;
use crate::registry::HandleRegistry;
use crate::{int_counter_inc, log_then_return, Result};

/// The shared core of one connection: the driver session, the open flag
/// and the registry of live device handles.
///
/// Device proxies hold an `Arc` to this core, so its storage outlives
/// them; once the open flag drops, every path to the driver is rejected.
#[derive(Debug)]
pub(crate) struct ConnectionCore {
    driver: Box<dyn NodeDriver>,
    open: Cell<bool>,
    registry: RefCell<HandleRegistry>,
    config: ConnectionConfiguration,
}

impl ConnectionCore {
    /// Fail with `ConnectionClosed` before a driver call when the
    /// connection has been closed.
    pub(crate) fn ensure_open(&self, op: &'static str) -> Result<()> {
        if !self.open.get() {
            log_then_return!(VirtnodeError::ConnectionClosed(op));
        }
        Ok(())
    }

    pub(crate) fn driver(&self) -> &dyn NodeDriver {
        self.driver.as_ref()
    }

    pub(crate) fn config(&self) -> &ConnectionConfiguration {
        &self.config
    }

    pub(crate) fn with_registry<T>(&self, f: impl FnOnce(&mut HandleRegistry) -> T) -> T {
        f(&mut self.registry.borrow_mut())
    }

    /// Translate a failed retrieval call into a `Retrieve` error carrying
    /// the driver's last-error record, fetched at the moment of failure.
    pub(crate) fn retrieve_error(&self, op: &'static str) -> VirtnodeError {
        int_counter_inc!(&TranslatedDriverFailures);
        VirtnodeError::Retrieve(op, self.driver.last_error())
    }

    /// Translate a failed state-changing call into an `Operation` error
    /// carrying the driver's last-error record.
    pub(crate) fn operation_error(&self, op: &'static str) -> VirtnodeError {
        int_counter_inc!(&TranslatedDriverFailures);
        VirtnodeError::Operation(op, self.driver.last_error())
    }
}

/// A connection to a virtualization host's node-device driver.
///
/// Every device operation is scoped to one connection. The connection is
/// built from an already-established driver session (establishing the
/// session itself is the transport's concern) and stays usable until
/// [`close`] is called; afterwards every operation on the connection and on
/// any [`NodeDevice`] obtained from it fails with
/// [`VirtnodeError::ConnectionClosed`].
///
/// Neither `Connection` nor `NodeDevice` is `Sync`; concurrent use of one
/// driver session from several threads must be serialized by the caller.
///
/// [`close`]: Connection::close
#[derive(Debug, Clone)]
pub struct Connection {
    core: Arc<ConnectionCore>,
}

impl Connection {
    /// Wrap an established driver session with the default configuration.
    pub fn from_driver(driver: Box<dyn NodeDriver>) -> Self {
        Self::with_config(driver, ConnectionConfiguration::default())
    }

    /// Wrap an established driver session with the given configuration.
    pub fn with_config(driver: Box<dyn NodeDriver>, config: ConnectionConfiguration) -> Self {
        Self {
            core: Arc::new(ConnectionCore {
                driver,
                open: Cell::new(true),
                registry: RefCell::new(HandleRegistry::default()),
                config,
            }),
        }
    }

    /// Whether this connection is still open.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn is_open(&self) -> bool {
        self.core.open.get()
    }

    /// Close the connection. Every later operation on it, and on any
    /// device proxy obtained from it, fails with
    /// [`VirtnodeError::ConnectionClosed`]; a second close fails the same
    /// way.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn close(&self) -> Result<()> {
        const OP: &str = "close";
        if !self.core.open.get() {
            log_then_return!(VirtnodeError::ConnectionClosed(OP));
        }
        self.core.open.set(false);
        Ok(())
    }

    /// The optional operations the underlying driver supports.
    ///
    /// Availability metadata, like [`last_error`](Connection::last_error),
    /// stays readable after `close`.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn capabilities(&self) -> DriverCapabilities {
        self.core.driver().capabilities()
    }

    /// Whether the underlying driver can create devices from a descriptor.
    pub fn supports_device_create(&self) -> bool {
        self.capabilities().device_create
    }

    /// Whether the underlying driver can destroy a device's active
    /// configuration.
    pub fn supports_device_destroy(&self) -> bool {
        self.capabilities().device_destroy
    }

    /// The driver's most recent failure record for this connection.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn last_error(&self) -> DriverError {
        self.core.driver().last_error()
    }

    /// The number of device handles obtained from this connection that
    /// have not been freed.
    pub fn live_device_handles(&self) -> usize {
        self.core.with_registry(|r| r.live_count())
    }

    /// The number of node devices on the host, optionally restricted to
    /// those carrying the capability named by `cap`.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn num_of_devices(&self, cap: Option<&str>, flags: u32) -> Result<usize> {
        const OP: &str = "num_of_devices";
        self.core.ensure_open(OP)?;
        let num = self.core.driver().num_of_devices(cap, flags);
        if num < 0 {
            return Err(self.core.retrieve_error(OP));
        }
        Ok(num as usize)
    }

    /// The names of the node devices on the host, optionally restricted by
    /// capability.
    ///
    /// The host may gain or lose devices between the count and the fetch;
    /// the returned list reflects what the fetch actually produced, which
    /// can be shorter than a count taken moments earlier.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn list_device_names(&self, cap: Option<&str>, flags: u32) -> Result<Vec<String>> {
        const COUNT_OP: &str = "num_of_devices";
        const FETCH_OP: &str = "list_devices";
        self.core.ensure_open(FETCH_OP)?;
        let driver = self.core.driver();
        // the caller's flags apply to the fetch only; the count step always
        // runs with flags 0
        fetch_names(
            COUNT_OP,
            FETCH_OP,
            self.core.config().max_list_capacity,
            || driver.num_of_devices(cap, 0),
            |names| driver.list_devices(cap, names, flags),
            |op| self.core.retrieve_error(op),
        )
    }

    /// Look up a node device by its exact name.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn lookup_device_by_name(&self, name: &str) -> Result<NodeDevice> {
        const OP: &str = "lookup_device_by_name";
        self.core.ensure_open(OP)?;
        match self.core.driver().lookup_by_name(name) {
            Some(raw) => Ok(NodeDevice::new(self.core.clone(), raw)),
            None => Err(self.core.retrieve_error(OP)),
        }
    }

    /// Create a node device from a descriptor document.
    ///
    /// Fails with [`VirtnodeError::NotSupported`] when the underlying
    /// driver cannot create devices; see
    /// [`supports_device_create`](Connection::supports_device_create).
    /// A driver-side failure is an [`VirtnodeError::Operation`] error, not
    /// a retrieval error: creation fails on driver or descriptor problems,
    /// not on a missing device.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn create_device_xml(&self, xml: &str, flags: u32) -> Result<NodeDevice> {
        const OP: &str = "create_device_xml";
        self.core.ensure_open(OP)?;
        if !self.core.driver().capabilities().device_create {
            log_then_return!(VirtnodeError::NotSupported(OP));
        }
        match self.core.driver().create_device_xml(xml, flags) {
            Some(raw) => Ok(NodeDevice::new(self.core.clone(), raw)),
            None => Err(self.core.operation_error(OP)),
        }
    }
}

