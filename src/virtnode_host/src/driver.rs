use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

/// An opaque token for a native device resource.
///
/// The driver hands these out from lookup, creation and enumeration calls;
/// this crate never interprets the value. Liveness is tracked on the
/// connection, not in the token, so a copied token is harmless: once the
/// handle is freed every path to the driver is closed off before the token
/// could be used.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RawDeviceHandle(
    /// The raw token value as issued by the driver
    pub u64,
);

/// The per-connection last-error record of the native driver.
///
/// The native convention reports failures out-of-band: a call returns a
/// negative status (or no handle) and the detail is recorded on the
/// connection, to be fetched with `last_error`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    /// Numeric error code as reported by the driver
    pub code: i32,
    /// Human-readable message as reported by the driver
    pub message: String,
}

impl DriverError {
    /// Create a new record from a code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "driver error code {}: {}", self.code, self.message)
    }
}

/// The optional operations a driver build may or may not provide.
///
/// Availability is a property of the driver, not of an individual call, so
/// callers can detect support up front instead of discovering it through a
/// runtime failure.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// The driver can create node devices from a descriptor
    pub device_create: bool,
    /// The driver can destroy a node device's active configuration
    pub device_destroy: bool,
}

/// A common set of node-device driver functionality.
///
/// This is the seam to the native virtualization layer. The contract is
/// kept C-shaped on purpose: status-returning calls report failure with a
/// negative value, handle-returning calls with `None`, and the failure
/// detail is recorded per connection and fetched via [`last_error`].
/// Implementations take `&self` everywhere; recording the last error
/// therefore happens behind interior mutability.
///
/// All calls are synchronous and may block on the driver's own I/O. The
/// trait makes no thread-safety promise; concurrent use of one driver
/// session must be serialized by the caller.
///
/// [`last_error`]: NodeDriver::last_error
pub trait NodeDriver: Debug {
    /// The optional operations this driver supports.
    fn capabilities(&self) -> DriverCapabilities;

    /// Count the node devices on the host, optionally restricted to those
    /// carrying the named capability. Negative on failure.
    fn num_of_devices(&self, cap: Option<&str>, flags: u32) -> i32;

    /// Fill `names` with device names, optionally restricted by capability,
    /// writing at most `names.len()` entries. Returns the number of entries
    /// actually written, which may be fewer than the buffer holds, or a
    /// negative value on failure.
    fn list_devices(&self, cap: Option<&str>, names: &mut [Option<String>], flags: u32) -> i32;

    /// Look up a device by its exact name. `None` when no such device
    /// exists or the lookup failed.
    fn lookup_by_name(&self, name: &str) -> Option<RawDeviceHandle>;

    /// Create a device from a descriptor document. `None` on failure.
    /// Only meaningful when [`DriverCapabilities::device_create`] is set.
    fn create_device_xml(&self, xml: &str, flags: u32) -> Option<RawDeviceHandle>;

    /// The device's name. A live handle always has one; `None` is a failure.
    fn device_name(&self, dev: RawDeviceHandle) -> Option<String>;

    /// The name of the device's parent, or `None` when the device sits at
    /// the root of the device tree. This is the one call where `None` is a
    /// valid result and not a failure.
    fn device_parent(&self, dev: RawDeviceHandle) -> Option<String>;

    /// Count the capabilities of one device. Negative on failure.
    fn num_of_caps(&self, dev: RawDeviceHandle) -> i32;

    /// Fill `names` with the device's capability names. Same contract as
    /// [`list_devices`](NodeDriver::list_devices).
    fn list_caps(&self, dev: RawDeviceHandle, names: &mut [Option<String>]) -> i32;

    /// The device's full descriptor document. `None` on failure.
    fn device_xml_desc(&self, dev: RawDeviceHandle, flags: u32) -> Option<String>;

    /// Detach the device from the host. Negative on failure.
    fn detach(&self, dev: RawDeviceHandle) -> i32;

    /// Reattach a previously detached device. Negative on failure.
    fn reattach(&self, dev: RawDeviceHandle) -> i32;

    /// Reset the device. Negative on failure.
    fn reset(&self, dev: RawDeviceHandle) -> i32;

    /// Tear down the device's active configuration without releasing the
    /// handle. Negative on failure. Only meaningful when
    /// [`DriverCapabilities::device_destroy`] is set.
    fn destroy(&self, dev: RawDeviceHandle) -> i32;

    /// Release the native device resource behind `dev`. Negative on
    /// failure. The handle must not be passed to the driver again.
    fn free_device(&self, dev: RawDeviceHandle) -> i32;

    /// The most recent failure recorded on this connection.
    fn last_error(&self) -> DriverError;
}

#[cfg(test)]
mod tests {
    use super::DriverError;

    #[test]
    fn driver_error_display() {
        let e = DriverError::new(55, "internal error");
        assert_eq!(e.to_string(), "driver error code 55: internal error");
    }

    #[test]
    fn driver_error_serde_round_trip() {
        let e = DriverError::new(-1, "cannot reach host");
        let json = serde_json::to_string(&e).unwrap();
        let back: DriverError = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }
}
