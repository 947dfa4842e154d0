/// This crate provides safe, typed management of the node devices (PCI,
/// USB, network, storage, ...) attached to a virtualization host. It wraps
/// a native handle-based driver API behind owned Rust types, rejecting
/// use-after-free before the native layer is reached and translating the
/// driver's per-connection "last error" convention into structured errors.
/// Well-known device capability names
pub mod capability;
/// Configuration for a node-device connection
pub mod config;
/// The connection manager: device enumeration, lookup and creation
#[deny(dead_code, missing_docs, unused_mut)]
pub mod connection;
/// The seam to the native virtualization driver
#[deny(dead_code, missing_docs, unused_mut)]
pub mod driver;
/// Dealing with errors, including translation of native driver failures
pub mod error;
/// The generic count-then-fetch enumeration protocol
pub(crate) mod list;
/// Metric definitions and the metric registry
pub mod metrics;
/// The node-device proxy and its handle lifecycle
#[deny(dead_code, missing_docs, unused_mut)]
pub mod nodedev;
/// Liveness tracking for native device handles
pub(crate) mod registry;

/// Re-export for the `CapabilityKind` type
pub use capability::CapabilityKind;
/// Re-export for the `ConnectionConfiguration` type
pub use config::ConnectionConfiguration;
/// Re-export for the `Connection` type
pub use connection::Connection;
/// Re-export for `DriverCapabilities` type
pub use driver::DriverCapabilities;
/// Re-export for `DriverError` type
pub use driver::DriverError;
/// Re-export for the `NodeDriver` trait
pub use driver::NodeDriver;
/// Re-export for `RawDeviceHandle` type
pub use driver::RawDeviceHandle;
/// Re-export for `VirtnodeError` type
pub use error::VirtnodeError;
/// Re-export for the `NodeDevice` type
pub use nodedev::NodeDevice;

/// The universal `Result` type used throughout the virtnode codebase.
pub type Result<T> = core::result::Result<T, error::VirtnodeError>;

/// A macro used by the virtnode codebase to log an error then return it
#[macro_export]
macro_rules! log_then_return {
    ($msg:literal $(,)?) => {{
        let __err = $crate::new_error!($msg);
        log::error!("{}", __err);
        return Err(__err);
    }};
    ($err:expr $(,)?) => {{
        log::error!("{}", $err);
        return Err($err);
    }};
    ($fmtstr:expr, $($arg:tt)*) => {{
        let __err_msg = std::format!($fmtstr, $($arg)*);
        let __err = $crate::VirtnodeError::Error(__err_msg);
        log::error!("{}", __err);
        return Err(__err);
    }};
}
