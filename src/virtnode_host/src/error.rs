use thiserror::Error;

use crate::driver::DriverError;

/// The error type for virtnode operations
#[derive(Error, Debug)]
pub enum VirtnodeError {
    /// free was called a second time on an already-freed object
    #[error("{0} was called on an already freed object")]
    AlreadyFreed(&'static str),

    /// An operation was attempted on a closed connection
    #[error("{0} was attempted on a closed connection")]
    ConnectionClosed(&'static str),

    /// A generic error with a message
    #[error("{0}")]
    Error(String),

    /// An optional operation was invoked on a driver that does not support it
    #[error("{0} is not supported by the underlying driver")]
    NotSupported(&'static str),

    /// A state-changing driver call failed
    #[error("{0} failed: {1}")]
    Operation(&'static str, DriverError),

    /// A query, enumeration or lookup driver call failed
    #[error("{0} failed: {1}")]
    Retrieve(&'static str, DriverError),

    /// An operation was attempted on a freed node device handle
    #[error("{0} was attempted on a freed node device handle")]
    UseAfterFree(&'static str),
}

impl From<&str> for VirtnodeError {
    fn from(s: &str) -> Self {
        VirtnodeError::Error(s.to_string())
    }
}

impl VirtnodeError {
    /// The name of the operation the error was raised for, if it carries one.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            VirtnodeError::AlreadyFreed(op) => Some(op),
            VirtnodeError::ConnectionClosed(op) => Some(op),
            VirtnodeError::Error(_) => None,
            VirtnodeError::NotSupported(op) => Some(op),
            VirtnodeError::Operation(op, _) => Some(op),
            VirtnodeError::Retrieve(op, _) => Some(op),
            VirtnodeError::UseAfterFree(op) => Some(op),
        }
    }

    /// The driver's last-error record captured at the failure site, if any.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            VirtnodeError::Operation(_, e) => Some(e),
            VirtnodeError::Retrieve(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Creates a `VirtnodeError::Error` from a string literal or format string
#[macro_export]
macro_rules! new_error {
    ($msg:literal $(,)?) => {{
        let __args = std::format_args!($msg);
        let __err_msg = match __args.as_str() {
            Some(msg) => String::from(msg),
            None => std::format!($msg),
        };
        $crate::VirtnodeError::Error(__err_msg)
    }};
    ($fmtstr:expr, $($arg:tt)*) => {{
        let __err_msg = std::format!($fmtstr, $($arg)*);
        $crate::error::VirtnodeError::Error(__err_msg)
    }};
}

#[cfg(test)]
mod tests {
    use super::VirtnodeError;
    use crate::driver::DriverError;

    #[test]
    fn retrieve_error_carries_operation_and_driver_record() {
        let err = VirtnodeError::Retrieve(
            "lookup_device_by_name",
            DriverError::new(42, "no node device with matching name"),
        );
        assert_eq!(err.operation(), Some("lookup_device_by_name"));
        let record = err.driver_error().unwrap();
        assert_eq!(record.code, 42);
        assert!(err.to_string().contains("lookup_device_by_name"));
        assert!(err.to_string().contains("no node device with matching name"));
    }

    #[test]
    fn use_after_free_has_no_driver_record() {
        let err = VirtnodeError::UseAfterFree("device_xml_desc");
        assert_eq!(err.operation(), Some("device_xml_desc"));
        assert!(err.driver_error().is_none());
    }

    #[test]
    fn new_error_formats() {
        let plain = new_error!("plain message");
        assert_eq!(plain.to_string(), "plain message");
        let formatted = new_error!("{} of {}", 1, 2);
        assert_eq!(formatted.to_string(), "1 of 2");
    }
}
