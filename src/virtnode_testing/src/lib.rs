// This crate contains testing utilities which need to be shared across
// multiple crates in this project.

/// An in-memory node-device driver with scriptable fault injection
pub mod driver;
/// Device descriptor fixtures and minimal descriptor parsing
pub mod xml;

/// Re-export for the `TestDevice` type
pub use driver::TestDevice;
/// Re-export for the `TestNodeDriver` type
pub use driver::TestNodeDriver;
/// Re-export for the `device_xml` fixture builder
pub use xml::device_xml;
