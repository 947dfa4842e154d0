use strum::{Display, EnumIter, EnumString};

/// A well-known node-device capability name.
///
/// Drivers describe each device facet with a bare name string ("pci",
/// "usb_device", ...). The well-known names get a typed representation
/// here; anything a driver reports beyond them is preserved verbatim in
/// [`Other`](CapabilityKind::Other) rather than dropped, since the set of
/// capability names grows with driver versions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CapabilityKind {
    /// The host system itself, the root of the device tree
    System,
    /// A PCI device
    Pci,
    /// A USB device
    UsbDevice,
    /// A USB interface
    Usb,
    /// A network interface
    Net,
    /// A SCSI host adapter
    ScsiHost,
    /// A SCSI device
    Scsi,
    /// A storage device
    Storage,
    /// A capability name this crate does not know about
    #[strum(default)]
    Other(String),
}

impl CapabilityKind {
    /// Whether this is one of the well-known capability names.
    pub fn is_well_known(&self) -> bool {
        !matches!(self, CapabilityKind::Other(_))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::CapabilityKind;

    #[test]
    fn well_known_names_round_trip() {
        for kind in CapabilityKind::iter().filter(|k| k.is_well_known()) {
            let name = kind.to_string();
            assert_eq!(CapabilityKind::from_str(&name).unwrap(), kind);
        }
    }

    #[test]
    fn usb_device_uses_the_driver_spelling() {
        assert_eq!(CapabilityKind::UsbDevice.to_string(), "usb_device");
        assert_eq!(CapabilityKind::ScsiHost.to_string(), "scsi_host");
    }

    #[test]
    fn unknown_names_are_preserved() {
        let kind = CapabilityKind::from_str("mdev_types").unwrap();
        assert_eq!(kind, CapabilityKind::Other("mdev_types".to_string()));
        assert!(!kind.is_well_known());
        assert_eq!(kind.to_string(), "mdev_types");
    }
}
