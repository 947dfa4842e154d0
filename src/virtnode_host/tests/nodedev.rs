// Integration tests for the node-device proxy and handle lifecycle.
// Relocated from an in-crate `#[cfg(test)] mod tests` for the same
// dev-dependency-cycle reason as tests/connection.rs.

    use serial_test::serial;
    use virtnode_testing::TestNodeDriver;

    use virtnode_host::nodedev::metrics::NodeDeviceMetric::{FreedDeviceHandles, UseAfterFreeRejections};
    use virtnode_host::connection::Connection;
    use virtnode_host::driver::DriverCapabilities;
    use virtnode_host::error::VirtnodeError;
    use virtnode_host::int_counter_get;

    fn host_with_devices() -> (TestNodeDriver, Connection) {
        let driver = TestNodeDriver::new();
        driver.add_device("computer", None, &["system"]);
        driver.add_device("pci_0000_00_02_0", Some("computer"), &["pci"]);
        driver.add_device("usb_1_4", Some("pci_0000_00_02_0"), &["usb_device", "net"]);
        let conn = Connection::from_driver(Box::new(driver.clone()));
        (driver, conn)
    }

    #[test]
    fn name_and_parent() {
        let (_driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        assert_eq!(dev.name().unwrap(), "usb_1_4");
        assert_eq!(dev.parent().unwrap().as_deref(), Some("pci_0000_00_02_0"));
    }

    #[test]
    fn parent_of_root_device_is_none_not_an_error() {
        let (_driver, conn) = host_with_devices();
        let root = conn.lookup_device_by_name("computer").unwrap();
        assert_eq!(root.parent().unwrap(), None);
    }

    #[test]
    fn capability_names_match_capability_count() {
        let (_driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        let caps = dev.list_caps().unwrap();
        assert_eq!(caps.len(), dev.num_of_caps().unwrap());
        assert!(caps.iter().all(|c| !c.is_empty()));
        assert_eq!(caps, vec!["usb_device", "net"]);
    }

    #[test]
    fn xml_desc_contains_the_device_name() {
        let (_driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("pci_0000_00_02_0").unwrap();
        let xml = dev.xml_desc(0).unwrap();
        assert!(xml.contains("pci_0000_00_02_0"));
    }

    #[test]
    fn detach_reattach_reset_keep_the_handle_live() {
        let (driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("pci_0000_00_02_0").unwrap();

        dev.detach().unwrap();
        assert!(driver.is_detached("pci_0000_00_02_0"));
        assert!(dev.is_live());

        dev.reattach().unwrap();
        assert!(!driver.is_detached("pci_0000_00_02_0"));
        assert!(dev.is_live());

        dev.reset().unwrap();
        assert!(dev.is_live());
    }

    #[test]
    fn failed_action_is_an_operation_error_with_driver_context() {
        let (driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("pci_0000_00_02_0").unwrap();
        driver.fail_next("detach", 13, "device busy");
        let err = dev.detach().unwrap_err();
        match err {
            VirtnodeError::Operation("detach", record) => {
                assert_eq!(record.code, 13);
                assert_eq!(record.message, "device busy");
            }
            other => panic!("expected Operation error, got {other:?}"),
        }
        // a failed action does not change liveness
        assert!(dev.is_live());
    }

    #[test]
    fn every_operation_fails_after_free() {
        let (driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        dev.free().unwrap();
        assert!(!dev.is_live());

        assert!(matches!(
            dev.name().unwrap_err(),
            VirtnodeError::UseAfterFree("device_name")
        ));
        assert!(matches!(
            dev.parent().unwrap_err(),
            VirtnodeError::UseAfterFree("device_parent")
        ));
        assert!(matches!(
            dev.num_of_caps().unwrap_err(),
            VirtnodeError::UseAfterFree("num_of_caps")
        ));
        assert!(matches!(
            dev.list_caps().unwrap_err(),
            VirtnodeError::UseAfterFree("list_caps")
        ));
        assert!(matches!(
            dev.xml_desc(0).unwrap_err(),
            VirtnodeError::UseAfterFree("device_xml_desc")
        ));
        assert!(matches!(
            dev.detach().unwrap_err(),
            VirtnodeError::UseAfterFree("detach")
        ));
        assert!(matches!(
            dev.reattach().unwrap_err(),
            VirtnodeError::UseAfterFree("reattach")
        ));
        assert!(matches!(
            dev.reset().unwrap_err(),
            VirtnodeError::UseAfterFree("reset")
        ));
        assert!(matches!(
            dev.destroy().unwrap_err(),
            VirtnodeError::UseAfterFree("destroy")
        ));

        // none of the rejected calls reached the driver
        assert_eq!(driver.free_calls(), 1);
    }

    #[test]
    fn double_free_is_rejected_without_a_driver_call() {
        let (driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        dev.free().unwrap();
        assert!(matches!(
            dev.free().unwrap_err(),
            VirtnodeError::AlreadyFreed("free")
        ));
        assert_eq!(driver.free_calls(), 1);
    }

    #[test]
    fn failed_free_leaves_the_handle_live() {
        let (driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        driver.fail_next("free_device", 9, "resource busy");
        assert!(matches!(
            dev.free().unwrap_err(),
            VirtnodeError::Operation("free", _)
        ));
        assert!(dev.is_live());
        dev.free().unwrap();
        assert!(!dev.is_live());
    }

    #[test]
    fn operations_on_a_vanished_device_surface_the_driver_error() {
        let (driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        driver.remove_device("usb_1_4");
        let err = dev.num_of_caps().unwrap_err();
        assert!(matches!(err, VirtnodeError::Retrieve("num_of_caps", _)));
        // the handle is still live and must still be freed
        assert!(dev.is_live());
        dev.free().unwrap();
    }

    #[test]
    fn destroy_requires_driver_support() {
        let driver = TestNodeDriver::with_capabilities(DriverCapabilities {
            device_create: false,
            device_destroy: false,
        });
        driver.add_device("usb_1_4", None, &["usb_device"]);
        let conn = Connection::from_driver(Box::new(driver.clone()));
        assert!(!conn.supports_device_destroy());

        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        assert!(matches!(
            dev.destroy().unwrap_err(),
            VirtnodeError::NotSupported("destroy")
        ));
        assert!(dev.is_live());
    }

    #[test]
    fn destroy_then_free() {
        let (driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        dev.destroy().unwrap();
        assert!(driver.is_destroyed("usb_1_4"));
        assert!(dev.is_live());
        dev.free().unwrap();
        assert!(!dev.is_live());
    }

    #[test]
    fn device_operations_fail_once_the_connection_is_closed() {
        let (_driver, conn) = host_with_devices();
        let live = conn.lookup_device_by_name("usb_1_4").unwrap();
        let freed = conn.lookup_device_by_name("pci_0000_00_02_0").unwrap();
        freed.free().unwrap();
        conn.close().unwrap();

        assert!(matches!(
            live.name().unwrap_err(),
            VirtnodeError::ConnectionClosed("device_name")
        ));
        assert!(matches!(
            live.free().unwrap_err(),
            VirtnodeError::ConnectionClosed("free")
        ));
        // the liveness check runs before the open check
        assert!(matches!(
            freed.name().unwrap_err(),
            VirtnodeError::UseAfterFree("device_name")
        ));
    }

    #[test]
    #[serial]
    fn use_after_free_rejections_are_counted() {
        let (_driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        dev.free().unwrap();
        let before = int_counter_get!(&UseAfterFreeRejections);
        let _ = dev.name();
        let _ = dev.xml_desc(0);
        assert!(int_counter_get!(&UseAfterFreeRejections) >= before + 2);
    }

    #[test]
    #[serial]
    fn freed_handles_are_counted() {
        let (_driver, conn) = host_with_devices();
        let dev = conn.lookup_device_by_name("usb_1_4").unwrap();
        let before = int_counter_get!(&FreedDeviceHandles);
        dev.free().unwrap();
        assert!(int_counter_get!(&FreedDeviceHandles) >= before + 1);
    }
