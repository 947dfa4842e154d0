use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use virtnode_host::driver::{DriverCapabilities, DriverError, NodeDriver, RawDeviceHandle};

use crate::xml::{device_xml, parse_device_caps, parse_device_name, parse_device_parent};

/// Error code recorded when a named device does not exist.
pub const ERR_NO_DEVICE: i32 = 2;
/// Error code recorded when a handle is not known to the driver.
pub const ERR_UNKNOWN_HANDLE: i32 = 3;
/// Error code recorded when a descriptor document cannot be used.
pub const ERR_BAD_DESCRIPTOR: i32 = 4;

/// One device of the simulated host.
#[derive(Debug, Clone)]
pub struct TestDevice {
    /// Device name, unique on the host
    pub name: String,
    /// Parent device name; `None` for the device-tree root
    pub parent: Option<String>,
    /// Capability names of the device
    pub caps: Vec<String>,
    /// The device's descriptor document
    pub xml: String,
    /// Whether the device is currently detached from the host
    pub detached: bool,
    /// Whether the device's active configuration has been destroyed
    pub destroyed: bool,
}

#[derive(Debug)]
struct PlannedFailure {
    op: &'static str,
    code: i32,
    message: String,
}

#[derive(Debug)]
struct HostState {
    devices: BTreeMap<String, TestDevice>,
    handles: HashMap<u64, String>,
    next_handle: u64,
    capabilities: DriverCapabilities,
    last_error: DriverError,
    fail_next: Option<PlannedFailure>,
    drop_before_next_list: Vec<String>,
    fetch_calls: usize,
    free_calls: usize,
}

impl HostState {
    fn new(capabilities: DriverCapabilities) -> Self {
        Self {
            devices: BTreeMap::new(),
            handles: HashMap::new(),
            next_handle: 0,
            capabilities,
            last_error: DriverError::new(0, "no failure recorded"),
            fail_next: None,
            drop_before_next_list: Vec::new(),
            fetch_calls: 0,
            free_calls: 0,
        }
    }

    fn alloc_handle(&mut self, name: &str) -> RawDeviceHandle {
        self.next_handle += 1;
        self.handles.insert(self.next_handle, name.to_string());
        RawDeviceHandle(self.next_handle)
    }
}

fn matches_cap(device: &TestDevice, cap: Option<&str>) -> bool {
    cap.map_or(true, |c| device.caps.iter().any(|have| have == c))
}

/// An in-memory `NodeDriver` over a simulated host device tree.
///
/// Clones share state, so a test can keep one clone for scripting faults
/// and inspecting device state after another clone has been boxed into a
/// connection:
///
/// ```
/// use virtnode_host::Connection;
/// use virtnode_testing::TestNodeDriver;
///
/// let driver = TestNodeDriver::new();
/// driver.add_device("usb_1_4", None, &["usb_device"]);
/// let conn = Connection::from_driver(Box::new(driver.clone()));
/// driver.fail_next("detach", 13, "device busy");
/// ```
#[derive(Debug, Clone)]
pub struct TestNodeDriver {
    state: Rc<RefCell<HostState>>,
}

impl TestNodeDriver {
    /// A driver supporting every optional operation.
    pub fn new() -> Self {
        Self::with_capabilities(DriverCapabilities {
            device_create: true,
            device_destroy: true,
        })
    }

    /// A driver with the given optional-operation support.
    pub fn with_capabilities(capabilities: DriverCapabilities) -> Self {
        Self {
            state: Rc::new(RefCell::new(HostState::new(capabilities))),
        }
    }

    /// Add a device to the simulated host.
    pub fn add_device(&self, name: &str, parent: Option<&str>, caps: &[&str]) {
        let xml = device_xml(name, parent, caps);
        self.state.borrow_mut().devices.insert(
            name.to_string(),
            TestDevice {
                name: name.to_string(),
                parent: parent.map(str::to_string),
                caps: caps.iter().map(|c| c.to_string()).collect(),
                xml,
                detached: false,
                destroyed: false,
            },
        );
    }

    /// Remove a device from the simulated host. Handles already given out
    /// for it stay allocated, as they would on a real host.
    pub fn remove_device(&self, name: &str) {
        self.state.borrow_mut().devices.remove(name);
    }

    /// Make the next driver call named `op` fail with the given error
    /// record. One-shot; the failure is consumed by the first match.
    pub fn fail_next(&self, op: &'static str, code: i32, message: &str) {
        self.state.borrow_mut().fail_next = Some(PlannedFailure {
            op,
            code,
            message: message.to_string(),
        });
    }

    /// Remove `name` from the host at the start of the next device list
    /// fetch, after any count has already been taken. Simulates host churn
    /// between the count and fetch steps of an enumeration.
    pub fn drop_before_next_list(&self, name: &str) {
        self.state
            .borrow_mut()
            .drop_before_next_list
            .push(name.to_string());
    }

    /// How many list fetch calls (devices or capabilities) the driver has
    /// received.
    pub fn fetch_calls(&self) -> usize {
        self.state.borrow().fetch_calls
    }

    /// How many free calls the driver has received.
    pub fn free_calls(&self) -> usize {
        self.state.borrow().free_calls
    }

    /// A snapshot of the named device, if it exists.
    pub fn device(&self, name: &str) -> Option<TestDevice> {
        self.state.borrow().devices.get(name).cloned()
    }

    /// Whether the named device is currently detached.
    pub fn is_detached(&self, name: &str) -> bool {
        self.device(name).map_or(false, |d| d.detached)
    }

    /// Whether the named device's active configuration has been destroyed.
    pub fn is_destroyed(&self, name: &str) -> bool {
        self.device(name).map_or(false, |d| d.destroyed)
    }

    /// Consume a planned failure for `op`, recording its error. Returns
    /// whether the call should fail.
    fn inject(&self, op: &'static str) -> bool {
        let mut st = self.state.borrow_mut();
        if st.fail_next.as_ref().is_some_and(|f| f.op == op) {
            let f = st.fail_next.take().unwrap();
            st.last_error = DriverError::new(f.code, f.message);
            return true;
        }
        false
    }

    fn record_error(&self, code: i32, message: String) {
        self.state.borrow_mut().last_error = DriverError::new(code, message);
    }

    /// Resolve a handle to its device name, recording an error when the
    /// handle is unknown.
    fn handle_name(&self, dev: RawDeviceHandle) -> Option<String> {
        let name = self.state.borrow().handles.get(&dev.0).cloned();
        if name.is_none() {
            self.record_error(ERR_UNKNOWN_HANDLE, format!("unknown device handle {}", dev.0));
        }
        name
    }

    /// Run `f` against the named device, recording an error when the
    /// device no longer exists on the host.
    fn with_device<T>(&self, name: &str, f: impl FnOnce(&mut TestDevice) -> T) -> Option<T> {
        let mut st = self.state.borrow_mut();
        match st.devices.get_mut(name) {
            Some(device) => Some(f(device)),
            None => {
                st.last_error = DriverError::new(
                    ERR_NO_DEVICE,
                    format!("node device '{name}' no longer exists"),
                );
                None
            }
        }
    }
}

impl Default for TestNodeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDriver for TestNodeDriver {
    fn capabilities(&self) -> DriverCapabilities {
        self.state.borrow().capabilities
    }

    fn num_of_devices(&self, cap: Option<&str>, _flags: u32) -> i32 {
        if self.inject("num_of_devices") {
            return -1;
        }
        let st = self.state.borrow();
        st.devices.values().filter(|d| matches_cap(d, cap)).count() as i32
    }

    fn list_devices(&self, cap: Option<&str>, names: &mut [Option<String>], _flags: u32) -> i32 {
        {
            let mut st = self.state.borrow_mut();
            st.fetch_calls += 1;
            let doomed = std::mem::take(&mut st.drop_before_next_list);
            for name in doomed {
                st.devices.remove(&name);
            }
        }
        if self.inject("list_devices") {
            return -1;
        }
        let st = self.state.borrow();
        let mut written = 0;
        for device in st.devices.values().filter(|d| matches_cap(d, cap)) {
            if written == names.len() {
                break;
            }
            names[written] = Some(device.name.clone());
            written += 1;
        }
        written as i32
    }

    fn lookup_by_name(&self, name: &str) -> Option<RawDeviceHandle> {
        if self.inject("lookup_by_name") {
            return None;
        }
        let mut st = self.state.borrow_mut();
        if !st.devices.contains_key(name) {
            st.last_error = DriverError::new(
                ERR_NO_DEVICE,
                format!("no node device with matching name '{name}'"),
            );
            return None;
        }
        Some(st.alloc_handle(name))
    }

    fn create_device_xml(&self, xml: &str, _flags: u32) -> Option<RawDeviceHandle> {
        if self.inject("create_device_xml") {
            return None;
        }
        let name = match parse_device_name(xml) {
            Some(name) => name,
            None => {
                self.record_error(
                    ERR_BAD_DESCRIPTOR,
                    "device descriptor has no name".to_string(),
                );
                return None;
            }
        };
        let mut st = self.state.borrow_mut();
        st.devices.insert(
            name.clone(),
            TestDevice {
                name: name.clone(),
                parent: parse_device_parent(xml),
                caps: parse_device_caps(xml),
                xml: xml.to_string(),
                detached: false,
                destroyed: false,
            },
        );
        Some(st.alloc_handle(&name))
    }

    fn device_name(&self, dev: RawDeviceHandle) -> Option<String> {
        if self.inject("device_name") {
            return None;
        }
        self.handle_name(dev)
    }

    fn device_parent(&self, dev: RawDeviceHandle) -> Option<String> {
        let name = self.handle_name(dev)?;
        self.state
            .borrow()
            .devices
            .get(&name)
            .and_then(|d| d.parent.clone())
    }

    fn num_of_caps(&self, dev: RawDeviceHandle) -> i32 {
        if self.inject("num_of_caps") {
            return -1;
        }
        let Some(name) = self.handle_name(dev) else {
            return -1;
        };
        match self.with_device(&name, |d| d.caps.len()) {
            Some(len) => len as i32,
            None => -1,
        }
    }

    fn list_caps(&self, dev: RawDeviceHandle, names: &mut [Option<String>]) -> i32 {
        self.state.borrow_mut().fetch_calls += 1;
        if self.inject("list_caps") {
            return -1;
        }
        let Some(name) = self.handle_name(dev) else {
            return -1;
        };
        let caps = match self.with_device(&name, |d| d.caps.clone()) {
            Some(caps) => caps,
            None => return -1,
        };
        let mut written = 0;
        for cap in caps {
            if written == names.len() {
                break;
            }
            names[written] = Some(cap);
            written += 1;
        }
        written as i32
    }

    fn device_xml_desc(&self, dev: RawDeviceHandle, _flags: u32) -> Option<String> {
        if self.inject("device_xml_desc") {
            return None;
        }
        let name = self.handle_name(dev)?;
        self.with_device(&name, |d| d.xml.clone())
    }

    fn detach(&self, dev: RawDeviceHandle) -> i32 {
        if self.inject("detach") {
            return -1;
        }
        let Some(name) = self.handle_name(dev) else {
            return -1;
        };
        match self.with_device(&name, |d| d.detached = true) {
            Some(()) => 0,
            None => -1,
        }
    }

    fn reattach(&self, dev: RawDeviceHandle) -> i32 {
        if self.inject("reattach") {
            return -1;
        }
        let Some(name) = self.handle_name(dev) else {
            return -1;
        };
        match self.with_device(&name, |d| d.detached = false) {
            Some(()) => 0,
            None => -1,
        }
    }

    fn reset(&self, dev: RawDeviceHandle) -> i32 {
        if self.inject("reset") {
            return -1;
        }
        let Some(name) = self.handle_name(dev) else {
            return -1;
        };
        match self.with_device(&name, |_| ()) {
            Some(()) => 0,
            None => -1,
        }
    }

    fn destroy(&self, dev: RawDeviceHandle) -> i32 {
        if self.inject("destroy") {
            return -1;
        }
        let Some(name) = self.handle_name(dev) else {
            return -1;
        };
        match self.with_device(&name, |d| d.destroyed = true) {
            Some(()) => 0,
            None => -1,
        }
    }

    fn free_device(&self, dev: RawDeviceHandle) -> i32 {
        self.state.borrow_mut().free_calls += 1;
        if self.inject("free_device") {
            return -1;
        }
        let mut st = self.state.borrow_mut();
        match st.handles.remove(&dev.0) {
            Some(_) => 0,
            None => {
                st.last_error = DriverError::new(
                    ERR_UNKNOWN_HANDLE,
                    format!("unknown device handle {}", dev.0),
                );
                -1
            }
        }
    }

    fn last_error(&self) -> DriverError {
        self.state.borrow().last_error.clone()
    }
}
