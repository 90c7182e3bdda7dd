use std::fmt;

/// Sensor role a USB device can serve.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Time-of-flight depth sensor.
    Tof = 0,
    /// Color sensor.
    Rgb = 1,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Tof, Role::Rgb];

    /// The single-bit role set for this role.
    pub fn as_roles(self) -> Roles {
        match self {
            Role::Tof => Roles::TOF,
            Role::Rgb => Roles::RGB,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Tof => f.write_str("ToF"),
            Role::Rgb => f.write_str("RGB"),
        }
    }
}

bitflags::bitflags! {
    /// Set of roles served by one physical device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(C)]
    pub struct Roles: u8 {
        const TOF = 1 << 0;
        const RGB = 1 << 1;
    }
}

impl Roles {
    /// Iterate over the individual roles in this set.
    pub fn roles(self) -> impl Iterator<Item = Role> {
        Role::ALL
            .into_iter()
            .filter(move |role| self.contains(role.as_roles()))
    }
}

/// Physical layout of a camera model on the bus.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Two USB devices, one per role.
    Split = 0,
    /// One composite USB device serving both roles.
    Unified = 1,
}

/// A USB device as reported by enumeration.
///
/// Identity is the (bus, address) pair; vendor and product ids are kept
/// for catalog matching and log output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbDeviceInfo {
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbDeviceInfo {
    pub fn new(bus_number: u8, address: u8, vendor_id: u16, product_id: u16) -> Self {
        Self {
            bus_number,
            address,
            vendor_id,
            product_id,
        }
    }

    /// Vendor id as upper-case hex without padding, e.g. `2DF2`.
    pub fn vendor_hex(&self) -> String {
        format!("{:X}", self.vendor_id)
    }

    /// Product id as upper-case hex without padding, e.g. `213`.
    pub fn product_hex(&self) -> String {
        format!("{:X}", self.product_id)
    }

    /// Whether both records describe the same physical device.
    pub fn same_device(&self, other: &UsbDeviceInfo) -> bool {
        self.bus_number == other.bus_number && self.address == other.address
    }
}

impl fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:03}:{:03} [{:04X}:{:04X}]",
            self.bus_number, self.address, self.vendor_id, self.product_id
        )
    }
}

/// Frame size in pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Permission grant state for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Unrequested,
    Requested,
    Granted,
    TimedOut,
}

impl PermissionState {
    /// Granted and TimedOut end a request attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, PermissionState::Granted | PermissionState::TimedOut)
    }
}

/// Lifecycle state of a camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    AwaitingPermission,
    Connecting,
    Running,
    Terminating,
    Terminated,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Scanning)
                | (Idle, Terminated)
                | (Scanning, AwaitingPermission)
                | (Scanning, Terminated)
                | (AwaitingPermission, Connecting)
                | (AwaitingPermission, Terminated)
                | (Connecting, Running)
                | (Connecting, Terminated)
                | (Running, Terminating)
                | (Terminating, Terminated)
        )
    }
}
