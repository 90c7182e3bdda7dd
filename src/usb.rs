use crate::permission::PermissionReply;
use crate::types::{Roles, UsbDeviceInfo};
use crate::{DepthcamError, Result};
use rusb::{Context, UsbContext};

/// The host's USB subsystem as seen by the session.
///
/// `request_permission` is asynchronous: the implementation hands the
/// answer back through `reply` whenever the user or OS decides, possibly
/// never.
pub trait UsbHost: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// All currently attached devices, in enumeration order.
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>>;

    /// Non-blocking check whether the device may be opened.
    fn has_permission(&self, device: &UsbDeviceInfo) -> bool;

    fn request_permission(&self, device: &UsbDeviceInfo, reply: PermissionReply);

    fn open(&self, device: &UsbDeviceInfo) -> Result<Self::Connection>;
}

/// An open connection annotated with the roles it serves.
pub struct DeviceHandle<C> {
    device: UsbDeviceInfo,
    roles: Roles,
    connection: C,
}

impl<C> DeviceHandle<C> {
    pub fn new(device: UsbDeviceInfo, roles: Roles, connection: C) -> Self {
        Self {
            device,
            roles,
            connection,
        }
    }

    pub fn device(&self) -> &UsbDeviceInfo {
        &self.device
    }

    pub fn roles(&self) -> Roles {
        self.roles
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }
}

impl<C> std::fmt::Debug for DeviceHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device", &self.device)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// libusb-backed host.
///
/// libusb has no permission dialog: access is decided by the device node
/// permissions (udev rules on Linux), so a permission request is answered
/// immediately with the result of a probe open.
pub struct RusbHost {
    context: Context,
}

impl RusbHost {
    pub fn new() -> Result<Self> {
        Ok(Self {
            context: Context::new()?,
        })
    }

    /// The libusb context, shared with the hotplug monitor.
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn find(&self, info: &UsbDeviceInfo) -> Result<rusb::Device<Context>> {
        self.context
            .devices()?
            .iter()
            .find(|d| d.bus_number() == info.bus_number && d.address() == info.address)
            .ok_or_else(|| DepthcamError::DeviceNotFound(info.to_string()))
    }
}

impl UsbHost for RusbHost {
    type Connection = RusbConnection;

    fn devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        let list = self.context.devices()?;
        let mut devices = Vec::with_capacity(list.len());

        for device in list.iter() {
            match device.device_descriptor() {
                Ok(desc) => devices.push(UsbDeviceInfo::new(
                    device.bus_number(),
                    device.address(),
                    desc.vendor_id(),
                    desc.product_id(),
                )),
                Err(e) => log::debug!(
                    "Skipping {:03}:{:03}, no descriptor: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        Ok(devices)
    }

    fn has_permission(&self, info: &UsbDeviceInfo) -> bool {
        let device = match self.find(info) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Permission check for {} failed: {}", info, e);
                return false;
            }
        };
        match device.open() {
            Ok(_) => true,
            Err(rusb::Error::Access) => false,
            Err(e) => {
                log::debug!("Probe open of {} failed: {}", info, e);
                false
            }
        }
    }

    fn request_permission(&self, info: &UsbDeviceInfo, reply: PermissionReply) {
        let granted = self.has_permission(info);
        if !granted {
            log::warn!(
                "No access to {}; install a udev rule for it or run with elevated privileges",
                info
            );
        }
        reply.send(granted);
    }

    fn open(&self, info: &UsbDeviceInfo) -> Result<RusbConnection> {
        let handle = self.find(info)?.open()?;
        log::debug!("Opened libusb handle for {}", info);
        Ok(RusbConnection {
            info: info.clone(),
            handle,
        })
    }
}

/// An open libusb handle. Closed on drop.
pub struct RusbConnection {
    info: UsbDeviceInfo,
    handle: rusb::DeviceHandle<Context>,
}

impl RusbConnection {
    pub fn handle(&self) -> &rusb::DeviceHandle<Context> {
        &self.handle
    }
}

impl Drop for RusbConnection {
    fn drop(&mut self) {
        log::debug!("Releasing libusb handle for {}", self.info);
    }
}
