use crate::catalog::{self, CameraModel, CatalogMatch};
use crate::types::{Role, Roles, UsbDeviceInfo};
use crate::usb::UsbHost;
use crate::{DepthcamError, Result};

/// Outcome of matching the attached devices against the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub tof: Option<UsbDeviceInfo>,
    pub rgb: Option<UsbDeviceInfo>,
    /// Model of the last matched device.
    pub model: Option<&'static CameraModel>,
    /// Set when a unified camera filled both roles and iteration stopped.
    pub unified_early_exit: bool,
}

impl ScanResult {
    pub fn device(&self, role: Role) -> Option<&UsbDeviceInfo> {
        match role {
            Role::Tof => self.tof.as_ref(),
            Role::Rgb => self.rgb.as_ref(),
        }
    }

    /// Roles that have a device assigned.
    pub fn found_roles(&self) -> Roles {
        let mut roles = Roles::empty();
        if self.tof.is_some() {
            roles |= Roles::TOF;
        }
        if self.rgb.is_some() {
            roles |= Roles::RGB;
        }
        roles
    }

    /// Distinct physical devices with the roles each one serves.
    ///
    /// A unified camera shows up once with both roles.
    pub fn devices(&self) -> Vec<(UsbDeviceInfo, Roles)> {
        let mut out: Vec<(UsbDeviceInfo, Roles)> = Vec::with_capacity(2);
        for role in Role::ALL {
            let Some(dev) = self.device(role) else {
                continue;
            };
            match out.iter_mut().find(|(d, _)| d.same_device(dev)) {
                Some((_, roles)) => *roles |= role.as_roles(),
                None => out.push((dev.clone(), role.as_roles())),
            }
        }
        out
    }

    /// Fail with the first role in `required` that has no device.
    pub fn require(&self, required: Roles) -> Result<()> {
        match required.roles().find(|role| self.device(*role).is_none()) {
            Some(role) => Err(DepthcamError::MissingRole(role)),
            None => Ok(()),
        }
    }
}

/// Match attached devices against the catalog in one pass.
///
/// A unified camera claims both roles and ends the pass so nothing later
/// in enumeration order can overwrite it. Split matches are recorded and
/// the pass continues, since the paired device may come later.
pub fn scan(devices: &[UsbDeviceInfo]) -> Result<ScanResult> {
    log::debug!("{} USB device(s) found", devices.len());
    let mut result = ScanResult::default();

    for device in devices {
        let vid = device.vendor_hex();
        let pid = device.product_hex();
        log::debug!("device {}: VID = {} / PID = {}", device, vid, pid);

        let Some(found) = catalog::lookup(&vid, &pid) else {
            continue;
        };

        if found.roles.contains(Roles::TOF | Roles::RGB) {
            log::info!("{} found at {}", found.model.name, device);
            result.tof = Some(device.clone());
            result.rgb = Some(device.clone());
            result.model = Some(found.model);
            result.unified_early_exit = true;
            return Ok(result);
        }

        if found.roles.contains(Roles::TOF) {
            log::info!("{} ToF sensor found at {}", found.model.name, device);
            result.tof = Some(device.clone());
        } else if found.roles.contains(Roles::RGB) {
            log::info!("{} RGB sensor found at {}", found.model.name, device);
            result.rgb = Some(device.clone());
        }
        result.model = Some(found.model);
    }

    if result.tof.is_none() && result.rgb.is_none() {
        log::warn!("Cannot find a valid USB camera");
        return Err(DepthcamError::NoSupportedCamera);
    }

    Ok(result)
}

/// Every attached device the catalog recognizes, in enumeration order.
///
/// Unlike [`scan`] this neither assigns roles nor stops at a unified
/// camera; it is meant for listing what is plugged in.
pub fn list_cameras<H: UsbHost>(host: &H) -> Result<Vec<(UsbDeviceInfo, CatalogMatch)>> {
    let cameras = host
        .devices()?
        .into_iter()
        .filter_map(|device| {
            catalog::lookup_ids(device.vendor_id, device.product_id).map(|m| (device, m))
        })
        .collect();
    Ok(cameras)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;

    fn dev(address: u8, vid: u16, pid: u16) -> UsbDeviceInfo {
        UsbDeviceInfo::new(1, address, vid, pid)
    }

    #[test]
    fn test_unified_match_halts_scan() {
        let m5 = dev(3, 0x2959, 0x3001);
        let devices = vec![
            dev(1, 0x1d6b, 0x0002),
            m5.clone(),
            dev(5, 0x2DF2, 0x213),
            dev(6, 0x2959, 0x3001),
        ];
        let result = scan(&devices).unwrap();
        assert!(result.unified_early_exit);
        assert_eq!(result.tof.as_ref(), Some(&m5));
        assert_eq!(result.rgb.as_ref(), Some(&m5));
        assert_eq!(result.devices().len(), 1);
        assert_eq!(result.devices()[0].1, Roles::TOF | Roles::RGB);
    }

    #[test]
    fn test_split_roles_independent() {
        let tof_only = scan(&[dev(2, 0x2DF2, 0x213)]).unwrap();
        assert!(tof_only.tof.is_some());
        assert!(tof_only.rgb.is_none());
        assert!(!tof_only.unified_early_exit);

        let rgb_only = scan(&[dev(2, 0x2DF2, 0x215)]).unwrap();
        assert!(rgb_only.tof.is_none());
        assert!(rgb_only.rgb.is_some());

        // Enumeration order is not guaranteed.
        let both = scan(&[dev(4, 0x2DF2, 0x215), dev(2, 0x2DF2, 0x213)]).unwrap();
        assert_eq!(both.tof.as_ref().map(|d| d.address), Some(2));
        assert_eq!(both.rgb.as_ref().map(|d| d.address), Some(4));
        assert_eq!(both.devices().len(), 2);
        assert!(both.require(Roles::TOF | Roles::RGB).is_ok());
    }

    #[test]
    fn test_unknown_devices_never_match() {
        let err = scan(&[dev(1, 0x046D, 0x213), dev(2, 0x2DF2, 0x999)]).unwrap_err();
        assert!(matches!(err, DepthcamError::NoSupportedCamera));
        assert!(matches!(scan(&[]), Err(DepthcamError::NoSupportedCamera)));
    }

    #[test]
    fn test_partial_match_requires_roles() {
        let result = scan(&[dev(2, 0x2DF2, 0x213)]).unwrap();
        assert!(result.require(Roles::TOF).is_ok());
        assert!(matches!(
            result.require(Roles::TOF | Roles::RGB),
            Err(DepthcamError::MissingRole(Role::Rgb))
        ));
    }

    #[test]
    fn test_list_cameras_skips_unknown() {
        let host = MockHost::split_camera();
        let cameras = list_cameras(&host).unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].1.roles, Roles::TOF);
        assert_eq!(cameras[1].1.roles, Roles::RGB);
        assert_eq!(cameras[1].1.model.name, "LIPSedge DL");

        let empty = MockHost::new(vec![dev(1, 0x1d6b, 0x0002)]);
        assert!(list_cameras(&empty).unwrap().is_empty());
    }
}
