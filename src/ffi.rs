//! C FFI layer for depthcam.
//!
//! Exposes the camera catalog and device listing to C/C++ hosts. The
//! generated C header is written to `include/depthcam.h` by cbindgen.

use crate::catalog;
use crate::error::LastError;
use crate::scanner;
use crate::usb::RusbHost;
use std::ffi::{c_char, c_int};

static LAST_ERROR: LastError = LastError::new();

/// `roles` bit for the depth (ToF) sensor.
pub const DC_ROLE_TOF: u8 = 0x01;
/// `roles` bit for the color sensor.
pub const DC_ROLE_RGB: u8 = 0x02;

/// A recognized camera device in C-compatible layout.
#[repr(C)]
pub struct DcCamera {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// `DC_ROLE_*` bits served by this device.
    pub roles: u8,
    /// Null-terminated model name.
    pub model: [c_char; 32],
}

fn str_to_fixed<const N: usize>(s: &str) -> [c_char; N] {
    let mut buf = [0 as c_char; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N - 1);
    for (i, &b) in bytes[..len].iter().enumerate() {
        buf[i] = b as c_char;
    }
    buf
}

/// Roles a vendor/product pair serves, as `DC_ROLE_*` bits. 0 if unsupported.
#[no_mangle]
pub extern "C" fn dc_lookup(vendor_id: u16, product_id: u16) -> u8 {
    catalog::lookup_ids(vendor_id, product_id).map_or(0, |m| m.roles.bits())
}

/// List attached supported cameras.
///
/// Writes up to `max` entries into `out`. Returns the number written, or
/// -1 on error (check `dc_last_error()`).
///
/// # Safety
/// `out` must point to an array of at least `max` `DcCamera` elements, or be null.
#[no_mangle]
pub unsafe extern "C" fn dc_list_cameras(out: *mut DcCamera, max: c_int) -> c_int {
    LAST_ERROR.clear();
    let cameras = match RusbHost::new().and_then(|host| scanner::list_cameras(&host)) {
        Ok(cameras) => cameras,
        Err(e) => {
            LAST_ERROR.set(&e);
            return -1;
        }
    };

    let count = cameras.len().min(max.max(0) as usize);
    if out.is_null() {
        return count as c_int;
    }
    for (i, (device, found)) in cameras.iter().take(count).enumerate() {
        let camera = DcCamera {
            bus: device.bus_number,
            address: device.address,
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            roles: found.roles.bits(),
            model: str_to_fixed(found.model.name),
        };
        out.add(i).write(camera);
    }
    count as c_int
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next depthcam API call.
#[no_mangle]
pub extern "C" fn dc_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Roles;

    #[test]
    fn test_role_bits_match_roles() {
        assert_eq!(Roles::TOF.bits(), DC_ROLE_TOF);
        assert_eq!(Roles::RGB.bits(), DC_ROLE_RGB);
    }

    #[test]
    fn test_dc_lookup() {
        assert_eq!(dc_lookup(0x2DF2, 0x213), DC_ROLE_TOF);
        assert_eq!(dc_lookup(0x2DF2, 0x215), DC_ROLE_RGB);
        assert_eq!(dc_lookup(0x2959, 0x3001), DC_ROLE_TOF | DC_ROLE_RGB);
        assert_eq!(dc_lookup(0x046D, 0x0825), 0);
    }

    #[test]
    fn test_str_to_fixed_truncates() {
        let buf: [c_char; 8] = str_to_fixed("LIPSedge DL");
        let bytes: Vec<u8> = buf.iter().map(|&c| c as u8).collect();
        assert_eq!(&bytes, b"LIPSedg\0");
    }
}
