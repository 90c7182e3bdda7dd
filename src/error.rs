use crate::types::{Role, SessionState};
use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while discovering, connecting or streaming a camera.
#[derive(Debug, thiserror::Error)]
pub enum DepthcamError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("No supported camera found (LIPSedge DL 2DF2:213/215, LIPSedge M5 2959:3001)")]
    NoSupportedCamera,

    #[error("Required {0} camera not found")]
    MissingRole(Role),

    #[error("Timed out waiting for USB permission of the {0} camera")]
    PermissionTimeout(Role),

    #[error("USB device {0} not found")]
    DeviceNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Processing engine error: {0}")]
    Engine(String),

    #[error("Resource staging failed at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid session transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("libusb on this platform has no hotplug support")]
    HotplugUnsupported,

    #[error("Failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Acquisition loop stopped after exhausting its error budget")]
    AcquisitionFailed,
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &DepthcamError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
