//! # depthcam - device acquisition for LIPSedge ToF/RGB depth cameras
//!
//! Finds a supported camera on the USB bus, negotiates access to its ToF
//! and RGB sensors, and drives a frame-processing engine on a background
//! thread until the host stops the session. Provides:
//! - A static catalog of supported models (split DL, unified M5)
//! - A session state machine with bounded permission waits
//! - An acquisition loop with a lifetime error budget
//! - Optional libusb hotplug observation
//! - C FFI for catalog lookup and device listing
//!
//! ## Quick Start
//! ```no_run
//! use depthcam::{Frontend, RusbHost, Session, SessionConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn run<F: Frontend>(frontend: F) -> depthcam::Result<()> {
//!     let host = Arc::new(RusbHost::new()?);
//!     let mut session = Session::new(host, frontend, SessionConfig::from_env());
//!     println!("{}", depthcam::supported_cameras_notice());
//!
//!     session.acknowledge_supported_devices()?;
//!     loop {
//!         session.pump(Duration::from_millis(100))?;
//!         session.layout_pass();
//!     }
//! }
//! ```

pub mod acquisition;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod hotplug;
pub mod permission;
pub mod presentation;
pub mod scanner;
pub mod session;
pub mod staging;
pub mod types;
pub mod usb;

#[cfg(test)]
mod testing;

pub use catalog::{supported_cameras_notice, CameraModel, CatalogMatch};
pub use config::SessionConfig;
pub use engine::{Frontend, ProcessingEngine};
pub use error::DepthcamError;
pub use hotplug::{HotplugEvent, HotplugMonitor};
pub use presentation::{Surface, SurfaceKind};
pub use scanner::{list_cameras, scan, ScanResult};
pub use session::{Session, SessionEvent};
pub use staging::stage_resources;
pub use types::*;
pub use usb::{RusbHost, UsbHost};

/// Result type alias for depthcam operations.
pub type Result<T> = std::result::Result<T, DepthcamError>;
