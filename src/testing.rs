//! In-memory USB host, engine and frontend for unit tests.

use crate::engine::{Frontend, ProcessingEngine};
use crate::permission::PermissionReply;
use crate::presentation::{Surface, SurfaceKind};
use crate::types::{Dimensions, UsbDeviceInfo};
use crate::usb::UsbHost;
use crate::{DepthcamError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DL_TOF: UsbDeviceInfo = UsbDeviceInfo {
    bus_number: 1,
    address: 2,
    vendor_id: 0x2DF2,
    product_id: 0x213,
};
pub const DL_RGB: UsbDeviceInfo = UsbDeviceInfo {
    bus_number: 1,
    address: 3,
    vendor_id: 0x2DF2,
    product_id: 0x215,
};
pub const M5: UsbDeviceInfo = UsbDeviceInfo {
    bus_number: 2,
    address: 7,
    vendor_id: 0x2959,
    product_id: 0x3001,
};
const HUB: UsbDeviceInfo = UsbDeviceInfo {
    bus_number: 1,
    address: 1,
    vendor_id: 0x1d6b,
    product_id: 0x0002,
};

fn key(device: &UsbDeviceInfo) -> (u8, u8) {
    (device.bus_number, device.address)
}

pub struct MockHost {
    attached: Vec<UsbDeviceInfo>,
    granted: Mutex<HashSet<(u8, u8)>>,
    unopenable: Mutex<HashSet<(u8, u8)>>,
    requests: Mutex<Vec<UsbDeviceInfo>>,
    pending: Mutex<Vec<PermissionReply>>,
    pub permission_checks: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

impl MockHost {
    pub fn new(attached: Vec<UsbDeviceInfo>) -> Self {
        Self {
            attached,
            granted: Mutex::new(HashSet::new()),
            unopenable: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            permission_checks: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// DL ToF and RGB devices, then a root hub.
    pub fn split_camera() -> Self {
        Self::new(vec![DL_TOF, DL_RGB, HUB])
    }

    pub fn unified_camera() -> Self {
        Self::new(vec![HUB, M5])
    }

    pub fn attached(&self) -> Vec<UsbDeviceInfo> {
        self.attached.clone()
    }

    pub fn requests(&self) -> Vec<UsbDeviceInfo> {
        self.requests.lock().unwrap().clone()
    }

    pub fn set_permission(&self, device: &UsbDeviceInfo, granted: bool) {
        let mut set = self.granted.lock().unwrap();
        if granted {
            set.insert(key(device));
        } else {
            set.remove(&key(device));
        }
    }

    pub fn grant_all_silently(&self) {
        for device in &self.attached {
            self.set_permission(device, true);
        }
    }

    /// Grant the device and answer its outstanding requests.
    pub fn grant(&self, device: &UsbDeviceInfo) {
        self.set_permission(device, true);
        self.answer(device, true);
    }

    /// Answer outstanding requests for `device` with a denial.
    pub fn deny(&self, device: &UsbDeviceInfo) {
        self.answer(device, false);
    }

    fn answer(&self, device: &UsbDeviceInfo, granted: bool) {
        let replies: Vec<PermissionReply> = {
            let mut pending = self.pending.lock().unwrap();
            let (matching, rest): (Vec<_>, Vec<_>) = pending
                .drain(..)
                .partition(|r| r.device().same_device(device));
            *pending = rest;
            matching
        };
        for reply in replies {
            reply.send(granted);
        }
    }

    pub fn fail_open(&self, device: &UsbDeviceInfo) {
        self.unopenable.lock().unwrap().insert(key(device));
    }
}

impl UsbHost for MockHost {
    type Connection = MockConnection;

    fn devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        Ok(self.attached.clone())
    }

    fn has_permission(&self, device: &UsbDeviceInfo) -> bool {
        self.permission_checks.fetch_add(1, Ordering::SeqCst);
        self.granted.lock().unwrap().contains(&key(device))
    }

    fn request_permission(&self, device: &UsbDeviceInfo, reply: PermissionReply) {
        self.requests.lock().unwrap().push(device.clone());
        self.pending.lock().unwrap().push(reply);
    }

    fn open(&self, device: &UsbDeviceInfo) -> Result<MockConnection> {
        if self.unopenable.lock().unwrap().contains(&key(device)) {
            return Err(DepthcamError::Usb(rusb::Error::Io));
        }
        Ok(MockConnection {
            device: device.clone(),
            released: self.released.clone(),
        })
    }
}

pub struct MockConnection {
    pub device: UsbDeviceInfo,
    released: Arc<AtomicUsize>,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

type UpdateFn = Box<dyn FnMut(u64) -> Result<()> + Send>;

pub struct MockEngine {
    on_update: UpdateFn,
    updates: u64,
    pub cleanups: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn with_update<F>(on_update: F) -> Self
    where
        F: FnMut(u64) -> Result<()> + Send + 'static,
    {
        Self {
            on_update: Box::new(on_update),
            updates: 0,
            cleanups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn healthy() -> Self {
        Self::with_update(|_| Ok(()))
    }

    pub fn failing() -> Self {
        Self::with_update(|n| Err(DepthcamError::Engine(format!("no frame ({})", n))))
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl ProcessingEngine for MockEngine {
    fn update_data(&mut self) -> Result<()> {
        self.updates += 1;
        (self.on_update)(self.updates)
    }

    fn draw_bitmap(&mut self, depth: &mut dyn Surface, image: &mut dyn Surface) -> Result<()> {
        let shade = (self.updates & 0xff) as u32;
        depth.bitmap_mut().fill(0xff00_0000 | shade);
        image.bitmap_mut().fill(0xff00_0000 | (shade << 8));
        Ok(())
    }

    fn fps(&self, depth: bool) -> f32 {
        if depth {
            30.0
        } else {
            15.0
        }
    }

    fn depth_dimensions(&self) -> Dimensions {
        Dimensions::new(8, 6)
    }

    fn image_dimensions(&self) -> Dimensions {
        Dimensions::new(16, 9)
    }

    fn cleanup(&mut self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockSurface {
    pub kind: Option<SurfaceKind>,
    pub dimensions: Option<Dimensions>,
    pub pixels: Vec<u32>,
    pub redraws: u64,
    pub last_fps: Option<f32>,
    pub rendered_width: Option<u32>,
    pub layout_height: Option<u32>,
}

impl Surface for MockSurface {
    fn set_dimensions(&mut self, dimensions: Dimensions) {
        self.dimensions = Some(dimensions);
        self.pixels = vec![0; (dimensions.width * dimensions.height) as usize];
    }

    fn bitmap_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    fn redraw(&mut self, fps: f32) {
        self.redraws += 1;
        self.last_fps = Some(fps);
    }

    fn rendered_width(&self) -> Option<u32> {
        self.rendered_width
    }

    fn set_layout_height(&mut self, height: u32) {
        self.layout_height = Some(height);
    }
}

/// Builds engines from a queue; counts everything it creates.
#[derive(Default)]
pub struct MockFrontend {
    pub engines: Vec<MockEngine>,
    pub engines_created: usize,
    pub surfaces_created: usize,
    pub storage_roots: Vec<PathBuf>,
    pub cleanups: Arc<AtomicUsize>,
}

impl MockFrontend {
    pub fn with_engine(engine: MockEngine) -> Self {
        let cleanups = engine.cleanups.clone();
        Self {
            engines: vec![engine],
            cleanups,
            ..Default::default()
        }
    }
}

impl Frontend for MockFrontend {
    type Engine = MockEngine;
    type Surface = MockSurface;

    fn create_engine(&mut self, storage_root: &Path) -> Result<MockEngine> {
        self.storage_roots.push(storage_root.to_path_buf());
        self.engines_created += 1;
        let engine = self
            .engines
            .pop()
            .ok_or_else(|| DepthcamError::Engine("no engine queued".into()))?;
        Ok(engine)
    }

    fn create_surface(&mut self, kind: SurfaceKind) -> MockSurface {
        self.surfaces_created += 1;
        MockSurface {
            kind: Some(kind),
            ..Default::default()
        }
    }
}
