use crate::session::SessionEvent;
use crate::types::UsbDeviceInfo;
use crate::{DepthcamError, Result};
use crossbeam_channel::Sender;
use rusb::{Context, Device, Hotplug, HotplugBuilder, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// USB attach/detach notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached(UsbDeviceInfo),
    Detached(UsbDeviceInfo),
}

impl HotplugEvent {
    pub fn device(&self) -> &UsbDeviceInfo {
        match self {
            HotplugEvent::Attached(d) | HotplugEvent::Detached(d) => d,
        }
    }
}

struct Forwarder {
    events: Sender<SessionEvent>,
}

impl Forwarder {
    fn forward(&self, event: HotplugEvent) {
        if self.events.send(SessionEvent::Hotplug(event)).is_err() {
            log::trace!("Session gone, dropping hotplug event");
        }
    }
}

impl Hotplug<Context> for Forwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        self.forward(HotplugEvent::Attached(describe(&device)));
    }

    fn device_left(&mut self, device: Device<Context>) {
        self.forward(HotplugEvent::Detached(describe(&device)));
    }
}

fn describe(device: &Device<Context>) -> UsbDeviceInfo {
    let (vid, pid) = device
        .device_descriptor()
        .map(|d| (d.vendor_id(), d.product_id()))
        .unwrap_or((0, 0));
    UsbDeviceInfo::new(device.bus_number(), device.address(), vid, pid)
}

/// Background libusb event pump that forwards attach/detach
/// notifications to a session. Observation only: nothing is re-scanned.
pub struct HotplugMonitor {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl HotplugMonitor {
    pub fn start(context: Context, events: Sender<SessionEvent>) -> Result<HotplugMonitor> {
        if !rusb::has_hotplug() {
            return Err(DepthcamError::HotplugUnsupported);
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<rusb::Result<()>>(1);

        let thread = std::thread::Builder::new()
            .name("depthcam-hotplug".into())
            .spawn(move || {
                // Registration stays on the thread that pumps its events.
                let registration = match HotplugBuilder::new()
                    .enumerate(false)
                    .register(&context, Box::new(Forwarder { events }))
                {
                    Ok(r) => {
                        let _ = ready_tx.send(Ok(()));
                        r
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                hotplug_loop(&context, &stop_clone);
                drop(registration);
            })
            .map_err(|source| DepthcamError::Thread {
                name: "hotplug",
                source,
            })?;

        let mut monitor = HotplugMonitor {
            stop_flag,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::debug!("Hotplug callbacks registered");
                Ok(monitor)
            }
            Ok(Err(e)) => {
                monitor.shutdown();
                Err(DepthcamError::Usb(e))
            }
            Err(_) => {
                monitor.shutdown();
                Err(DepthcamError::HotplugUnsupported)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Acquire)
    }

    /// Stop the event pump and wait for its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn hotplug_loop(context: &Context, stop_flag: &AtomicBool) {
    log::info!("Hotplug monitor started");

    loop {
        if stop_flag.load(Ordering::Acquire) {
            log::info!("Hotplug monitor stopping (stop flag set)");
            break;
        }

        // Short timeout so the stop flag is seen promptly.
        match context.handle_events(Some(Duration::from_millis(100))) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                log::debug!("USB event handling interrupted");
            }
            Err(e) => {
                log::warn!("Error handling USB events: {}", e);
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}
