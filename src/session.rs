//! Session controller: the device-acquisition state machine.
//!
//! ```text
//! Idle -> Scanning -> AwaitingPermission -> Connecting -> Running -> Terminating -> Terminated
//! ```
//!
//! The controller lives on the host's control thread. Everything that
//! happens elsewhere (permission answers, the permission waiter, hotplug,
//! a failing acquisition loop) comes back as a [`SessionEvent`] on the
//! session channel and is applied by [`Session::pump`] or
//! [`Session::handle_event`].

use crate::acquisition::{lock_pipeline, Acquisition, LoopReport, Pipeline, SharedPipeline};
use crate::config::SessionConfig;
use crate::engine::{Frontend, ProcessingEngine};
use crate::hotplug::HotplugEvent;
use crate::permission::{GrantOutcome, PermissionCoordinator, WaiterHandle};
use crate::presentation::Viewers;
use crate::scanner::{self, ScanResult};
use crate::types::{PermissionState, Role, Roles, SessionState, UsbDeviceInfo};
use crate::usb::{DeviceHandle, UsbHost};
use crate::{DepthcamError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Messages delivered to the control thread.
#[derive(Debug)]
pub enum SessionEvent {
    /// The OS answered a permission request.
    Permission { device: UsbDeviceInfo, granted: bool },
    /// The permission waiter finished; `Err` names the role that timed out.
    PermissionWaitFinished(std::result::Result<(), Role>),
    Hotplug(HotplugEvent),
    /// The acquisition loop exhausted its error budget while running.
    AcquisitionFailed,
}

pub struct Session<H: UsbHost, F: Frontend> {
    host: Arc<H>,
    frontend: F,
    config: SessionConfig,
    state: SessionState,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    scan: Option<ScanResult>,
    permissions: Option<PermissionCoordinator<H>>,
    waiter: Option<WaiterHandle>,
    connections: Vec<DeviceHandle<H::Connection>>,
    connect_failures: Vec<UsbDeviceInfo>,
    pipeline: Option<SharedPipeline<F::Engine, F::Surface>>,
    acquisition: Option<Acquisition>,
    loop_report: Option<LoopReport>,
}

impl<H: UsbHost, F: Frontend> Session<H, F> {
    pub fn new(host: Arc<H>, frontend: F, config: SessionConfig) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            host,
            frontend,
            config,
            state: SessionState::Idle,
            events_tx,
            events_rx,
            scan: None,
            permissions: None,
            waiter: None,
            connections: Vec::new(),
            connect_failures: Vec::new(),
            pipeline: None,
            acquisition: None,
            loop_report: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sender for host-side notifications such as hotplug events.
    pub fn events(&self) -> Sender<SessionEvent> {
        self.events_tx.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    pub fn scan_result(&self) -> Option<&ScanResult> {
        self.scan.as_ref()
    }

    pub fn permission_state(&self, role: Role) -> PermissionState {
        self.permissions
            .as_ref()
            .map_or(PermissionState::Unrequested, |p| p.state(role))
    }

    pub fn connections(&self) -> &[DeviceHandle<H::Connection>] {
        &self.connections
    }

    /// Devices that could not be opened during Connecting.
    pub fn connect_failures(&self) -> &[UsbDeviceInfo] {
        &self.connect_failures
    }

    pub fn is_initialized(&self) -> bool {
        self.pipeline.is_some()
    }

    /// How the acquisition loop ended, once the session has torn it down.
    pub fn loop_report(&self) -> Option<LoopReport> {
        self.loop_report
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DepthcamError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        log::debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// The user acknowledged the supported-camera notice: scan, then start
    /// negotiating permissions.
    ///
    /// Returns once permissions are requested; if every device was already
    /// permitted the session is Running on return.
    pub fn acknowledge_supported_devices(&mut self) -> Result<()> {
        self.transition(SessionState::Scanning)?;
        log::info!("Checking attached USB...");

        let scan = match self
            .host
            .devices()
            .and_then(|devices| scanner::scan(&devices))
            .and_then(|scan| scan.require(self.config.required_roles).map(|_| scan))
        {
            Ok(scan) => scan,
            Err(e) => {
                log::error!("USB checking failed: {}", e);
                self.abort();
                return Err(e);
            }
        };
        if scan.unified_early_exit {
            log::debug!("Unified camera serves both roles");
        }

        let mut permissions =
            PermissionCoordinator::new(self.host.clone(), &scan, self.events_tx.clone());
        self.scan = Some(scan);
        self.transition(SessionState::AwaitingPermission)?;

        if permissions.request_all() {
            self.permissions = Some(permissions);
            return self.proceed();
        }

        let waiter = permissions.waiter(self.config.permission_poll);
        self.permissions = Some(permissions);
        log::info!(
            "Waiting up to {:?} per camera for USB permission",
            self.config.permission_poll.ceiling()
        );
        match waiter.spawn(self.events_tx.clone()) {
            Ok(handle) => self.waiter = Some(handle),
            Err(e) => {
                self.abort();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Wait up to `timeout` for one event and apply it.
    ///
    /// Returns `Ok(false)` on timeout. An `Err` means the event ended the
    /// session.
    pub fn pump(&mut self, timeout: Duration) -> Result<bool> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => self.handle_event(event).map(|_| true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Ok(false),
        }
    }

    /// Apply every event already queued.
    pub fn process_pending(&mut self) -> Result<usize> {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event)?;
            handled += 1;
        }
        Ok(handled)
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Permission { device, granted } => self.on_permission(&device, granted),
            SessionEvent::PermissionWaitFinished(outcome) => self.on_wait_finished(outcome),
            SessionEvent::Hotplug(event) => {
                let action = match event {
                    HotplugEvent::Attached(_) => "attached",
                    HotplugEvent::Detached(_) => "detached",
                };
                log::info!("USB device {}: {}", action, event.device());
                Ok(())
            }
            SessionEvent::AcquisitionFailed if self.state != SessionState::Running => {
                log::debug!("Acquisition failure reported in state {:?}", self.state);
                Ok(())
            }
            SessionEvent::AcquisitionFailed => {
                log::warn!("Acquisition loop gave up, terminating session");
                self.stop()?;
                Err(DepthcamError::AcquisitionFailed)
            }
        }
    }

    fn on_permission(&mut self, device: &UsbDeviceInfo, granted: bool) -> Result<()> {
        if self.state != SessionState::AwaitingPermission {
            log::debug!(
                "Ignoring permission reply for {} in state {:?}",
                device,
                self.state
            );
            return Ok(());
        }
        let Some(permissions) = self.permissions.as_mut() else {
            return Ok(());
        };

        match permissions.handle_reply(device, granted) {
            GrantOutcome::Granted(device, roles) => {
                self.connect(&device, roles);
                let all_granted = self
                    .permissions
                    .as_mut()
                    .map_or(false, |p| p.request_all());
                if all_granted {
                    self.proceed()
                } else {
                    log::debug!("Still waiting for the other camera");
                    Ok(())
                }
            }
            GrantOutcome::Denied | GrantOutcome::Ignored => Ok(()),
        }
    }

    fn on_wait_finished(&mut self, outcome: std::result::Result<(), Role>) -> Result<()> {
        if self.state != SessionState::AwaitingPermission {
            log::debug!("Permission wait finished in state {:?}", self.state);
            return Ok(());
        }

        match outcome {
            Ok(()) => {
                let all_granted = self
                    .permissions
                    .as_mut()
                    .map_or(false, |p| p.all_granted());
                if all_granted {
                    return self.proceed();
                }
                // Seen granted while polling but gone now; the wait is over.
                let role = self
                    .permissions
                    .as_ref()
                    .and_then(|p| p.missing_role())
                    .unwrap_or(Role::Tof);
                if let Some(permissions) = self.permissions.as_mut() {
                    permissions.mark_timed_out(role);
                }
                log::warn!("USB permission for the {} camera was lost, giving up", role);
                self.abort();
                Err(DepthcamError::PermissionTimeout(role))
            }
            Err(role) => {
                if let Some(permissions) = self.permissions.as_mut() {
                    permissions.mark_timed_out(role);
                }
                log::warn!("No USB permission for the {} camera, giving up", role);
                self.abort();
                Err(DepthcamError::PermissionTimeout(role))
            }
        }
    }

    /// Open one device unless it is already connected.
    fn connect(&mut self, device: &UsbDeviceInfo, roles: Roles) -> bool {
        if self.connections.iter().any(|c| c.device().same_device(device)) {
            return true;
        }
        match self.host.open(device) {
            Ok(connection) => {
                log::info!("Connected to {} ({:?})", device, roles);
                self.connect_failures.retain(|d| !d.same_device(device));
                self.connections
                    .push(DeviceHandle::new(device.clone(), roles, connection));
                true
            }
            Err(e) => {
                log::error!("Cannot open {}: {}", device, e);
                if !self.connect_failures.iter().any(|d| d.same_device(device)) {
                    self.connect_failures.push(device.clone());
                }
                false
            }
        }
    }

    /// All permissions are in: connect what is left, then initialize.
    fn proceed(&mut self) -> Result<()> {
        if self.state != SessionState::AwaitingPermission {
            return Ok(());
        }
        self.transition(SessionState::Connecting)?;
        self.cancel_waiter();

        let devices: Vec<(UsbDeviceInfo, Roles)> = self
            .permissions
            .as_ref()
            .map(|p| p.devices().map(|(d, r)| (d.clone(), r)).collect())
            .unwrap_or_default();

        let mut all_connected = true;
        for (device, roles) in &devices {
            all_connected &= self.connect(device, *roles);
        }

        if !all_connected {
            let failed: Vec<String> = self.connect_failures.iter().map(|d| d.to_string()).collect();
            if self.config.proceed_on_connect_failure && !self.connections.is_empty() {
                log::warn!("Continuing without {}", failed.join(", "));
            } else {
                self.abort();
                return Err(DepthcamError::ConnectionFailed(failed.join(", ")));
            }
        }

        self.initialize()
    }

    /// Create the engine and surfaces and start the acquisition thread.
    ///
    /// Only legal from Connecting; calling it again once Running is a no-op.
    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            SessionState::Running => {
                log::debug!("Session already initialized");
                return Ok(());
            }
            SessionState::Connecting => {}
            other => {
                return Err(DepthcamError::InvalidTransition {
                    from: other,
                    to: SessionState::Running,
                })
            }
        }

        log::debug!("init");
        let engine = match self.frontend.create_engine(&self.config.storage_root) {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("Processing engine could not be created: {}", e);
                self.abort();
                return Err(e);
            }
        };

        let viewers = Viewers::new(
            &mut self.frontend,
            engine.depth_dimensions(),
            engine.image_dimensions(),
        );
        let pipeline = Arc::new(Mutex::new(Pipeline::new(engine, viewers)));

        match Acquisition::start(
            pipeline.clone(),
            self.config.error_budget,
            self.events_tx.clone(),
        ) {
            Ok(acquisition) => self.acquisition = Some(acquisition),
            Err(e) => {
                lock_pipeline(&pipeline).engine.cleanup();
                self.abort();
                return Err(e);
            }
        }

        self.pipeline = Some(pipeline);
        self.transition(SessionState::Running)?;
        log::debug!("init done");
        Ok(())
    }

    /// Host layout callback; sizes the depth surface once.
    pub fn layout_pass(&mut self) -> bool {
        match &self.pipeline {
            Some(pipeline) => lock_pipeline(pipeline).viewers.layout_pass(),
            None => false,
        }
    }

    /// Run `f` against the engine and surfaces, if initialized.
    pub fn with_pipeline<R>(
        &self,
        f: impl FnOnce(&mut Pipeline<F::Engine, F::Surface>) -> R,
    ) -> Option<R> {
        self.pipeline
            .as_ref()
            .map(|pipeline| f(&mut lock_pipeline(pipeline)))
    }

    /// The host context is stopping: tear everything down.
    ///
    /// Blocks until the acquisition thread has exited, then releases the
    /// engine and the device connections. Safe to call in any state.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            SessionState::Terminated | SessionState::Terminating => Ok(()),
            SessionState::Running => {
                self.transition(SessionState::Terminating)?;
                if let Some(mut acquisition) = self.acquisition.take() {
                    self.loop_report = acquisition.stop();
                }
                if let Some(pipeline) = self.pipeline.take() {
                    lock_pipeline(&pipeline).engine.cleanup();
                    log::debug!("Processing engine released");
                }
                self.release_connections();
                self.transition(SessionState::Terminated)
            }
            _ => {
                log::debug!("Session not initialized, nothing to release");
                self.abort();
                Ok(())
            }
        }
    }

    /// Drop to Terminated from a pre-running state.
    fn abort(&mut self) {
        self.cancel_waiter();
        self.release_connections();
        if self.state != SessionState::Terminated {
            log::debug!("Session {:?} -> Terminated", self.state);
            self.state = SessionState::Terminated;
        }
    }

    fn cancel_waiter(&mut self) {
        if let Some(mut waiter) = self.waiter.take() {
            waiter.cancel();
        }
    }

    fn release_connections(&mut self) {
        for handle in self.connections.drain(..) {
            log::debug!("Releasing {}", handle.device());
        }
    }
}

impl<H: UsbHost, F: Frontend> Drop for Session<H, F> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Session teardown failed: {}", e);
        }
    }
}
