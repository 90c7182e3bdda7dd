//! USB permission negotiation.
//!
//! Grants arrive asynchronously as [`SessionEvent::Permission`] messages
//! on the session channel. The coordinator tracks per-role state and
//! re-requests whatever is still missing; [`PermissionWaiter`] is the
//! bounded polling fallback that runs off the control thread.

use crate::scanner::ScanResult;
use crate::session::SessionEvent;
use crate::types::{PermissionState, Role, Roles, UsbDeviceInfo};
use crate::usb::UsbHost;
use crate::{DepthcamError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll attempts before a permission wait gives up.
pub const PERMISSION_MAX_ATTEMPTS: u32 = 30;
/// Delay before each poll. 30 x 500 ms caps a wait at 15 s.
pub const PERMISSION_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    /// Upper bound on a single role's wait.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: PERMISSION_MAX_ATTEMPTS,
            interval: PERMISSION_POLL_INTERVAL,
        }
    }
}

/// One-shot answer to a permission request.
///
/// Handed to [`UsbHost::request_permission`]; sending it posts a
/// [`SessionEvent::Permission`] to the owning session.
#[derive(Debug)]
pub struct PermissionReply {
    device: UsbDeviceInfo,
    sender: Sender<SessionEvent>,
}

impl PermissionReply {
    pub(crate) fn new(device: UsbDeviceInfo, sender: Sender<SessionEvent>) -> Self {
        Self { device, sender }
    }

    pub fn device(&self) -> &UsbDeviceInfo {
        &self.device
    }

    pub fn send(self, granted: bool) {
        let event = SessionEvent::Permission {
            device: self.device,
            granted,
        };
        if self.sender.send(event).is_err() {
            log::debug!("Session gone, dropping permission reply");
        }
    }
}

/// What a permission notification changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// The device now has permission and should be connected.
    Granted(UsbDeviceInfo, Roles),
    Denied,
    /// Not one of the devices this session is waiting on.
    Ignored,
}

struct Entry {
    device: UsbDeviceInfo,
    roles: Roles,
    state: PermissionState,
}

pub struct PermissionCoordinator<H: UsbHost> {
    host: Arc<H>,
    entries: Vec<Entry>,
    roles_by_scan: Vec<(Role, UsbDeviceInfo)>,
    events: Sender<SessionEvent>,
}

impl<H: UsbHost> PermissionCoordinator<H> {
    pub fn new(host: Arc<H>, scan: &ScanResult, events: Sender<SessionEvent>) -> Self {
        let entries = scan
            .devices()
            .into_iter()
            .map(|(device, roles)| Entry {
                device,
                roles,
                state: PermissionState::Unrequested,
            })
            .collect();
        let roles_by_scan = Role::ALL
            .into_iter()
            .filter_map(|role| scan.device(role).map(|d| (role, d.clone())))
            .collect();

        Self {
            host,
            entries,
            roles_by_scan,
            events,
        }
    }

    pub fn state(&self, role: Role) -> PermissionState {
        self.entries
            .iter()
            .find(|e| e.roles.contains(role.as_roles()))
            .map(|e| e.state)
            .unwrap_or(PermissionState::Unrequested)
    }

    /// Devices this coordinator negotiates for, with their roles.
    pub fn devices(&self) -> impl Iterator<Item = (&UsbDeviceInfo, Roles)> {
        self.entries.iter().map(|e| (&e.device, e.roles))
    }

    /// Returns true if every device already has permission. Otherwise
    /// requests permission for each device still lacking it and returns
    /// false; devices that have it are never re-requested.
    pub fn request_all(&mut self) -> bool {
        let mut all_granted = true;

        for entry in self.entries.iter_mut() {
            if self.host.has_permission(&entry.device) {
                log::debug!("USB device {} permission already granted", entry.device);
                entry.state = PermissionState::Granted;
            } else {
                log::debug!("Try to request {} permission", entry.device);
                entry.state = PermissionState::Requested;
                let reply = PermissionReply::new(entry.device.clone(), self.events.clone());
                self.host.request_permission(&entry.device, reply);
                all_granted = false;
            }
        }

        all_granted
    }

    /// Non-blocking check that every device has permission. Issues no requests.
    pub fn all_granted(&mut self) -> bool {
        let mut all_granted = true;
        for entry in self.entries.iter_mut() {
            if self.host.has_permission(&entry.device) {
                entry.state = PermissionState::Granted;
            } else {
                all_granted = false;
            }
        }
        all_granted
    }

    /// Apply a grant/denial notification.
    pub fn handle_reply(&mut self, device: &UsbDeviceInfo, granted: bool) -> GrantOutcome {
        let Some(entry) = self.entries.iter_mut().find(|e| e.device.same_device(device)) else {
            log::debug!("Permission reply for unrelated device {}", device);
            return GrantOutcome::Ignored;
        };

        if !granted {
            log::warn!("Permission for {} denied by user", device);
            return GrantOutcome::Denied;
        }

        log::info!("Permission for {} granted by user", device);
        entry.state = PermissionState::Granted;
        GrantOutcome::Granted(entry.device.clone(), entry.roles)
    }

    /// First role whose device has not been seen granted.
    pub fn missing_role(&self) -> Option<Role> {
        self.entries
            .iter()
            .find(|e| e.state != PermissionState::Granted)
            .and_then(|e| e.roles.roles().next())
    }

    pub fn mark_timed_out(&mut self, role: Role) {
        for entry in self.entries.iter_mut() {
            if entry.roles.contains(role.as_roles()) && !entry.state.is_terminal() {
                entry.state = PermissionState::TimedOut;
            }
        }
    }

    pub fn waiter(&self, policy: PollPolicy) -> PermissionWaiter<H> {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(0);
        PermissionWaiter {
            host: self.host.clone(),
            targets: self.roles_by_scan.clone(),
            policy,
            cancel_tx: Some(cancel_tx),
            cancel_rx,
        }
    }
}

/// How a single-role wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Granted,
    TimedOut,
    /// The owning session went away before the wait finished.
    Cancelled,
}

/// Bounded polling wait for permissions, detachable from the coordinator.
///
/// The delay between polls doubles as the cancel point: once spawned, the
/// wait ends as soon as its [`WaiterHandle`] is cancelled or dropped.
pub struct PermissionWaiter<H: UsbHost> {
    host: Arc<H>,
    targets: Vec<(Role, UsbDeviceInfo)>,
    policy: PollPolicy,
    cancel_tx: Option<Sender<()>>,
    cancel_rx: Receiver<()>,
}

impl<H: UsbHost> PermissionWaiter<H> {
    /// Sleep-then-poll up to `max_attempts` times. True on the first
    /// observed grant, false once attempts run out.
    pub fn wait_for(&self, role: Role) -> bool {
        self.wait_role(role) == WaitOutcome::Granted
    }

    fn wait_role(&self, role: Role) -> WaitOutcome {
        let Some((_, device)) = self.targets.iter().find(|(r, _)| *r == role) else {
            log::debug!("No {} device to wait for", role);
            return WaitOutcome::TimedOut;
        };

        let mut counter = self.policy.max_attempts;
        let mut granted = false;
        while !granted && counter > 0 {
            counter -= 1;
            match self.cancel_rx.recv_timeout(self.policy.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => {
                    log::debug!("Permission wait for {} cancelled", role);
                    return WaitOutcome::Cancelled;
                }
            }
            granted = self.host.has_permission(device);
            log::debug!(
                "Wait for USB permission from user ({}:{})... counter left {}",
                role,
                granted,
                counter
            );
        }

        if !granted {
            log::warn!("Timeout! Give up waiting for {} permission", role);
            return WaitOutcome::TimedOut;
        }
        WaitOutcome::Granted
    }

    /// Wait for each found role in order; the first role that times out.
    pub fn wait_all(&self) -> std::result::Result<(), Role> {
        for (role, _) in &self.targets {
            if !self.wait_for(*role) {
                return Err(*role);
            }
        }
        Ok(())
    }

    /// Run the waits on their own thread and post the outcome to `events`.
    ///
    /// A cancelled wait posts nothing.
    pub(crate) fn spawn(mut self, events: Sender<SessionEvent>) -> Result<WaiterHandle> {
        let cancel = self.cancel_tx.take();
        let thread = std::thread::Builder::new()
            .name("depthcam-permission".into())
            .spawn(move || {
                let mut outcome = Ok(());
                for (role, _) in &self.targets {
                    match self.wait_role(*role) {
                        WaitOutcome::Granted => {}
                        WaitOutcome::TimedOut => {
                            outcome = Err(*role);
                            break;
                        }
                        WaitOutcome::Cancelled => return,
                    }
                }
                let _ = events.send(SessionEvent::PermissionWaitFinished(outcome));
            })
            .map_err(|source| DepthcamError::Thread {
                name: "permission",
                source,
            })?;

        Ok(WaiterHandle {
            cancel,
            thread: Some(thread),
        })
    }
}

/// Handle to a spawned permission wait. Cancels and joins on drop.
pub(crate) struct WaiterHandle {
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WaiterHandle {
    /// Stop polling and block until the waiter thread has exited.
    pub(crate) fn cancel(&mut self) {
        // Disconnecting the channel wakes the waiter out of its delay.
        self.cancel.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Permission waiter thread panicked");
            }
        }
    }
}

impl Drop for WaiterHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
