use crate::engine::ProcessingEngine;
use crate::presentation::{Surface, Viewers};
use crate::session::SessionEvent;
use crate::{DepthcamError, Result};
use crossbeam_channel::Sender;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Faults tolerated over the whole running lifetime of a session.
pub const ERROR_BUDGET: u32 = 2;

/// Engine and surfaces, shared between the control and acquisition threads.
pub struct Pipeline<E, S> {
    pub engine: E,
    pub viewers: Viewers<S>,
}

impl<E: ProcessingEngine, S: Surface> Pipeline<E, S> {
    pub fn new(engine: E, viewers: Viewers<S>) -> Self {
        Self { engine, viewers }
    }

    /// One acquisition iteration: update, draw, redraw both surfaces.
    pub fn step(&mut self) -> Result<()> {
        self.engine.update_data()?;
        self.engine
            .draw_bitmap(&mut self.viewers.depth, &mut self.viewers.image)?;
        self.viewers.depth.redraw(self.engine.fps(true));
        self.viewers.image.redraw(self.engine.fps(false));
        Ok(())
    }
}

pub type SharedPipeline<E, S> = Arc<Mutex<Pipeline<E, S>>>;

/// Lock a pipeline, recovering it if an engine panic poisoned the mutex.
pub(crate) fn lock_pipeline<E, S>(
    pipeline: &Mutex<Pipeline<E, S>>,
) -> std::sync::MutexGuard<'_, Pipeline<E, S>> {
    pipeline.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The running flag was cleared from outside.
    Stopped,
    /// Faults used up the budget; `escalated` if the session was told.
    BudgetExhausted { escalated: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub iterations: u64,
    pub faults: u32,
    pub exit: LoopExit,
}

/// Handle to the acquisition thread.
pub struct Acquisition {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<LoopReport>>,
}

impl Acquisition {
    /// Start the acquisition thread over `pipeline`.
    ///
    /// A loop that burns through its budget while still flagged as running
    /// posts [`SessionEvent::AcquisitionFailed`] to `events`.
    pub(crate) fn start<E, S>(
        pipeline: SharedPipeline<E, S>,
        error_budget: u32,
        events: Sender<SessionEvent>,
    ) -> Result<Acquisition>
    where
        E: ProcessingEngine,
        S: Surface,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let thread = std::thread::Builder::new()
            .name("depthcam-acquisition".into())
            .spawn(move || run_loop(&pipeline, &running_clone, error_budget, &events))
            .map_err(|source| DepthcamError::Thread {
                name: "acquisition",
                source,
            })?;

        Ok(Acquisition {
            running,
            thread: Some(thread),
        })
    }

    /// True until `stop` is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the loop thread has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Clear the running flag and block until the thread has exited.
    pub fn stop(&mut self) -> Option<LoopReport> {
        self.running.store(false, Ordering::Release);
        let thread = self.thread.take()?;
        // A std join cannot be interrupted; it only fails if the loop panicked
        // outside the per-iteration guard.
        match thread.join() {
            Ok(report) => Some(report),
            Err(_) => {
                log::error!("Acquisition thread panicked");
                None
            }
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The acquisition loop body.
///
/// Each fault costs one unit of budget; the fault that finds the budget
/// already at zero ends the loop, so a permanently failing engine runs
/// exactly `error_budget + 1` iterations.
pub(crate) fn run_loop<E, S>(
    pipeline: &Mutex<Pipeline<E, S>>,
    running: &AtomicBool,
    error_budget: u32,
    events: &Sender<SessionEvent>,
) -> LoopReport
where
    E: ProcessingEngine,
    S: Surface,
{
    log::info!("Acquisition loop started (error budget {})", error_budget);

    let mut remaining = error_budget;
    let mut iterations = 0u64;
    let mut faults = 0u32;
    let mut exhausted = false;

    while running.load(Ordering::Acquire) {
        iterations += 1;
        if let Err(e) = run_iteration(pipeline) {
            faults += 1;
            log::error!("Fault during acquisition loop: {}", e);
            if remaining > 0 {
                remaining -= 1;
                log::warn!("Keep going, {} more fault(s) tolerated", remaining);
            } else {
                log::warn!("Acquisition finished due to faults");
                exhausted = true;
                break;
            }
        }
    }

    let exit = if !exhausted {
        log::debug!("Acquisition finished by termination");
        LoopExit::Stopped
    } else if running.load(Ordering::Acquire) {
        log::debug!("Triggering session termination");
        let escalated = events.send(SessionEvent::AcquisitionFailed).is_ok();
        LoopExit::BudgetExhausted { escalated }
    } else {
        log::debug!("Acquisition finished by termination");
        LoopExit::BudgetExhausted { escalated: false }
    };

    LoopReport {
        iterations,
        faults,
        exit,
    }
}

/// Run one step, turning an engine panic into an error.
fn run_iteration<E, S>(pipeline: &Mutex<Pipeline<E, S>>) -> Result<()>
where
    E: ProcessingEngine,
    S: Surface,
{
    let mut guard = lock_pipeline(pipeline);
    match panic::catch_unwind(AssertUnwindSafe(|| guard.step())) {
        Ok(result) => result,
        Err(payload) => Err(DepthcamError::Engine(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}
