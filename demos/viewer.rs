//! Run a full camera session against a synthetic processing engine.
//!
//! The engine fakes frames, so this exercises discovery, USB access,
//! the acquisition thread and teardown on real hardware without the
//! vendor SDK. Surfaces print their frame rate to stdout.
//!
//! Usage: cargo run --example viewer [seconds]
//! Set DEPTHCAM_BUNDLE_DIR to stage a resource tree first.

use depthcam::{
    Dimensions, Frontend, HotplugMonitor, ProcessingEngine, RusbHost, Session, SessionConfig,
    SessionState, Surface, SurfaceKind,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SyntheticEngine {
    frame: u64,
    started: Instant,
}

impl ProcessingEngine for SyntheticEngine {
    fn update_data(&mut self) -> depthcam::Result<()> {
        // Pace at ~30 Hz like a real sensor.
        std::thread::sleep(Duration::from_millis(33));
        self.frame += 1;
        Ok(())
    }

    fn draw_bitmap(
        &mut self,
        depth: &mut dyn Surface,
        image: &mut dyn Surface,
    ) -> depthcam::Result<()> {
        let shade = (self.frame % 256) as u32;
        depth.bitmap_mut().fill(0xff00_0000 | shade << 16 | shade << 8 | shade);
        image.bitmap_mut().fill(0xff00_0000 | shade << 8);
        Ok(())
    }

    fn fps(&self, _depth: bool) -> f32 {
        let elapsed = self.started.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            self.frame as f32 / elapsed
        } else {
            0.0
        }
    }

    fn depth_dimensions(&self) -> Dimensions {
        Dimensions::new(640, 480)
    }

    fn image_dimensions(&self) -> Dimensions {
        Dimensions::new(1280, 720)
    }

    fn cleanup(&mut self) {
        println!("Engine released after {} frames", self.frame);
    }
}

struct ConsoleSurface {
    kind: SurfaceKind,
    pixels: Vec<u32>,
    redraws: u64,
}

impl Surface for ConsoleSurface {
    fn set_dimensions(&mut self, dimensions: Dimensions) {
        println!("{:?} surface {}x{}", self.kind, dimensions.width, dimensions.height);
        self.pixels = vec![0; (dimensions.width * dimensions.height) as usize];
    }

    fn bitmap_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    fn redraw(&mut self, fps: f32) {
        self.redraws += 1;
        // Print roughly every 3 seconds
        if self.redraws % 90 == 1 {
            println!("{:?}: {:.1} fps ({} frames)", self.kind, fps, self.redraws);
        }
    }

    fn rendered_width(&self) -> Option<u32> {
        Some(800)
    }

    fn set_layout_height(&mut self, height: u32) {
        println!("{:?} surface laid out at 800x{}", self.kind, height);
    }
}

struct ConsoleFrontend;

impl Frontend for ConsoleFrontend {
    type Engine = SyntheticEngine;
    type Surface = ConsoleSurface;

    fn create_engine(&mut self, storage_root: &Path) -> depthcam::Result<SyntheticEngine> {
        println!("Engine resources at {}", storage_root.display());
        Ok(SyntheticEngine {
            frame: 0,
            started: Instant::now(),
        })
    }

    fn create_surface(&mut self, kind: SurfaceKind) -> ConsoleSurface {
        ConsoleSurface {
            kind,
            pixels: Vec::new(),
            redraws: 0,
        }
    }
}

fn main() {
    env_logger::init();

    let run_for = std::env::args()
        .nth(1)
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(10));

    let config = SessionConfig::from_env();
    if let Some(bundle) = &config.bundle_dir {
        match depthcam::stage_resources(bundle, &config.storage_root) {
            Ok(n) => println!("Staged {} resource file(s)", n),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }

    let host = match RusbHost::new() {
        Ok(h) => Arc::new(h),
        Err(e) => {
            eprintln!("Failed to initialize libusb: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", depthcam::supported_cameras_notice());
    let mut session = Session::new(host.clone(), ConsoleFrontend, config);

    let hotplug = match HotplugMonitor::start(host.context().clone(), session.events()) {
        Ok(m) => Some(m),
        Err(e) => {
            println!("Hotplug monitoring disabled: {}", e);
            None
        }
    };

    if let Err(e) = session.acknowledge_supported_devices() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let start = Instant::now();
    while start.elapsed() < run_for {
        if let Err(e) = session.pump(Duration::from_millis(100)) {
            eprintln!("Session ended: {}", e);
            break;
        }
        session.layout_pass();
    }

    if session.state() != SessionState::Running && session.state() != SessionState::Terminated {
        println!("Gave up in state {:?}", session.state());
    }

    if let Err(e) = session.stop() {
        eprintln!("Error: {}", e);
    }
    if let Some(report) = session.loop_report() {
        println!(
            "Acquisition: {} iterations, {} faults, {:?}",
            report.iterations, report.faults, report.exit
        );
    }
    if let Some(monitor) = hotplug {
        monitor.stop();
    }
}
