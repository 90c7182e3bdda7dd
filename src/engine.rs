use crate::presentation::Surface;
use crate::types::Dimensions;
use crate::Result;
use std::path::Path;

/// The frame-processing library that turns sensor data into bitmaps.
///
/// Called from the acquisition thread while running, and once more from
/// the control thread for `cleanup` after that thread has exited.
pub trait ProcessingEngine: Send + 'static {
    /// Pull the latest frames from the sensors.
    fn update_data(&mut self) -> Result<()>;

    fn draw_bitmap(&mut self, depth: &mut dyn Surface, image: &mut dyn Surface) -> Result<()>;

    /// Current frame rate of the depth (`true`) or image stream.
    fn fps(&self, depth: bool) -> f32;

    fn depth_dimensions(&self) -> Dimensions;

    fn image_dimensions(&self) -> Dimensions;

    /// Release sensor resources. Called exactly once per session.
    fn cleanup(&mut self);
}

/// Host-side factory for the engine and its surfaces.
pub trait Frontend {
    type Engine: ProcessingEngine;
    type Surface: Surface;

    /// Build the engine over the staged resource tree at `storage_root`.
    fn create_engine(&mut self, storage_root: &Path) -> Result<Self::Engine>;

    fn create_surface(&mut self, kind: crate::presentation::SurfaceKind) -> Self::Surface;
}
