use crate::engine::Frontend;
use crate::types::Dimensions;

/// Which stream a surface displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Depth,
    Image,
}

/// A display target owned by the host UI.
pub trait Surface: Send + 'static {
    /// Size the backing bitmap to the frame dimensions.
    fn set_dimensions(&mut self, dimensions: Dimensions);

    /// Backing bitmap the engine draws into, one ARGB pixel per entry.
    fn bitmap_mut(&mut self) -> &mut [u32];

    /// Present the current bitmap with an FPS annotation.
    fn redraw(&mut self, fps: f32);

    /// On-screen width once the host has laid the surface out.
    fn rendered_width(&self) -> Option<u32>;

    fn set_layout_height(&mut self, height: u32);
}

/// The depth and image surfaces of one session.
pub struct Viewers<S> {
    pub depth: S,
    pub image: S,
    depth_dimensions: Dimensions,
    layout_done: bool,
}

impl<S: Surface> Viewers<S> {
    pub fn new<F>(frontend: &mut F, depth_dimensions: Dimensions, image_dimensions: Dimensions) -> Self
    where
        F: Frontend<Surface = S>,
    {
        let mut depth = frontend.create_surface(SurfaceKind::Depth);
        depth.set_dimensions(depth_dimensions);
        let mut image = frontend.create_surface(SurfaceKind::Image);
        image.set_dimensions(image_dimensions);

        Self {
            depth,
            image,
            depth_dimensions,
            layout_done: false,
        }
    }

    /// Fit the depth surface's height to its rendered width, keeping the
    /// frame's aspect ratio. Runs once, on the first pass that sees a width.
    pub fn layout_pass(&mut self) -> bool {
        if self.layout_done {
            return false;
        }
        let Some(width) = self.depth.rendered_width() else {
            return false;
        };

        let height = fit_height(width, self.depth_dimensions);
        log::debug!("Depth surface laid out at {}x{}", width, height);
        self.depth.set_layout_height(height);
        self.layout_done = true;
        true
    }
}

/// Height that keeps `frame`'s aspect ratio at `rendered_width`.
pub fn fit_height(rendered_width: u32, frame: Dimensions) -> u32 {
    if frame.width == 0 {
        return 0;
    }
    let ratio = rendered_width as f64 / frame.width as f64;
    (ratio * frame.height as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFrontend;

    #[test]
    fn test_fit_height() {
        assert_eq!(fit_height(1280, Dimensions::new(640, 480)), 960);
        assert_eq!(fit_height(320, Dimensions::new(640, 480)), 240);
        assert_eq!(fit_height(100, Dimensions::new(0, 480)), 0);
    }

    #[test]
    fn test_layout_pass_runs_once() {
        let mut frontend = MockFrontend::default();
        let mut viewers = Viewers::new(
            &mut frontend,
            Dimensions::new(640, 480),
            Dimensions::new(1280, 720),
        );
        assert_eq!(viewers.depth.kind, Some(SurfaceKind::Depth));
        assert_eq!(viewers.image.kind, Some(SurfaceKind::Image));
        assert_eq!(viewers.depth.dimensions, Some(Dimensions::new(640, 480)));
        assert_eq!(viewers.image.dimensions, Some(Dimensions::new(1280, 720)));

        // Not laid out by the host yet.
        assert!(!viewers.layout_pass());

        viewers.depth.rendered_width = Some(1080);
        assert!(viewers.layout_pass());
        assert_eq!(viewers.depth.layout_height, Some(810));

        viewers.depth.rendered_width = Some(540);
        assert!(!viewers.layout_pass());
        assert_eq!(viewers.depth.layout_height, Some(810));
    }
}
