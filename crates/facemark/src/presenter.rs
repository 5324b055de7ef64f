//! Overlay target backed by an in-memory surface.
//!
//! The surface has no window behind it. Renders are made visible by writing
//! periodic PNG snapshots and logging the blend-shape panel.

use crate::detection_loop::OverlayTarget;
use facemark_core::overlay::RenderOutput;
use facemark_core::{DetectionResult, OverlayRenderer, Surface};
use std::path::PathBuf;

const PANEL_BAR_WIDTH: usize = 20;

pub struct CanvasPresenter {
    surface: Surface,
    renderer: OverlayRenderer,
    snapshot_path: Option<PathBuf>,
    snapshot_every: u64,
    panel_every: u64,
    renders: u64,
    last: RenderOutput,
}

impl CanvasPresenter {
    pub fn new(renderer: OverlayRenderer) -> Self {
        Self {
            surface: Surface::new(0, 0),
            renderer,
            snapshot_path: None,
            snapshot_every: 0,
            panel_every: 0,
            renders: 0,
            last: RenderOutput::default(),
        }
    }

    /// Save the surface to `path` every `every` renders (0 disables).
    pub fn with_snapshots(mut self, path: Option<PathBuf>, every: u64) -> Self {
        self.snapshot_path = path;
        self.snapshot_every = every;
        self
    }

    /// Log the blend-shape panel every `every` renders (0 disables).
    pub fn with_panel_log(mut self, every: u64) -> Self {
        self.panel_every = every;
        self
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }

    pub fn last_output(&self) -> &RenderOutput {
        &self.last
    }

    fn due(&self, every: u64) -> bool {
        every > 0 && self.renders % every == 0
    }
}

impl OverlayTarget for CanvasPresenter {
    fn resize(&mut self, width: u32, height: u32) {
        self.surface.resize(width, height);
    }

    fn render(&mut self, result: &DetectionResult) {
        self.last = self.renderer.render(&mut self.surface, result);
        self.renders += 1;
        tracing::trace!(
            faces = result.faces.len(),
            segments = self.last.segments_drawn,
            "overlay rendered"
        );

        if self.due(self.panel_every) && !self.last.panel.is_empty() {
            tracing::info!("blend shapes:\n{}", self.last.panel.to_text(PANEL_BAR_WIDTH));
        }

        if let Some(path) = &self.snapshot_path {
            if self.due(self.snapshot_every) {
                match self.surface.save_png(path) {
                    Ok(()) => tracing::debug!(path = %path.display(), "snapshot written"),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "snapshot failed"),
                }
            }
        }
    }
}
