//! Overlay rendering: connector lines on an RGBA surface, blend-shape panel as text.

use crate::connectors::{ConnectorGroup, ConnectorStyle, Edge, Side, GROUPS};
use crate::tessellation;
use crate::types::{DetectionResult, FaceInstance, Landmark};
use image::{Rgba, RgbaImage};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("invalid color '{0}' (expected #RRGGBB or #RRGGBBAA)")]
    InvalidColor(String),
    #[error("failed to save surface: {0}")]
    Save(#[from] image::ImageError),
}

/// Parse a CSS hex color: `#RRGGBB` or `#RRGGBBAA`.
pub fn parse_hex_color(s: &str) -> Result<Rgba<u8>, OverlayError> {
    let invalid = || OverlayError::InvalidColor(s.to_string());
    let hex = s.strip_prefix('#').ok_or_else(invalid)?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

/// Colour per side plus a shared stroke width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub mesh: Rgba<u8>,
    pub left: Rgba<u8>,
    pub right: Rgba<u8>,
    pub contour: Rgba<u8>,
    pub line_width: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            mesh: Rgba([0xC0, 0xC0, 0xC0, 0x70]),
            left: Rgba([0x30, 0xFF, 0x30, 0xFF]),
            right: Rgba([0xFF, 0x30, 0x30, 0xFF]),
            contour: Rgba([0xE0, 0xE0, 0xE0, 0xFF]),
            line_width: 1,
        }
    }
}

impl OverlayStyle {
    /// Build a style from hex strings, e.g. from configuration.
    pub fn from_hex(
        mesh: &str,
        left: &str,
        right: &str,
        contour: &str,
        line_width: u32,
    ) -> Result<Self, OverlayError> {
        Ok(Self {
            mesh: parse_hex_color(mesh)?,
            left: parse_hex_color(left)?,
            right: parse_hex_color(right)?,
            contour: parse_hex_color(contour)?,
            line_width: line_width.max(1),
        })
    }

    fn for_side(&self, side: Side) -> ConnectorStyle {
        let color = match side {
            Side::Left => self.left,
            Side::Right => self.right,
            Side::Contour => self.contour,
            Side::Mesh => self.mesh,
        };
        let line_width = if side == Side::Mesh { 1 } else { self.line_width };
        ConnectorStyle { color, line_width }
    }
}

/// The drawing target, sized to match the video.
pub struct Surface {
    image: RgbaImage,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    /// Resize to the given dimensions. Like resizing a canvas, this clears
    /// the surface even when the dimensions are unchanged.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() == (width, height) {
            self.clear();
        } else {
            self.image = RgbaImage::new(width, height);
        }
    }

    pub fn clear(&mut self) {
        for px in self.image.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn save_png(&self, path: &Path) -> Result<(), OverlayError> {
        self.image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    /// Alpha-blend `color` over the pixel at (x, y); out-of-bounds is ignored.
    fn blend(&mut self, x: i64, y: i64, color: Rgba<u8>) {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return;
        }
        let dst = self.image.get_pixel_mut(x as u32, y as u32);
        let a = color[3] as u32;
        if a == 255 {
            *dst = color;
            return;
        }
        let inv = 255 - a;
        for c in 0..3 {
            dst[c] = ((color[c] as u32 * a + dst[c] as u32 * inv) / 255) as u8;
        }
        dst[3] = (a + dst[3] as u32 * inv / 255).min(255) as u8;
    }

    /// Draw a line segment with a square brush of `width` pixels.
    ///
    /// Endpoints are in pixel units and may lie anywhere, including far off
    /// the surface; the segment is clipped first so the walk only covers
    /// pixels the brush can reach.
    fn draw_line(&mut self, from: (f64, f64), to: (f64, f64), color: Rgba<u8>, width: u32) {
        if self.width() == 0 || self.height() == 0 {
            return;
        }
        let reach = width.max(1) as f64;
        let window = (
            -reach,
            -reach,
            self.width() as f64 - 1.0 + reach,
            self.height() as f64 - 1.0 + reach,
        );
        let Some((from, to)) = clip_segment(from, to, window) else {
            return;
        };
        let (mut x0, mut y0) = (from.0.round() as i64, from.1.round() as i64);
        let (x1, y1) = (to.0.round() as i64, to.1.round() as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let lo = -((width as i64 - 1) / 2);
        let hi = width as i64 / 2;

        loop {
            for oy in lo..=hi {
                for ox in lo..=hi {
                    self.blend(x0 + ox, y0 + oy, color);
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }
}

const OUT_LEFT: u8 = 1;
const OUT_RIGHT: u8 = 2;
const OUT_ABOVE: u8 = 4;
const OUT_BELOW: u8 = 8;

/// Cohen-Sutherland clip of a segment to `(xmin, ymin, xmax, ymax)`.
///
/// None when the segment misses the window or has a non-finite endpoint.
/// Each cut interpolates from the endpoint that stays, so a far-away
/// endpoint does not cost precision at the visible end.
fn clip_segment(
    from: (f64, f64),
    to: (f64, f64),
    (xmin, ymin, xmax, ymax): (f64, f64, f64, f64),
) -> Option<((f64, f64), (f64, f64))> {
    let finite = |(x, y): (f64, f64)| x.is_finite() && y.is_finite();
    if !finite(from) || !finite(to) {
        return None;
    }
    let outcode = |(x, y): (f64, f64)| {
        let mut code = 0;
        if x < xmin {
            code |= OUT_LEFT;
        } else if x > xmax {
            code |= OUT_RIGHT;
        }
        if y < ymin {
            code |= OUT_ABOVE;
        } else if y > ymax {
            code |= OUT_BELOW;
        }
        code
    };

    let (mut a, mut b) = (from, to);
    // Two cuts per endpoint, then one pass to accept or reject.
    for _ in 0..5 {
        let (ca, cb) = (outcode(a), outcode(b));
        if ca | cb == 0 {
            break;
        }
        if ca & cb != 0 {
            return None;
        }
        let (out, keep, code) = if ca != 0 { (a, b, ca) } else { (b, a, cb) };
        let at_x = |x: f64| (x, keep.1 + (out.1 - keep.1) * (x - keep.0) / (out.0 - keep.0));
        let at_y = |y: f64| (keep.0 + (out.0 - keep.0) * (y - keep.1) / (out.1 - keep.1), y);
        let cut = if code & OUT_LEFT != 0 {
            at_x(xmin)
        } else if code & OUT_RIGHT != 0 {
            at_x(xmax)
        } else if code & OUT_ABOVE != 0 {
            at_y(ymin)
        } else {
            at_y(ymax)
        };
        if ca != 0 {
            a = cut;
        } else {
            b = cut;
        }
    }

    let clamp = |(x, y): (f64, f64)| (x.clamp(xmin, xmax), y.clamp(ymin, ymax));
    let (a, b) = (clamp(a), clamp(b));
    (finite(a) && finite(b)).then_some((a, b))
}

/// One row of the blend-shape list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlendshapeRow {
    pub label: String,
    pub score: f32,
    /// Score to 4 decimal places, e.g. "0.8421".
    pub formatted: String,
}

/// The blend-shape list of the first face, in detector order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlendshapePanel {
    pub rows: Vec<BlendshapeRow>,
}

impl BlendshapePanel {
    pub fn from_result(result: &DetectionResult) -> Self {
        let rows = result
            .primary_blendshapes()
            .iter()
            .map(|c| BlendshapeRow {
                label: c.label().to_string(),
                score: c.score,
                formatted: format!("{:.4}", c.score),
            })
            .collect();
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as aligned text lines with a proportional bar of up to
    /// `bar_width` cells.
    pub fn to_text(&self, bar_width: usize) -> String {
        let label_width = self.rows.iter().map(|r| r.label.len()).max().unwrap_or(0);
        let mut out = String::new();
        for row in &self.rows {
            let filled = (row.score.clamp(0.0, 1.0) * bar_width as f32).round() as usize;
            let _ = writeln!(
                out,
                "{:<label_width$}  {:<bar_width$}  {}",
                row.label,
                "#".repeat(filled),
                row.formatted,
            );
        }
        out
    }
}

/// What one render call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    /// Connector groups drawn, summed over faces.
    pub groups_drawn: usize,
    pub segments_drawn: usize,
    pub panel: BlendshapePanel,
}

/// Draws detection results onto a [`Surface`].
pub struct OverlayRenderer {
    mesh: ConnectorStyle,
    groups: Vec<(ConnectorGroup, ConnectorStyle)>,
    mirror: bool,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle, mirror: bool) -> Self {
        let groups = GROUPS.iter().map(|g| (*g, style.for_side(g.side))).collect();
        Self {
            mesh: style.for_side(Side::Mesh),
            groups,
            mirror,
        }
    }

    /// Groups drawn for a complete face: the mesh plus every connector group.
    pub fn group_count(&self) -> usize {
        self.groups.len() + 1
    }

    /// Draw every face's mesh and connector groups, then build the
    /// blend-shape panel. Zero faces or no blend shapes leave that part empty.
    pub fn render(&self, surface: &mut Surface, result: &DetectionResult) -> RenderOutput {
        let mut output = RenderOutput::default();
        for face in &result.faces {
            let mesh = tessellation::tessellate(&face.landmarks);
            let drawn = self.draw_edges(surface, face, &mesh, &self.mesh);
            if drawn > 0 {
                output.groups_drawn += 1;
                output.segments_drawn += drawn;
            }
            for (group, style) in &self.groups {
                let drawn = self.draw_edges(surface, face, group.edges, style);
                if drawn > 0 {
                    output.groups_drawn += 1;
                    output.segments_drawn += drawn;
                }
            }
        }
        output.panel = BlendshapePanel::from_result(result);
        output
    }

    fn draw_edges(
        &self,
        surface: &mut Surface,
        face: &FaceInstance,
        edges: &[Edge],
        style: &ConnectorStyle,
    ) -> usize {
        let mut drawn = 0;
        for &(a, b) in edges {
            let (Some(pa), Some(pb)) = (face.landmarks.get(a as usize), face.landmarks.get(b as usize))
            else {
                continue;
            };
            let from = self.to_pixel(pa, surface);
            let to = self.to_pixel(pb, surface);
            surface.draw_line(from, to, style.color, style.line_width);
            drawn += 1;
        }
        drawn
    }

    fn to_pixel(&self, lm: &Landmark, surface: &Surface) -> (f64, f64) {
        let x = if self.mirror { 1.0 - lm.x } else { lm.x };
        (
            x as f64 * surface.width() as f64,
            lm.y as f64 * surface.height() as f64,
        )
    }
}
