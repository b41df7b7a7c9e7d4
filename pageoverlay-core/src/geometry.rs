use serde::{Deserialize, Serialize};

/// Maximum distance, in pixels, between a raster's actual size and
/// `native * magnification` before the viewport is considered inconsistent.
pub const VIEWPORT_TOLERANCE_PX: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    /// Returns `None` unless both sides are finite and strictly positive.
    pub fn known(width: f32, height: f32) -> Option<Self> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        (valid(width) && valid(height)).then_some(Self { width, height })
    }

    pub fn scaled(&self, magnification: f32) -> (f32, f32) {
        (self.width * magnification, self.height * magnification)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub page_number: usize,
    pub width: f32,
    pub height: f32,
    pub magnification: f32,
}

impl Viewport {
    pub fn new(page_number: usize, pixels: PixelSize, magnification: f32) -> Self {
        Self {
            page_number,
            width: pixels.width as f32,
            height: pixels.height as f32,
            magnification,
        }
    }

    /// Largest per-axis distance between the rendered size and the size the
    /// magnification predicts for `native`.
    pub fn deviation_from(&self, native: PageSize) -> f32 {
        let (expected_w, expected_h) = native.scaled(self.magnification);
        (self.width - expected_w)
            .abs()
            .max((self.height - expected_h).abs())
    }

    pub fn is_consistent_with(&self, native: PageSize) -> bool {
        self.deviation_from(native) <= VIEWPORT_TOLERANCE_PX + f32::EPSILON
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            left: x0.min(x1),
            top: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    pub fn is_degenerate(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Half-open containment: the right and bottom edges are outside.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right() && y >= self.top && y < self.bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelBounds {
    /// Snaps outward to whole pixels and clamps to `size`. Returns `None`
    /// when nothing of the rectangle is left on the raster.
    pub fn from_rect(rect: &Rect, size: PixelSize) -> Option<Self> {
        if size.is_empty() || !rect.is_finite() {
            return None;
        }

        let max_x = size.width as f32;
        let max_y = size.height as f32;
        let x0 = rect.left.floor().clamp(0.0, max_x);
        let x1 = rect.right().ceil().clamp(0.0, max_x);
        let y0 = rect.top.floor().clamp(0.0, max_y);
        let y1 = rect.bottom().ceil().clamp(0.0, max_y);

        if x1 - x0 <= 0.0 || y1 - y0 <= 0.0 {
            return None;
        }

        Some(Self {
            x0: x0 as u32,
            y0: y0 as u32,
            x1: x1 as u32,
            y1: y1 as u32,
        })
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_rejects_unknown_dimensions() {
        assert!(PageSize::known(612.0, 792.0).is_some());
        assert!(PageSize::known(0.0, 792.0).is_none());
        assert!(PageSize::known(612.0, f32::NAN).is_none());
        assert!(PageSize::known(-1.0, 10.0).is_none());
    }

    #[test]
    fn viewport_tolerates_one_pixel_of_rounding() {
        let native = PageSize::known(595.0, 842.0).unwrap();
        // 595 * 1.5 = 892.5, 842 * 1.5 = 1263
        let rounded = Viewport::new(1, PixelSize::new(893, 1263), 1.5);
        assert!(rounded.is_consistent_with(native));

        let off = Viewport::new(1, PixelSize::new(900, 1263), 1.5);
        assert!(!off.is_consistent_with(native));
    }

    #[test]
    fn rect_from_corners_normalizes_order() {
        let rect = Rect::from_corners(30.0, 40.0, 10.0, 5.0);
        assert_eq!(rect, Rect::new(10.0, 5.0, 20.0, 35.0));
    }

    #[test]
    fn rect_contains_is_half_open() {
        let rect = Rect::new(10.0, 10.0, 5.0, 5.0);
        assert!(rect.contains(10.0, 10.0));
        assert!(rect.contains(14.9, 14.9));
        assert!(!rect.contains(15.0, 12.0));
        assert!(!rect.contains(12.0, 9.9));
    }

    #[test]
    fn pixel_bounds_snap_outward_and_clamp() {
        let size = PixelSize::new(100, 50);
        let bounds = PixelBounds::from_rect(&Rect::new(10.4, 5.6, 20.2, 10.0), size).unwrap();
        assert_eq!(
            bounds,
            PixelBounds {
                x0: 10,
                y0: 5,
                x1: 31,
                y1: 16
            }
        );

        let clamped = PixelBounds::from_rect(&Rect::new(90.0, 40.0, 50.0, 50.0), size).unwrap();
        assert_eq!((clamped.x1, clamped.y1), (100, 50));

        assert!(PixelBounds::from_rect(&Rect::new(200.0, 0.0, 5.0, 5.0), size).is_none());
    }
}
