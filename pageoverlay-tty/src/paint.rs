use pageoverlay_core::{ElementId, OverlayBox, PixelBounds, RasterImage};

/// RGBA colours for one kind of box. Fill alpha is blended, outline is
/// drawn opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxStyle {
    pub fill: [u8; 4],
    pub outline: [u8; 4],
    pub thickness: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayPalette {
    pub plain: BoxStyle,
    pub matched: BoxStyle,
    pub highlighted: BoxStyle,
}

impl Default for OverlayPalette {
    fn default() -> Self {
        Self {
            plain: BoxStyle {
                fill: [0, 0, 0, 0],
                outline: [120, 144, 156, 255],
                thickness: 1,
            },
            matched: BoxStyle {
                fill: [255, 214, 0, 56],
                outline: [245, 166, 35, 255],
                thickness: 2,
            },
            highlighted: BoxStyle {
                fill: [41, 121, 255, 72],
                outline: [21, 101, 192, 255],
                thickness: 3,
            },
        }
    }
}

impl OverlayPalette {
    pub fn style_for(&self, overlay: &OverlayBox, highlighted: Option<&ElementId>) -> &BoxStyle {
        if highlighted == Some(&overlay.element_id) {
            &self.highlighted
        } else if overlay.matched {
            &self.matched
        } else {
            &self.plain
        }
    }
}

/// Returns the raster with every box painted on it. Plain boxes go first and
/// the highlighted box last so it is never covered.
pub fn composite(
    raster: &RasterImage,
    boxes: &[OverlayBox],
    highlighted: Option<&ElementId>,
    palette: &OverlayPalette,
) -> RasterImage {
    let mut canvas = raster.clone();
    let mut ordered: Vec<&OverlayBox> = boxes.iter().collect();
    ordered.sort_by_key(|overlay| {
        if highlighted == Some(&overlay.element_id) {
            2
        } else if overlay.matched {
            1
        } else {
            0
        }
    });

    for overlay in ordered {
        let Some(bounds) = PixelBounds::from_rect(&overlay.rect, canvas.size()) else {
            continue;
        };
        let style = palette.style_for(overlay, highlighted);
        if style.fill[3] > 0 {
            fill_rect(&mut canvas, bounds, style.fill);
        }
        outline_rect(&mut canvas, bounds, style.outline, style.thickness);
    }
    canvas
}

fn fill_rect(canvas: &mut RasterImage, bounds: PixelBounds, colour: [u8; 4]) {
    for y in bounds.y0..bounds.y1 {
        for x in bounds.x0..bounds.x1 {
            blend_pixel(canvas, x, y, colour);
        }
    }
}

fn outline_rect(canvas: &mut RasterImage, bounds: PixelBounds, colour: [u8; 4], thickness: u32) {
    let t_x = thickness.min(bounds.width().div_ceil(2));
    let t_y = thickness.min(bounds.height().div_ceil(2));
    for y in bounds.y0..bounds.y1 {
        let on_edge_row = y < bounds.y0 + t_y || y >= bounds.y1 - t_y;
        for x in bounds.x0..bounds.x1 {
            if on_edge_row || x < bounds.x0 + t_x || x >= bounds.x1 - t_x {
                blend_pixel(canvas, x, y, colour);
            }
        }
    }
}

fn blend_pixel(canvas: &mut RasterImage, x: u32, y: u32, colour: [u8; 4]) {
    let index = (y as usize * canvas.width as usize + x as usize) * 4;
    let Some(pixel) = canvas.pixels.get_mut(index..index + 4) else {
        return;
    };
    let alpha = colour[3] as u32;
    for channel in 0..3 {
        let under = pixel[channel] as u32;
        pixel[channel] = ((colour[channel] as u32 * alpha + under * (255 - alpha)) / 255) as u8;
    }
    pixel[3] = pixel[3].max(colour[3]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageoverlay_core::Rect;

    fn white(width: u32, height: u32) -> RasterImage {
        RasterImage {
            width,
            height,
            pixels: vec![255; (width * height * 4) as usize],
        }
    }

    fn pixel(image: &RasterImage, x: u32, y: u32) -> [u8; 4] {
        let index = ((y * image.width + x) * 4) as usize;
        image.pixels[index..index + 4].try_into().unwrap()
    }

    fn overlay(id: &str, rect: Rect, matched: bool) -> OverlayBox {
        OverlayBox {
            element_id: id.into(),
            page_number: 1,
            rect,
            matched,
        }
    }

    #[test]
    fn plain_boxes_are_outlined_only() {
        let raster = white(20, 20);
        let palette = OverlayPalette::default();
        let painted = composite(
            &raster,
            &[overlay("a", Rect::new(5.0, 5.0, 10.0, 10.0), false)],
            None,
            &palette,
        );

        assert_eq!(pixel(&painted, 5, 5), palette.plain.outline);
        assert_eq!(pixel(&painted, 14, 10), palette.plain.outline);
        assert_eq!(pixel(&painted, 10, 10), [255; 4]);
        assert_eq!(pixel(&painted, 4, 4), [255; 4]);
        assert_eq!(pixel(&painted, 15, 15), [255; 4]);
        assert_eq!(pixel(&raster, 5, 5), [255; 4]);
    }

    #[test]
    fn matched_boxes_are_tinted() {
        let palette = OverlayPalette::default();
        let painted = composite(
            &white(20, 20),
            &[overlay("m", Rect::new(0.0, 0.0, 20.0, 20.0), true)],
            None,
            &palette,
        );
        let inside = pixel(&painted, 10, 10);
        assert_ne!(inside, [255; 4]);
        assert_eq!(inside[0], 255);
        assert!(inside[2] < 255);
    }

    #[test]
    fn highlighted_box_is_painted_last() {
        let palette = OverlayPalette::default();
        let shared = Rect::new(2.0, 2.0, 8.0, 8.0);
        let target: ElementId = "hl".into();
        let painted = composite(
            &white(12, 12),
            &[overlay("hl", shared, true), overlay("other", shared, true)],
            Some(&target),
            &palette,
        );
        assert_eq!(pixel(&painted, 2, 2), palette.highlighted.outline);
    }

    #[test]
    fn boxes_past_the_edge_are_clamped() {
        let palette = OverlayPalette::default();
        let painted = composite(
            &white(10, 10),
            &[
                overlay("edge", Rect::new(6.0, 6.0, 50.0, 50.0), false),
                overlay("off", Rect::new(40.0, 40.0, 5.0, 5.0), false),
            ],
            None,
            &palette,
        );
        assert_eq!(pixel(&painted, 9, 9), palette.plain.outline);
        assert_eq!(painted.pixels.len(), 10 * 10 * 4);
    }
}
