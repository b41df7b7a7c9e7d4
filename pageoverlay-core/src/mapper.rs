use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{PageSize, PixelSize, Rect, Viewport};

/// Rounding allowed on each raster side when checking that both axes share
/// one unit-to-pixel scale.
pub const AXIS_TOLERANCE_PX: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRegion {
    pub bbox: [f32; 4],
    pub reference: PixelSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitRegion {
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    TopLeftPixels(PixelRegion),
    BottomLeftUnits(UnitRegion),
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Unmappable {
    #[error("native page size is unknown")]
    MissingNativeSize,
    #[error("reference raster {width}x{height} has no area")]
    DegenerateReference { width: u32, height: u32 },
    #[error("viewport has no area")]
    DegenerateViewport,
    #[error("horizontal scale {horizontal} and vertical scale {vertical} disagree")]
    AxisScaleMismatch { horizontal: f32, vertical: f32 },
    #[error("region contains non-finite coordinates")]
    NonFinite,
    #[error("region maps to an empty rectangle")]
    Empty,
}

pub fn map_to_viewport(
    region: &Region,
    native: Option<PageSize>,
    viewport: &Viewport,
) -> Option<Rect> {
    try_map_to_viewport(region, native, viewport).ok()
}

pub fn try_map_to_viewport(
    region: &Region,
    native: Option<PageSize>,
    viewport: &Viewport,
) -> Result<Rect, Unmappable> {
    if !(viewport.width > 0.0 && viewport.height > 0.0) {
        return Err(Unmappable::DegenerateViewport);
    }

    let rect = match region {
        Region::TopLeftPixels(region) => map_top_left(region, viewport)?,
        Region::BottomLeftUnits(region) => {
            let native = native.ok_or(Unmappable::MissingNativeSize)?;
            map_bottom_left(region, native, viewport)?
        }
    };

    if !rect.is_finite() {
        return Err(Unmappable::NonFinite);
    }
    if rect.is_degenerate() {
        return Err(Unmappable::Empty);
    }
    Ok(rect)
}

fn map_top_left(region: &PixelRegion, viewport: &Viewport) -> Result<Rect, Unmappable> {
    let reference = region.reference;
    if reference.is_empty() {
        return Err(Unmappable::DegenerateReference {
            width: reference.width,
            height: reference.height,
        });
    }
    check_finite(&region.bbox)?;

    let scale_x = viewport.width / reference.width as f32;
    let scale_y = viewport.height / reference.height as f32;
    let [x0, y0, x1, y1] = region.bbox;

    Ok(Rect::from_corners(
        x0 * scale_x,
        y0 * scale_y,
        x1 * scale_x,
        y1 * scale_y,
    ))
}

fn map_bottom_left(
    region: &UnitRegion,
    native: PageSize,
    viewport: &Viewport,
) -> Result<Rect, Unmappable> {
    check_finite(&region.bbox)?;

    let horizontal = viewport.width / native.width;
    let vertical = viewport.height / native.height;
    if !share_scale(viewport, native) {
        return Err(Unmappable::AxisScaleMismatch {
            horizontal,
            vertical,
        });
    }

    let points_to_pixels = horizontal;
    let [x0, y0, x1, y1] = region.bbox;
    let top_px = (native.height - y1) * points_to_pixels;
    let bottom_px = (native.height - y0) * points_to_pixels;

    Ok(Rect::from_corners(
        x0 * points_to_pixels,
        top_px,
        x1 * points_to_pixels,
        bottom_px,
    ))
}

// True when a single scale puts both sides within the rounding allowance
// of the raster, i.e. the per-axis scale intervals overlap.
fn share_scale(viewport: &Viewport, native: PageSize) -> bool {
    let slack = AXIS_TOLERANCE_PX + 1e-3;
    let low = ((viewport.width - slack) / native.width)
        .max((viewport.height - slack) / native.height);
    let high = ((viewport.width + slack) / native.width)
        .min((viewport.height + slack) / native.height);
    low <= high
}

fn check_finite(bbox: &[f32; 4]) -> Result<(), Unmappable> {
    if bbox.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(Unmappable::NonFinite)
    }
}
