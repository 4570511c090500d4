//! Geometry: search regions, detection boxes and repair rectangles.
//!
//! Detections arrive relative to the search region. [`resolve`] merges them
//! into one absolute box, grows it by the configured margins and clamps the
//! result to the image:
//!
//! - vertical: `round(core_height * height_expansion) + base_margin` on both sides
//! - [`RepairMode::BottomBar`]: `base_margin` to the left, then out to the right edge
//! - [`RepairMode::Boxed`]: `round(core_width * width_expansion / 2) + base_margin` on both sides

use serde::{Deserialize, Serialize};

use crate::config::{RepairConfig, RepairMode, SearchRatios};
use crate::error::{Error, Result};

/// Rectangle of the full image handed to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRegion {
    /// Left edge (inclusive).
    pub x_start: u32,
    /// Top edge (inclusive).
    pub y_start: u32,
    /// Right edge (exclusive).
    pub x_end: u32,
    /// Bottom edge (exclusive).
    pub y_end: u32,
}

impl SearchRegion {
    /// Apply search ratios to an image size, truncating to whole pixels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSearchRegion`] if the region is empty for
    /// this image size.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_ratios(ratios: &SearchRatios, width: u32, height: u32) -> Result<Self> {
        let scale = |ratio: f32, size: u32| -> u32 {
            ((f64::from(size) * f64::from(ratio)).floor().max(0.0) as u32).min(size)
        };
        let region = Self {
            x_start: scale(ratios.x0, width),
            y_start: scale(ratios.y0, height),
            x_end: scale(ratios.x1, width),
            y_end: scale(ratios.y1, height),
        };
        if region.x_start >= region.x_end || region.y_start >= region.y_end {
            return Err(Error::InvalidSearchRegion { width, height });
        }
        Ok(region)
    }

    /// Top-left corner in full-image coordinates.
    #[must_use]
    pub fn origin(&self) -> (u32, u32) {
        (self.x_start, self.y_start)
    }

    /// Region width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.x_end - self.x_start
    }

    /// Region height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.y_end - self.y_start
    }
}

/// One detector hit, relative to the search region it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    /// Left edge.
    pub x_min: f32,
    /// Top edge.
    pub y_min: f32,
    /// Right edge.
    pub x_max: f32,
    /// Bottom edge.
    pub y_max: f32,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

impl DetectionBox {
    /// Create a box with the given corners and confidence.
    #[must_use]
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32, confidence: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            confidence,
        }
    }

    fn is_finite(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Signed pixel bounds used while a rectangle is still being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    /// Left edge.
    pub x_start: i64,
    /// Top edge.
    pub y_start: i64,
    /// Right edge.
    pub x_end: i64,
    /// Bottom edge.
    pub y_end: i64,
}

impl Bounds {
    fn width(&self) -> i64 {
        self.x_end.saturating_sub(self.x_start)
    }

    fn height(&self) -> i64 {
        self.y_end.saturating_sub(self.y_start)
    }
}

/// Final rectangle whose pixels are replaced, in full-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairRectangle {
    /// Left edge (inclusive).
    pub x_start: u32,
    /// Top edge (inclusive).
    pub y_start: u32,
    /// Right edge (exclusive).
    pub x_end: u32,
    /// Bottom edge (exclusive).
    pub y_end: u32,
}

impl RepairRectangle {
    /// Rectangle width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.x_end.saturating_sub(self.x_start)
    }

    /// Rectangle height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.y_end.saturating_sub(self.y_start)
    }

    /// Whether the pixel `(x, y)` lies inside the rectangle.
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.x_start..self.x_end).contains(&x) && (self.y_start..self.y_end).contains(&y)
    }
}

impl TryFrom<Bounds> for RepairRectangle {
    type Error = Error;

    fn try_from(b: Bounds) -> Result<Self> {
        let invalid = || Error::InvalidRectangle {
            x_start: b.x_start,
            y_start: b.y_start,
            x_end: b.x_end,
            y_end: b.y_end,
        };
        if b.width() <= 0 || b.height() <= 0 {
            return Err(invalid());
        }
        let to_u32 = |v: i64| u32::try_from(v).map_err(|_| invalid());
        Ok(Self {
            x_start: to_u32(b.x_start)?,
            y_start: to_u32(b.y_start)?,
            x_end: to_u32(b.x_end)?,
            y_end: to_u32(b.y_end)?,
        })
    }
}

/// Union of all detections, translated into full-image coordinates.
///
/// Fractional coordinates are floored and out-of-range ones saturate. Boxes
/// with non-finite corners are ignored; `None` means nothing usable was
/// detected.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn absolute_core(boxes: &[DetectionBox], origin: (u32, u32)) -> Option<Bounds> {
    let (x_min, y_min, x_max, y_max) = boxes.iter().filter(|b| b.is_finite()).fold(
        None,
        |acc: Option<(f32, f32, f32, f32)>, b| {
            Some(match acc {
                None => (b.x_min, b.y_min, b.x_max, b.y_max),
                Some((x0, y0, x1, y1)) => (
                    x0.min(b.x_min),
                    y0.min(b.y_min),
                    x1.max(b.x_max),
                    y1.max(b.y_max),
                ),
            })
        },
    )?;

    let (ox, oy) = (i64::from(origin.0), i64::from(origin.1));
    Some(Bounds {
        x_start: (x_min.floor() as i64).saturating_add(ox),
        y_start: (y_min.floor() as i64).saturating_add(oy),
        x_end: (x_max.floor() as i64).saturating_add(ox),
        y_end: (y_max.floor() as i64).saturating_add(oy),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn scaled_margin(extent: i64, ratio: f32) -> i64 {
    (extent.max(0) as f64 * f64::from(ratio)).round() as i64
}

/// Grow an absolute core box by the configured margins and clamp it to the
/// image. The result may still be degenerate.
#[must_use]
pub fn expand(core: Bounds, image_size: (u32, u32), config: &RepairConfig) -> Bounds {
    let (w, h) = (i64::from(image_size.0), i64::from(image_size.1));
    let base = i64::from(config.base_margin);

    let pad_y = scaled_margin(core.height(), config.height_expansion).saturating_add(base);
    let y_start = core.y_start.saturating_sub(pad_y).clamp(0, h);
    let y_end = core.y_end.saturating_add(pad_y).clamp(0, h);

    let (x_start, x_end) = match config.mode {
        RepairMode::BottomBar => (core.x_start.saturating_sub(base).clamp(0, w), w),
        RepairMode::Boxed => {
            let pad_x = scaled_margin(core.width(), config.width_expansion / 2.0)
                .saturating_add(base);
            (
                core.x_start.saturating_sub(pad_x).clamp(0, w),
                core.x_end.saturating_add(pad_x).clamp(0, w),
            )
        }
    };

    Bounds {
        x_start,
        y_start,
        x_end,
        y_end,
    }
}

/// Turn detector boxes into the rectangle to repair.
///
/// # Errors
///
/// - [`Error::NoDetection`] if `boxes` holds no usable detection.
/// - [`Error::InvalidRectangle`] if the clamped rectangle has no area.
pub fn resolve(
    boxes: &[DetectionBox],
    search_origin: (u32, u32),
    image_size: (u32, u32),
    config: &RepairConfig,
) -> Result<RepairRectangle> {
    let core = absolute_core(boxes, search_origin).ok_or(Error::NoDetection {
        threshold: config.confidence_threshold,
    })?;
    if boxes.len() > 1 {
        tracing::debug!(count = boxes.len(), ?core, "merged detections into one region");
    }

    let expanded = expand(core, image_size, config);
    tracing::debug!(?core, ?expanded, mode = %config.mode, "resolved repair rectangle");
    RepairRectangle::try_from(expanded)
}
