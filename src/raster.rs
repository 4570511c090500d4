//! Decoded 8-bit rasters with three or four channels.

use image::{DynamicImage, RgbImage, RgbaImage};

use crate::error::{Error, Result};
use crate::region::SearchRegion;

/// A decoded image, owned by whichever pipeline stage currently holds it.
#[derive(Debug, Clone, PartialEq)]
pub enum Raster {
    /// Three-channel image.
    Rgb(RgbImage),
    /// Four-channel image with alpha.
    Rgba(RgbaImage),
}

impl Raster {
    /// Decode encoded image bytes.
    ///
    /// Images with an alpha channel keep it; everything else becomes RGB.
    /// Higher bit depths are reduced to 8 bits per channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the bytes are not a readable image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Self::from_dynamic(img))
    }

    /// Normalize any decoded image into a three- or four-channel raster.
    #[must_use]
    pub fn from_dynamic(img: DynamicImage) -> Self {
        if img.color().has_alpha() {
            Self::Rgba(img.into_rgba8())
        } else {
            Self::Rgb(img.into_rgb8())
        }
    }

    /// Convert back into a [`DynamicImage`] for encoding.
    #[must_use]
    pub fn into_dynamic(self) -> DynamicImage {
        match self {
            Self::Rgb(img) => DynamicImage::ImageRgb8(img),
            Self::Rgba(img) => DynamicImage::ImageRgba8(img),
        }
    }

    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Rgb(img) => img.width(),
            Self::Rgba(img) => img.width(),
        }
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        match self {
            Self::Rgb(img) => img.height(),
            Self::Rgba(img) => img.height(),
        }
    }

    /// `(width, height)` in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Number of channels: 3 or 4.
    #[must_use]
    pub fn channels(&self) -> u8 {
        match self {
            Self::Rgb(_) => 3,
            Self::Rgba(_) => 4,
        }
    }

    /// Whether the raster carries an alpha channel.
    #[must_use]
    pub fn has_alpha(&self) -> bool {
        matches!(self, Self::Rgba(_))
    }

    /// Copy out the pixels inside a search region.
    #[must_use]
    pub fn crop(&self, region: &SearchRegion) -> Self {
        let (x, y, w, h) = (region.x_start, region.y_start, region.width(), region.height());
        match self {
            Self::Rgb(img) => Self::Rgb(image::imageops::crop_imm(img, x, y, w, h).to_image()),
            Self::Rgba(img) => Self::Rgba(image::imageops::crop_imm(img, x, y, w, h).to_image()),
        }
    }
}
