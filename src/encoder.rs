//! Format-preserving re-encoding of repaired images.
//!
//! Lossless containers (PNG, WebP, BMP, TIFF) are written back losslessly in
//! their own format with any alpha channel intact. Everything else goes
//! through JPEG at [`JPEG_QUALITY`].

use std::fmt;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat};

use crate::error::{Error, Result};
use crate::raster::Raster;

/// Quality used for every lossy re-encode.
pub const JPEG_QUALITY: u8 = 98;

/// Container format of an encoded image, as sniffed from its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// PNG.
    Png,
    /// WebP.
    WebP,
    /// BMP.
    Bmp,
    /// TIFF.
    Tiff,
    /// JPEG.
    Jpeg,
    /// Any other format `image` can decode.
    Other(ImageFormat),
}

impl ContainerFormat {
    /// Whether this format is re-encoded losslessly (and may carry alpha).
    #[must_use]
    pub fn is_lossless(self) -> bool {
        matches!(self, Self::Png | Self::WebP | Self::Bmp | Self::Tiff)
    }
}

impl From<ImageFormat> for ContainerFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Png => Self::Png,
            ImageFormat::WebP => Self::WebP,
            ImageFormat::Bmp => Self::Bmp,
            ImageFormat::Tiff => Self::Tiff,
            ImageFormat::Jpeg => Self::Jpeg,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => f.write_str("png"),
            Self::WebP => f.write_str("webp"),
            Self::Bmp => f.write_str("bmp"),
            Self::Tiff => f.write_str("tiff"),
            Self::Jpeg => f.write_str("jpeg"),
            Self::Other(format) => write!(f, "{}", format!("{format:?}").to_lowercase()),
        }
    }
}

/// How a repaired image was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Re-encoded losslessly in the original container format.
    Lossless(ContainerFormat),
    /// Re-encoded as JPEG at the given quality.
    Lossy {
        /// JPEG quality (1-100).
        quality: u8,
    },
}

impl fmt::Display for EncodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lossless(format) => write!(f, "lossless {format}"),
            Self::Lossy { quality } => write!(f, "jpeg q{quality}"),
        }
    }
}

/// Encoded output bytes plus the path that produced them.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Encoded image file.
    pub bytes: Vec<u8>,
    /// Encoding path taken.
    pub mode: EncodeMode,
}

/// Identify the container format from magic bytes, without decoding pixels.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the bytes match no known format.
pub fn sniff_format(bytes: &[u8]) -> Result<ContainerFormat> {
    image::guess_format(bytes)
        .map(ContainerFormat::from)
        .map_err(|e| Error::Decode(e.to_string()))
}

/// Serialize a repaired image according to its original container format.
///
/// # Errors
///
/// Returns [`Error::Encode`] if the encoder rejects the image.
pub fn encode(image: Raster, original_format: ContainerFormat) -> Result<Encoded> {
    let img = image.into_dynamic();
    let mut buf = Cursor::new(Vec::new());

    let mode = match original_format {
        ContainerFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, FilterType::NoFilter);
            img.write_with_encoder(encoder).map_err(Error::Encode)?;
            EncodeMode::Lossless(original_format)
        }
        ContainerFormat::WebP => {
            img.write_with_encoder(WebPEncoder::new_lossless(&mut buf))
                .map_err(Error::Encode)?;
            EncodeMode::Lossless(original_format)
        }
        ContainerFormat::Bmp | ContainerFormat::Tiff => {
            let format = if original_format == ContainerFormat::Bmp {
                ImageFormat::Bmp
            } else {
                ImageFormat::Tiff
            };
            img.write_to(&mut buf, format).map_err(Error::Encode)?;
            EncodeMode::Lossless(original_format)
        }
        ContainerFormat::Jpeg | ContainerFormat::Other(_) => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.into_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
            rgb.write_with_encoder(encoder).map_err(Error::Encode)?;
            EncodeMode::Lossy {
                quality: JPEG_QUALITY,
            }
        }
    };

    Ok(Encoded {
        bytes: buf.into_inner(),
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn gradient_rgba(w: u32, h: u32) -> RgbaImage {
        let mut img = RgbaImage::new(w, h);
        for (x, y, px) in img.enumerate_pixels_mut() {
            #[allow(clippy::cast_possible_truncation)]
            {
                *px = Rgba([(x * 13) as u8, (y * 7) as u8, 90, (x * y) as u8]);
            }
        }
        img
    }

    #[test]
    fn sniff_detects_formats_from_magic_bytes() {
        let png = encode(Raster::Rgb(RgbImage::new(4, 4)), ContainerFormat::Png).unwrap();
        assert_eq!(sniff_format(&png.bytes).unwrap(), ContainerFormat::Png);

        let jpeg = encode(Raster::Rgb(RgbImage::new(4, 4)), ContainerFormat::Jpeg).unwrap();
        assert_eq!(sniff_format(&jpeg.bytes).unwrap(), ContainerFormat::Jpeg);

        assert!(matches!(sniff_format(b"nope"), Err(Error::Decode(_))));
    }

    #[test]
    fn png_round_trip_preserves_pixels_and_alpha() {
        let original = gradient_rgba(16, 12);
        let encoded = encode(Raster::Rgba(original.clone()), ContainerFormat::Png).unwrap();
        assert_eq!(encoded.mode, EncodeMode::Lossless(ContainerFormat::Png));

        let decoded = Raster::decode(&encoded.bytes).unwrap();
        assert_eq!(decoded, Raster::Rgba(original));
    }

    #[test]
    fn webp_round_trip_is_lossless() {
        let original = gradient_rgba(9, 9);
        let encoded = encode(Raster::Rgba(original.clone()), ContainerFormat::WebP).unwrap();
        assert_eq!(sniff_format(&encoded.bytes).unwrap(), ContainerFormat::WebP);
        assert_eq!(Raster::decode(&encoded.bytes).unwrap(), Raster::Rgba(original));
    }

    #[test]
    fn bmp_stays_bmp() {
        let img = RgbImage::from_pixel(5, 3, Rgb([1, 2, 3]));
        let encoded = encode(Raster::Rgb(img.clone()), ContainerFormat::Bmp).unwrap();
        assert_eq!(encoded.mode, EncodeMode::Lossless(ContainerFormat::Bmp));
        assert_eq!(Raster::decode(&encoded.bytes).unwrap(), Raster::Rgb(img));
    }

    #[test]
    fn jpeg_path_drops_alpha() {
        let encoded = encode(Raster::Rgba(gradient_rgba(8, 8)), ContainerFormat::Jpeg).unwrap();
        assert_eq!(encoded.mode, EncodeMode::Lossy { quality: 98 });
        let decoded = Raster::decode(&encoded.bytes).unwrap();
        assert!(!decoded.has_alpha());
        assert_eq!(decoded.dimensions(), (8, 8));
    }

    #[test]
    fn unknown_formats_fall_back_to_jpeg() {
        let encoded = encode(
            Raster::Rgb(RgbImage::new(3, 3)),
            ContainerFormat::Other(ImageFormat::Gif),
        )
        .unwrap();
        assert_eq!(sniff_format(&encoded.bytes).unwrap(), ContainerFormat::Jpeg);
    }

    #[test]
    fn encode_mode_notes() {
        assert_eq!(
            EncodeMode::Lossless(ContainerFormat::Png).to_string(),
            "lossless png"
        );
        assert_eq!(EncodeMode::Lossy { quality: 98 }.to_string(), "jpeg q98");
        assert_eq!(ContainerFormat::Other(ImageFormat::Gif).to_string(), "gif");
    }
}
