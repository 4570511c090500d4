//! Error types for the watermark-patch-repair crate.

use std::time::Duration;

use crate::config::RepairMode;

/// Errors that can occur while repairing watermarked images.
///
/// Variants for which [`Error::is_per_pair`] returns `true` are recovered by
/// the batch orchestrator and turned into report lines; the rest abort the
/// batch before any pair is processed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Image bytes could not be sniffed or decoded.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// An entry could not be read from the input container.
    #[error("failed to read entry {name}: {reason}")]
    ReadEntry {
        /// Entry name inside the container.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// The configured search ratios collapse to an empty region for this image.
    #[error("search region is empty for a {width}x{height} image")]
    InvalidSearchRegion {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },

    /// The detector returned no box above the confidence threshold.
    #[error("no watermark detected above confidence {threshold}")]
    NoDetection {
        /// Confidence threshold in effect.
        threshold: f32,
    },

    /// The detector failed to produce boxes.
    #[error("detector failed: {0}")]
    Detector(String),

    /// The detector did not answer in time.
    #[error("detector timed out after {0:?}")]
    DetectorTimeout(Duration),

    /// The expanded and clamped repair rectangle has no area.
    #[error("repair rectangle ({x_start},{y_start})-({x_end},{y_end}) is degenerate")]
    InvalidRectangle {
        /// Left edge after clamping.
        x_start: i64,
        /// Top edge after clamping.
        y_start: i64,
        /// Right edge after clamping.
        x_end: i64,
        /// Bottom edge after clamping.
        y_end: i64,
    },

    /// The patch cut from the resampled source has zero width or height.
    #[error("repair patch is empty ({width}x{height})")]
    EmptyPatch {
        /// Patch width in pixels.
        width: u32,
        /// Patch height in pixels.
        height: u32,
    },

    /// The repaired image could not be re-encoded.
    #[error("failed to encode repaired image: {0}")]
    Encode(image::ImageError),

    /// No `<id>-wm` / `<id>-orig` pair exists in the input container.
    #[error("no image pairs found (expected entries like 'id-wm.jpg' and 'id-orig.jpg')")]
    NoPairsFound,

    /// No detector is registered for the requested mode.
    #[error("no detector registered for {0} mode")]
    DetectorUnavailable(RepairMode),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file is not valid TOML for this crate.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The zip container could not be read or written.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An error occurred during image processing outside a single pair.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Whether this failure only concerns the pair being processed.
    #[must_use]
    pub fn is_per_pair(&self) -> bool {
        matches!(
            self,
            Self::Decode(_)
                | Self::ReadEntry { .. }
                | Self::InvalidSearchRegion { .. }
                | Self::NoDetection { .. }
                | Self::Detector(_)
                | Self::DetectorTimeout(_)
                | Self::InvalidRectangle { .. }
                | Self::EmptyPatch { .. }
                | Self::Encode(_)
        )
    }

    /// Short reason used in batch report lines.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode error",
            Self::ReadEntry { .. } => "read error",
            Self::InvalidSearchRegion { .. } => "invalid search region",
            Self::NoDetection { .. } => "no watermark detected",
            Self::Detector(_) => "detector error",
            Self::DetectorTimeout(_) => "detector timeout",
            Self::InvalidRectangle { .. } => "invalid repair rectangle",
            Self::EmptyPatch { .. } => "empty repair patch",
            Self::Encode(_) => "encode error",
            Self::NoPairsFound => "no pairs found",
            Self::DetectorUnavailable(_) => "detector unavailable",
            Self::InvalidConfig(_) | Self::ConfigParse(_) => "configuration error",
            Self::Io(_) => "I/O error",
            Self::Zip(_) => "archive error",
            Self::Image(_) => "image error",
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unavailable = Error::DetectorUnavailable(RepairMode::Boxed);
        assert!(unavailable.to_string().contains("boxed"));

        let rect = Error::InvalidRectangle {
            x_start: 10,
            y_start: 100,
            x_end: 20,
            y_end: 100,
        };
        let msg = rect.to_string();
        assert!(msg.contains("(10,100)-(20,100)"));
    }

    #[test]
    fn per_pair_errors_are_distinguished_from_fatal_ones() {
        assert!(Error::Decode("bad".into()).is_per_pair());
        assert!(Error::NoDetection { threshold: 0.5 }.is_per_pair());
        assert!(Error::EmptyPatch {
            width: 0,
            height: 3
        }
        .is_per_pair());
        assert!(Error::DetectorTimeout(Duration::from_secs(1)).is_per_pair());

        assert!(!Error::NoPairsFound.is_per_pair());
        assert!(!Error::DetectorUnavailable(RepairMode::BottomBar).is_per_pair());
        assert!(!Error::InvalidConfig("x".into()).is_per_pair());
    }

    #[test]
    fn reasons_are_short() {
        assert_eq!(Error::Decode("truncated".into()).reason(), "decode error");
        assert_eq!(
            Error::NoDetection { threshold: 0.5 }.reason(),
            "no watermark detected"
        );
    }
}
