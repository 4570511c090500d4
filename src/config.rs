//! Repair configuration and TOML configuration files.
//!
//! A [`RepairConfig`] is built once per run, either from the per-mode
//! defaults or from a [`FileConfig`], and passed by reference to every stage.
//!
//! # Example Configuration
//!
//! ```toml
//! mode = "boxed"
//! confidence_threshold = 0.5
//! search_region = [0.0, 0.5, 1.0, 1.0]
//! width_expansion = 0.2
//! height_expansion = 0.1
//! base_margin = 5
//!
//! [detectors.boxed]
//! kind = "command"
//! program = "python3"
//! args = ["detect.py", "--weights", "boxed.pt"]
//! timeout_secs = 30
//!
//! [detectors.bottom-bar]
//! kind = "fixed"
//! region = [0.0, 0.6, 1.0, 1.0]
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::detector::DetectorSpec;
use crate::error::{Error, Result};

/// Default fixed margin added around every detection, in pixels.
pub const DEFAULT_BASE_MARGIN: u32 = 5;

/// Default detector confidence threshold.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Watermark style being repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum RepairMode {
    /// Full-width banner along the bottom of the image; the repair runs to
    /// the right edge.
    BottomBar,
    /// Localized mark; the repair expands symmetrically around the detection.
    Boxed,
}

impl fmt::Display for RepairMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BottomBar => f.write_str("bottom-bar"),
            Self::Boxed => f.write_str("boxed"),
        }
    }
}

/// Search region as fractions of the image size: `(x0, y0, x1, y1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRatios {
    /// Left edge ratio.
    pub x0: f32,
    /// Top edge ratio.
    pub y0: f32,
    /// Right edge ratio.
    pub x1: f32,
    /// Bottom edge ratio.
    pub y1: f32,
}

impl SearchRatios {
    /// The bottom half of the image.
    pub const BOTTOM_HALF: Self = Self {
        x0: 0.0,
        y0: 0.5,
        x1: 1.0,
        y1: 1.0,
    };

    /// The whole image.
    pub const FULL: Self = Self {
        x0: 0.0,
        y0: 0.0,
        x1: 1.0,
        y1: 1.0,
    };

    fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if ![self.x0, self.y0, self.x1, self.y1].into_iter().all(in_unit) {
            return Err(Error::InvalidConfig(format!(
                "search region ratios must lie in [0, 1], got {self:?}"
            )));
        }
        if self.x0 >= self.x1 || self.y0 >= self.y1 {
            return Err(Error::InvalidConfig(format!(
                "search region must satisfy x0 < x1 and y0 < y1, got {self:?}"
            )));
        }
        Ok(())
    }
}

impl From<[f32; 4]> for SearchRatios {
    fn from([x0, y0, x1, y1]: [f32; 4]) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// Options controlling how a watermark region is located and repaired.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairConfig {
    /// Watermark style, which selects the detector and the horizontal policy.
    pub mode: RepairMode,
    /// Minimum detector confidence (0.0-1.0).
    pub confidence_threshold: f32,
    /// Sub-rectangle of the watermarked image handed to the detector.
    pub search_region: SearchRatios,
    /// Horizontal expansion ratio (boxed mode only).
    pub width_expansion: f32,
    /// Vertical expansion ratio.
    pub height_expansion: f32,
    /// Fixed margin added on every expanded side, in pixels.
    pub base_margin: u32,
}

impl RepairConfig {
    /// Recommended defaults for a watermark style.
    #[must_use]
    pub fn for_mode(mode: RepairMode) -> Self {
        let width_expansion = match mode {
            RepairMode::BottomBar => 0.1,
            RepairMode::Boxed => 0.2,
        };
        Self {
            mode,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            search_region: SearchRatios::BOTTOM_HALF,
            width_expansion,
            height_expansion: 0.1,
            base_margin: DEFAULT_BASE_MARGIN,
        }
    }

    /// Check every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::InvalidConfig(format!(
                "confidence threshold must be between 0.0 and 1.0, got {}",
                self.confidence_threshold
            )));
        }
        self.search_region.validate()?;
        for (name, value) in [
            ("width expansion", self.width_expansion),
            ("height expansion", self.height_expansion),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self::for_mode(RepairMode::Boxed)
    }
}

/// On-disk configuration. Every field is optional and overrides the
/// per-mode defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Watermark style.
    #[serde(default)]
    pub mode: Option<RepairMode>,

    /// Minimum detector confidence.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,

    /// Search region ratios `[x0, y0, x1, y1]`.
    #[serde(default)]
    pub search_region: Option<[f32; 4]>,

    /// Horizontal expansion ratio.
    #[serde(default)]
    pub width_expansion: Option<f32>,

    /// Vertical expansion ratio.
    #[serde(default)]
    pub height_expansion: Option<f32>,

    /// Fixed margin in pixels.
    #[serde(default)]
    pub base_margin: Option<u32>,

    /// Detector definitions keyed by mode.
    #[serde(default)]
    pub detectors: HashMap<RepairMode, DetectorSpec>,
}

impl FileConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::ConfigParse`] if it is not valid.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] if the string is not valid.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve into a validated [`RepairConfig`].
    ///
    /// `mode_override` wins over the file's `mode`; with neither, boxed mode
    /// is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a value is out of range.
    pub fn to_repair_config(&self, mode_override: Option<RepairMode>) -> Result<RepairConfig> {
        let mode = mode_override.or(self.mode).unwrap_or(RepairMode::Boxed);
        let mut config = RepairConfig::for_mode(mode);

        if let Some(threshold) = self.confidence_threshold {
            config.confidence_threshold = threshold;
        }
        if let Some(ratios) = self.search_region {
            config.search_region = ratios.into();
        }
        if let Some(ratio) = self.width_expansion {
            config.width_expansion = ratio;
        }
        if let Some(ratio) = self.height_expansion {
            config.height_expansion = ratio;
        }
        if let Some(margin) = self.base_margin {
            config.base_margin = margin;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_follow_watermark_style() {
        let bar = RepairConfig::for_mode(RepairMode::BottomBar);
        assert_eq!(bar.search_region, SearchRatios::BOTTOM_HALF);
        assert!((bar.width_expansion - 0.1).abs() < f32::EPSILON);
        assert_eq!(bar.base_margin, 5);

        let boxed = RepairConfig::for_mode(RepairMode::Boxed);
        assert!((boxed.width_expansion - 0.2).abs() < f32::EPSILON);
        assert!((boxed.height_expansion - 0.1).abs() < f32::EPSILON);
        assert!(boxed.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = RepairConfig::default();
        config.confidence_threshold = 1.5;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = RepairConfig::default();
        config.search_region = [0.6, 0.0, 0.4, 1.0].into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = RepairConfig::default();
        config.search_region = [0.0, 0.0, 1.2, 1.0].into();
        assert!(config.validate().is_err());

        let mut config = RepairConfig::default();
        config.height_expansion = -0.1;
        assert!(config.validate().is_err());

        let mut config = RepairConfig::default();
        config.width_expansion = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_config_overrides_mode_defaults() {
        let file = FileConfig::from_toml(
            r#"
            mode = "bottom-bar"
            confidence_threshold = 0.3
            search_region = [0.0, 0.7, 1.0, 1.0]
            base_margin = 8

            [detectors.bottom-bar]
            kind = "fixed"
            region = [0.0, 0.5, 1.0, 1.0]
            "#,
        )
        .unwrap();

        let config = file.to_repair_config(None).unwrap();
        assert_eq!(config.mode, RepairMode::BottomBar);
        assert!((config.confidence_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.search_region, [0.0, 0.7, 1.0, 1.0].into());
        assert_eq!(config.base_margin, 8);
        assert!((config.height_expansion - 0.1).abs() < f32::EPSILON);
        assert!(file.detectors.contains_key(&RepairMode::BottomBar));

        let overridden = file.to_repair_config(Some(RepairMode::Boxed)).unwrap();
        assert_eq!(overridden.mode, RepairMode::Boxed);
    }

    #[test]
    fn empty_file_gives_boxed_defaults() {
        let config = FileConfig::from_toml("").unwrap().to_repair_config(None).unwrap();
        assert_eq!(config, RepairConfig::for_mode(RepairMode::Boxed));
    }

    #[test]
    fn invalid_file_values_are_reported() {
        let file = FileConfig::from_toml("confidence_threshold = 2.0").unwrap();
        assert!(matches!(
            file.to_repair_config(None),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            FileConfig::from_toml("unknown_key = 1"),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn load_from_missing_path_is_io_error() {
        let err = FileConfig::load_from_path(Path::new("/nonexistent/repair.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
