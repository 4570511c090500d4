//! Detector adapters and the per-mode detector registry.
//!
//! The detection model itself lives outside this crate. A [`Detector`] takes
//! the cropped search region and returns boxes relative to it. Detectors are
//! built once, registered by [`RepairMode`], and borrowed by the batch
//! orchestrator for the whole run.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::RepairMode;
use crate::error::{Error, Result};
use crate::raster::Raster;
use crate::region::DetectionBox;

/// Environment variable carrying the confidence threshold to a command detector.
pub const CONFIDENCE_ENV: &str = "WATERMARK_CONFIDENCE";

/// Default time limit for one command detector invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Something that finds watermark boxes in an image region.
pub trait Detector: Send + Sync {
    /// Human-readable detector name for logs.
    fn name(&self) -> &str;

    /// Detect watermarks in `region`.
    ///
    /// Returned coordinates are relative to `region`. Implementations should
    /// drop boxes below `confidence_threshold`; the orchestrator filters again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Detector`] or [`Error::DetectorTimeout`] when no
    /// answer can be produced.
    fn detect(&self, region: &Raster, confidence_threshold: f32) -> Result<Vec<DetectionBox>>;
}

/// Serializable detector definition, as found in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum DetectorSpec {
    /// Always report the same box, given as ratios of the search region.
    Fixed {
        /// `[x0, y0, x1, y1]` ratios of the search region.
        region: [f32; 4],
        /// Confidence attached to the box.
        #[serde(default = "full_confidence")]
        confidence: f32,
    },
    /// Run an external detector process.
    Command {
        /// Executable to run.
        program: PathBuf,
        /// Arguments passed to the executable.
        #[serde(default)]
        args: Vec<String>,
        /// Time limit per invocation, in seconds.
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn full_confidence() -> f32 {
    1.0
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl DetectorSpec {
    /// Instantiate the described detector.
    #[must_use]
    pub fn build(&self) -> Box<dyn Detector> {
        match self {
            Self::Fixed { region, confidence } => {
                Box::new(FixedRegionDetector::new(*region, *confidence))
            }
            Self::Command {
                program,
                args,
                timeout_secs,
            } => Box::new(
                CommandDetector::new(program.clone())
                    .args(args.iter().cloned())
                    .timeout(Duration::from_secs(*timeout_secs)),
            ),
        }
    }
}

/// Detectors keyed by the watermark style they recognize.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: HashMap<RepairMode, Box<dyn Detector>>,
}

impl DetectorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every detector named in a configuration map.
    #[must_use]
    pub fn from_specs(specs: &HashMap<RepairMode, DetectorSpec>) -> Self {
        let mut registry = Self::new();
        for (mode, spec) in specs {
            registry.register(*mode, spec.build());
        }
        registry
    }

    /// Register (or replace) the detector for a mode.
    pub fn register(&mut self, mode: RepairMode, detector: Box<dyn Detector>) {
        tracing::debug!(%mode, detector = detector.name(), "registered detector");
        self.detectors.insert(mode, detector);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, mode: RepairMode, detector: Box<dyn Detector>) -> Self {
        self.register(mode, detector);
        self
    }

    /// Look up the detector for a mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectorUnavailable`] if none is registered.
    pub fn get(&self, mode: RepairMode) -> Result<&dyn Detector> {
        self.detectors
            .get(&mode)
            .map(AsRef::as_ref)
            .ok_or(Error::DetectorUnavailable(mode))
    }

    /// Whether a detector is registered for `mode`.
    #[must_use]
    pub fn contains(&self, mode: RepairMode) -> bool {
        self.detectors.contains_key(&mode)
    }
}

/// Reports one configured box for every region, for watermarks whose
/// position on the platform is fixed.
#[derive(Debug, Clone)]
pub struct FixedRegionDetector {
    region: [f32; 4],
    confidence: f32,
}

impl FixedRegionDetector {
    /// `region` is `[x0, y0, x1, y1]` as ratios of the search region.
    #[must_use]
    pub fn new(region: [f32; 4], confidence: f32) -> Self {
        Self { region, confidence }
    }
}

impl Detector for FixedRegionDetector {
    fn name(&self) -> &str {
        "fixed"
    }

    #[allow(clippy::cast_precision_loss)]
    fn detect(&self, region: &Raster, confidence_threshold: f32) -> Result<Vec<DetectionBox>> {
        if self.confidence < confidence_threshold {
            return Ok(Vec::new());
        }
        let (w, h) = (region.width() as f32, region.height() as f32);
        let [x0, y0, x1, y1] = self.region;
        Ok(vec![DetectionBox::new(
            x0 * w,
            y0 * h,
            x1 * w,
            y1 * h,
            self.confidence,
        )])
    }
}

/// Runs an external detector process per region.
///
/// The region is written to the process's stdin as PNG, the confidence
/// threshold is passed in [`CONFIDENCE_ENV`], and the process must print a
/// JSON array of boxes to stdout:
///
/// ```json
/// [{"x_min": 12.0, "y_min": 40.5, "x_max": 220.0, "y_max": 71.0, "confidence": 0.91}]
/// ```
#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    /// Detector running `program` with no arguments and the default timeout.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the per-invocation time limit.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wait for a pump's output until `deadline`.
    fn collect<T>(&self, rx: &Receiver<T>, deadline: Instant) -> Result<T> {
        rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .map_err(|e| match e {
                RecvTimeoutError::Timeout => Error::DetectorTimeout(self.timeout),
                RecvTimeoutError::Disconnected => {
                    Error::Detector("detector output pump stopped".to_string())
                }
            })
    }

    fn region_png(region: &Raster) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        region
            .clone()
            .into_dynamic()
            .write_to(&mut buf, image::ImageFormat::Png)
            .map_err(|e| Error::Detector(format!("failed to encode region: {e}")))?;
        Ok(buf.into_inner())
    }
}

impl Detector for CommandDetector {
    fn name(&self) -> &str {
        self.program.to_str().unwrap_or("command")
    }

    fn detect(&self, region: &Raster, confidence_threshold: f32) -> Result<Vec<DetectionBox>> {
        let input = Self::region_png(region)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(CONFIDENCE_ENV, confidence_threshold.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Detector(format!("failed to start {}: {e}", self.program.display())))?;

        // Pumps run on their own threads so a full pipe cannot stall the child.
        // They are never joined: a process the detector left behind may keep
        // the pipes open long after the deadline.
        let mut stdin = child.stdin.take();
        thread::spawn(move || {
            if let Some(pipe) = stdin.as_mut() {
                // A detector may exit without reading everything.
                let _ = pipe.write_all(&input);
            }
        });
        let stdout = child.stdout.take();
        let (out_tx, out_rx) = mpsc::channel();
        thread::spawn(move || {
            let mut out = Vec::new();
            if let Some(mut pipe) = stdout {
                let _ = pipe.read_to_end(&mut out);
            }
            let _ = out_tx.send(out);
        });
        let stderr = child.stderr.take();
        let (err_tx, err_rx) = mpsc::channel();
        thread::spawn(move || {
            let mut err = String::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut err);
            }
            let _ = err_tx.send(err);
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            let polled = child
                .try_wait()
                .map_err(|e| Error::Detector(format!("failed to wait for detector: {e}")))?;
            if let Some(status) = polled {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::DetectorTimeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = self.collect(&out_rx, deadline)?;
        let stderr = self.collect(&err_rx, deadline)?;

        if !status.success() {
            return Err(Error::Detector(format!(
                "{} exited with {status}: {}",
                self.program.display(),
                stderr.trim()
            )));
        }

        let boxes: Vec<DetectionBox> = serde_json::from_slice(&stdout)
            .map_err(|e| Error::Detector(format!("malformed detector output: {e}")))?;
        Ok(boxes
            .into_iter()
            .filter(|b| b.confidence >= confidence_threshold)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn missing_program_is_a_detector_error() {
        let registry = DetectorRegistry::new().with(
            RepairMode::Boxed,
            Box::new(FixedRegionDetector::new([0.0, 0.0, 1.0, 1.0], 1.0)),
        );
        assert!(registry.contains(RepairMode::Boxed));
        assert!(registry.get(RepairMode::Boxed).is_ok());
        assert!(matches!(
            registry.get(RepairMode::BottomBar),
            Err(Error::DetectorUnavailable(RepairMode::BottomBar))
        ));
    }

    #[test]
    fn fixed_detector_scales_to_region() {
        let detector = FixedRegionDetector::new([0.25, 0.5, 0.75, 1.0], 0.9);
        let region = Raster::Rgb(RgbImage::new(200, 40));
        let boxes = detector.detect(&region, 0.5).unwrap();
        assert_eq!(boxes, vec![DetectionBox::new(50.0, 20.0, 150.0, 40.0, 0.9)]);

        assert!(detector.detect(&region, 0.95).unwrap().is_empty());
    }

    #[test]
    fn specs_parse_and_build() {
        let specs: HashMap<RepairMode, DetectorSpec> = toml::from_str(
            r#"
            [boxed]
            kind = "command"
            program = "detect-watermark"
            args = ["--weights", "boxed.pt"]

            [bottom-bar]
            kind = "fixed"
            region = [0.0, 0.8, 1.0, 1.0]
            "#,
        )
        .unwrap();

        assert_eq!(
            specs[&RepairMode::Boxed],
            DetectorSpec::Command {
                program: PathBuf::from("detect-watermark"),
                args: vec!["--weights".into(), "boxed.pt".into()],
                timeout_secs: 60,
            }
        );
        assert_eq!(
            specs[&RepairMode::BottomBar],
            DetectorSpec::Fixed {
                region: [0.0, 0.8, 1.0, 1.0],
                confidence: 1.0,
            }
        );

        let registry = DetectorRegistry::from_specs(&specs);
        assert_eq!(registry.get(RepairMode::BottomBar).unwrap().name(), "fixed");
        assert_eq!(
            registry.get(RepairMode::Boxed).unwrap().name(),
            "detect-watermark"
        );
    }

    #[test]
    fn missing_command_is_a_detector_error() {
        let detector = CommandDetector::new("/nonexistent/detector-binary");
        let err = detector
            .detect(&Raster::Rgb(RgbImage::new(4, 4)), 0.5)
            .unwrap_err();
        assert!(matches!(err, Error::Detector(_)));
    }

    #[cfg(unix)]
    #[test]
    fn command_detector_parses_stdout_and_filters_confidence() {
        let script = r#"cat > /dev/null; echo '[{"x_min":1,"y_min":2,"x_max":3,"y_max":4,"confidence":0.9},{"x_min":0,"y_min":0,"x_max":1,"y_max":1,"confidence":0.1}]'"#;
        let detector = CommandDetector::new("sh").args(["-c", script]);
        let boxes = detector
            .detect(&Raster::Rgb(RgbImage::new(8, 8)), 0.5)
            .unwrap();
        assert_eq!(boxes, vec![DetectionBox::new(1.0, 2.0, 3.0, 4.0, 0.9)]);
    }

    #[cfg(unix)]
    #[test]
    fn command_detector_receives_threshold() {
        let script = r#"cat > /dev/null; test "$WATERMARK_CONFIDENCE" = "0.25" && echo '[]'"#;
        let detector = CommandDetector::new("sh").args(["-c", script]);
        let boxes = detector
            .detect(&Raster::Rgb(RgbImage::new(2, 2)), 0.25)
            .unwrap();
        assert!(boxes.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn command_detector_times_out() {
        let detector = CommandDetector::new("sh")
            .args(["-c", "sleep 5"])
            .timeout(Duration::from_millis(100));
        let err = detector
            .detect(&Raster::Rgb(RgbImage::new(2, 2)), 0.5)
            .unwrap_err();
        assert!(matches!(err, Error::DetectorTimeout(_)));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_covers_output_held_by_background_processes() {
        let detector = CommandDetector::new("sh")
            .args(["-c", "cat > /dev/null; sleep 4 & echo '[]'"])
            .timeout(Duration::from_millis(300));
        let started = Instant::now();
        let err = detector
            .detect(&Raster::Rgb(RgbImage::new(2, 2)), 0.5)
            .unwrap_err();
        assert!(matches!(err, Error::DetectorTimeout(_)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn command_detector_reports_failures() {
        let detector = CommandDetector::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let err = detector
            .detect(&Raster::Rgb(RgbImage::new(2, 2)), 0.5)
            .unwrap_err();
        assert!(err.to_string().contains("boom"));

        let detector = CommandDetector::new("sh").args(["-c", "cat > /dev/null; echo not-json"]);
        let err = detector
            .detect(&Raster::Rgb(RgbImage::new(2, 2)), 0.5)
            .unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }
}
