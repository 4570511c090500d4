//! Repair watermarked high-resolution images from clean low-resolution originals.
//!
//! Given a pair of images of the same subject (one watermarked at high
//! resolution, one clean at lower resolution), this crate asks a detector
//! where the watermark is, grows the detection into a repair rectangle,
//! upsamples the clean original with a Lanczos filter and pastes the
//! matching patch over the watermark. The result is re-encoded in a way that
//! respects the original container format.
//!
//! # Quick Start
//!
//! ```no_run
//! use watermark_patch_repair::{
//!     process_batch, DetectorRegistry, FixedRegionDetector, RepairConfig, RepairMode,
//!     ZipReader, ZipSink,
//! };
//!
//! let config = RepairConfig::for_mode(RepairMode::BottomBar);
//! let detectors = DetectorRegistry::new().with(
//!     RepairMode::BottomBar,
//!     Box::new(FixedRegionDetector::new([0.0, 0.8, 1.0, 1.0], 1.0)),
//! );
//!
//! let mut input = ZipReader::new(std::fs::File::open("pairs.zip").unwrap()).unwrap();
//! let output = ZipSink::new(std::io::Cursor::new(Vec::new()));
//! let progress = |msg: &str| eprintln!("{msg}");
//!
//! let (output, report) =
//!     process_batch(&mut input, output, &config, &detectors, &progress).unwrap();
//! std::fs::write("repaired.zip", output.finish().unwrap().into_inner()).unwrap();
//! println!("{report}");
//! ```
//!
//! # Pairing convention
//!
//! Inside a container, `<id>-wm.<ext>` is repaired from `<id>-orig.<ext>`.
//! The [`pairing`] module produces such names from a loose set of uploads.

#![deny(missing_docs)]

pub mod batch;
pub mod compositor;
pub mod config;
pub mod container;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod pairing;
pub mod raster;
pub mod region;

pub use batch::{
    discover_pairs, process_batch, repair_pair, BatchReport, PairTask, ProgressSink, ReportLine,
};
pub use compositor::composite;
pub use config::{FileConfig, RepairConfig, RepairMode, SearchRatios};
pub use container::{
    ContainerReader, ContainerWriter, DirContainer, MemoryContainer, ZipReader, ZipSink,
};
pub use detector::{CommandDetector, Detector, DetectorRegistry, DetectorSpec, FixedRegionDetector};
pub use encoder::{encode, sniff_format, ContainerFormat, EncodeMode, Encoded};
pub use error::{Error, Result};
pub use raster::Raster;
pub use region::{resolve, DetectionBox, RepairRectangle, SearchRegion};
