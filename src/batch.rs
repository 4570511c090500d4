//! Batch orchestration over a container of `<id>-wm` / `<id>-orig` pairs.
//!
//! Pairs are processed one at a time. A failing pair becomes a `[failed]`
//! report line and the batch moves on; only setup problems (no detector for
//! the mode, no pairs at all) abort the run.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::compositor;
use crate::config::{RepairConfig, RepairMode};
use crate::container::{ContainerReader, ContainerWriter};
use crate::detector::{Detector, DetectorRegistry};
use crate::encoder::{self, EncodeMode, Encoded};
use crate::error::{Error, Result};
use crate::raster::Raster;
use crate::region::{self, SearchRegion};

const WATERMARKED_SUFFIX: &str = "-wm";
const ORIGINAL_SUFFIX: &str = "-orig";

/// Receives one progress message per pair.
pub trait ProgressSink {
    /// Handle a progress message.
    fn report(&self, message: &str);
}

impl<F: Fn(&str)> ProgressSink for F {
    fn report(&self, message: &str) {
        self(message);
    }
}

/// Discards progress messages.
impl ProgressSink for () {
    fn report(&self, _message: &str) {}
}

/// A watermarked entry and the clean original it is repaired from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairTask {
    /// Shared `<id>` of both entries.
    pub id: String,
    /// Entry name of the watermarked image.
    pub watermarked: String,
    /// Entry name of the clean original.
    pub original: String,
}

impl PairTask {
    /// File name used for the repaired output and in the report.
    #[must_use]
    pub fn output_name(&self) -> &str {
        file_name(&self.watermarked)
    }
}

fn file_name(entry: &str) -> &str {
    Path::new(entry)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(entry)
}

fn file_stem(entry: &str) -> Option<&str> {
    Path::new(entry).file_stem().and_then(|s| s.to_str())
}

/// Match `<id>-wm.*` entries with `<id>-orig.*` entries.
///
/// Entries are looked up by stem, ignoring extension and directory; when two
/// entries share a stem the later one wins. Watermarked entries without an
/// original are skipped. Pairs come out in container order.
#[must_use]
pub fn discover_pairs(entry_names: &[String]) -> Vec<PairTask> {
    let by_stem: HashMap<&str, &str> = entry_names
        .iter()
        .filter_map(|name| file_stem(name).map(|stem| (stem, name.as_str())))
        .collect();

    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    for name in entry_names {
        let Some(stem) = file_stem(name) else {
            continue;
        };
        let Some(id) = stem.strip_suffix(WATERMARKED_SUFFIX) else {
            continue;
        };
        if id.is_empty() || !seen.insert(stem) {
            continue;
        }
        let watermarked = by_stem[stem];
        match by_stem.get(format!("{id}{ORIGINAL_SUFFIX}").as_str()) {
            Some(original) => tasks.push(PairTask {
                id: id.to_string(),
                watermarked: watermarked.to_string(),
                original: (*original).to_string(),
            }),
            None => tracing::debug!(entry = %name, "no original for watermarked entry"),
        }
    }
    tasks
}

/// Outcome of one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportLine {
    /// The pair was repaired and written.
    Success {
        /// Output entry name.
        name: String,
        /// Encoding path used.
        mode: EncodeMode,
    },
    /// The pair could not be repaired.
    Failed {
        /// Watermarked entry name.
        name: String,
        /// Short failure reason.
        reason: String,
    },
}

impl ReportLine {
    /// Whether this line records a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { name, mode } => write!(f, "  [success] {name} - repaired ({mode})"),
            Self::Failed { name, reason } => write!(f, "  [failed] {name} - {reason}"),
        }
    }
}

/// Ordered per-pair outcomes of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Mode the batch ran in.
    pub mode: RepairMode,
    /// One line per discovered pair, in discovery order.
    pub lines: Vec<ReportLine>,
}

impl BatchReport {
    /// Empty report for a mode.
    #[must_use]
    pub fn new(mode: RepairMode) -> Self {
        Self {
            mode,
            lines: Vec::new(),
        }
    }

    /// Number of repaired pairs.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.lines.iter().filter(|l| l.is_success()).count()
    }

    /// Number of failed pairs.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.lines.len() - self.success_count()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--- watermark repair report ({} mode) ---", self.mode)?;
        for line in &self.lines {
            write!(f, "\n{line}")?;
        }
        Ok(())
    }
}

/// Repair one watermarked image from its clean original.
///
/// # Errors
///
/// Returns the per-pair error of the first stage that fails.
pub fn repair_pair(
    watermarked: &[u8],
    original: &[u8],
    config: &RepairConfig,
    detector: &dyn Detector,
) -> Result<Encoded> {
    let format = encoder::sniff_format(watermarked)?;
    let target = Raster::decode(watermarked)?;
    let source = Raster::decode(original)?;
    let (width, height) = target.dimensions();

    let search = SearchRegion::from_ratios(&config.search_region, width, height)?;
    let boxes: Vec<_> = detector
        .detect(&target.crop(&search), config.confidence_threshold)?
        .into_iter()
        .filter(|b| b.confidence >= config.confidence_threshold)
        .collect();
    tracing::debug!(detector = detector.name(), count = boxes.len(), ?search, "detection done");

    let rect = region::resolve(&boxes, search.origin(), (width, height), config)?;
    let repaired = compositor::composite(target, source, &rect)?;
    encoder::encode(repaired, format)
}

/// Repair every `<id>-wm` / `<id>-orig` pair in `reader`.
///
/// Repaired images are written to `writer` under the watermarked entry's
/// file name. Returns the writer and a report covering every discovered pair.
///
/// # Errors
///
/// - [`Error::DetectorUnavailable`] if no detector is registered for `config.mode`.
/// - [`Error::NoPairsFound`] if the container holds no pair.
/// - Any error from listing `reader` or writing to `writer`.
#[tracing::instrument(skip_all, fields(mode = %config.mode))]
pub fn process_batch<R, W>(
    reader: &mut R,
    mut writer: W,
    config: &RepairConfig,
    detectors: &DetectorRegistry,
    progress: &dyn ProgressSink,
) -> Result<(W, BatchReport)>
where
    R: ContainerReader + ?Sized,
    W: ContainerWriter,
{
    let detector = detectors.get(config.mode)?;
    let tasks = discover_pairs(&reader.entry_names()?);
    if tasks.is_empty() {
        return Err(Error::NoPairsFound);
    }
    tracing::info!(pairs = tasks.len(), detector = detector.name(), "starting batch");

    let mut report = BatchReport::new(config.mode);
    let total = tasks.len();
    for (i, task) in tasks.iter().enumerate() {
        let name = task.output_name();
        progress.report(&format!("processing pair {}/{total}: {name}", i + 1));

        let outcome = read_pair(reader, task)
            .and_then(|(wm, orig)| repair_pair(&wm, &orig, config, detector));
        let line = match outcome {
            Ok(encoded) => {
                writer.write_entry(name, &encoded.bytes)?;
                tracing::info!(entry = name, mode = %encoded.mode, "repaired");
                ReportLine::Success {
                    name: name.to_string(),
                    mode: encoded.mode,
                }
            }
            Err(e) if e.is_per_pair() => {
                tracing::warn!(entry = name, error = %e, "repair failed");
                ReportLine::Failed {
                    name: name.to_string(),
                    reason: e.reason().to_string(),
                }
            }
            Err(e) => return Err(e),
        };
        report.lines.push(line);
    }

    tracing::info!(
        succeeded = report.success_count(),
        failed = report.failure_count(),
        "batch finished"
    );
    Ok((writer, report))
}

fn read_pair<R>(reader: &mut R, task: &PairTask) -> Result<(Vec<u8>, Vec<u8>)>
where
    R: ContainerReader + ?Sized,
{
    let watermarked = reader.read_entry(&task.watermarked)?;
    let original = reader.read_entry(&task.original)?;
    Ok((watermarked, original))
}
