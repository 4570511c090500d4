//! Turn a loose upload of image pairs into `<id>-wm` / `<id>-orig` entries.
//!
//! Files are ordered by modification time and taken two at a time; within a
//! pair the larger file is assumed to be the watermarked high-resolution one.

use std::path::Path;
use std::time::SystemTime;

use crate::container::ContainerWriter;
use crate::error::Result;

const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];
const DEFAULT_EXTENSION: &str = ".jpg";

/// An uploaded file waiting to be paired.
#[derive(Debug, Clone)]
pub struct InputFile {
    /// Original file name.
    pub name: String,
    /// File contents.
    pub data: Vec<u8>,
    /// Modification time, if known. Files without one sort first.
    pub modified: Option<SystemTime>,
}

/// Remove characters that are not allowed in Windows file names.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.chars().filter(|c| !FORBIDDEN_CHARS.contains(c)).collect()
}

/// Pair files and write them under their `<id>-wm` / `<id>-orig` names.
///
/// Returns human-readable report lines.
///
/// # Errors
///
/// Returns any error from `writer`.
pub fn rename_pairs<W: ContainerWriter + ?Sized>(
    mut files: Vec<InputFile>,
    writer: &mut W,
) -> Result<Vec<String>> {
    let mut report = vec!["--- rename report ---".to_string()];

    files.sort_by_key(|f| f.modified);
    report.push(format!("[*] found {} files", files.len()));

    if files.len() % 2 != 0 {
        if let Some(ignored) = files.pop() {
            tracing::warn!(file = %ignored.name, "odd file count, ignoring last file");
            report.push(format!(
                "[!] odd number of files; ignoring the last one: '{}'",
                ignored.name
            ));
        }
    }

    let mut files = files.into_iter();
    while let (Some(first), Some(second)) = (files.next(), files.next()) {
        let (wm, orig) = if first.data.len() > second.data.len() {
            (first, second)
        } else {
            (second, first)
        };

        let id = Path::new(&wm.name)
            .file_stem()
            .map(|s| sanitize_file_name(&s.to_string_lossy()))
            .unwrap_or_default();
        let ext = Path::new(&orig.name)
            .extension()
            .map_or_else(|| DEFAULT_EXTENSION.to_string(), |e| format!(".{}", e.to_string_lossy()));

        let wm_name = format!("{id}-wm{ext}");
        let orig_name = format!("{id}-orig{ext}");
        report.push(format!("  [paired] '{}' + '{}'", wm.name, orig.name));
        report.push(format!("    -> '{wm_name}' and '{orig_name}'"));

        writer.write_entry(&wm_name, &wm.data)?;
        writer.write_entry(&orig_name, &orig.data)?;
    }

    Ok(report)
}
