//! Named byte-blob containers: zip archives, flat directories and memory.

use std::fs;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// Source of named entries.
pub trait ContainerReader {
    /// Entry names in container order.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be listed.
    fn entry_names(&self) -> Result<Vec<String>>;

    /// Read one entry's bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadEntry`] if the entry is missing or unreadable.
    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>>;
}

/// Sink for named entries.
pub trait ContainerWriter {
    /// Store `bytes` under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()>;
}

fn read_error(name: &str, reason: impl ToString) -> Error {
    Error::ReadEntry {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Reads entries from a zip archive.
pub struct ZipReader<R: Read + Seek> {
    archive: ZipArchive<R>,
    names: Vec<String>,
}

impl<R: Read + Seek> ZipReader<R> {
    /// Open an archive. Directory entries are not listed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Zip`] if the archive cannot be parsed.
    pub fn new(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut names = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if !entry.is_dir() {
                names.push(entry.name().to_string());
            }
        }
        Ok(Self { archive, names })
    }
}

impl<R: Read + Seek> ContainerReader for ZipReader<R> {
    fn entry_names(&self) -> Result<Vec<String>> {
        Ok(self.names.clone())
    }

    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut entry = self.archive.by_name(name).map_err(|e| read_error(name, e))?;
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| read_error(name, e))?;
        Ok(bytes)
    }
}

/// Writes entries into a deflate-compressed zip archive.
pub struct ZipSink<W: Write + Seek> {
    writer: ZipWriter<W>,
}

impl<W: Write + Seek> ZipSink<W> {
    /// Start a new archive on `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: ZipWriter::new(writer),
        }
    }

    /// Write the central directory and hand back the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Zip`] if the archive cannot be finalized.
    pub fn finish(self) -> Result<W> {
        Ok(self.writer.finish()?)
    }
}

impl<W: Write + Seek> ContainerWriter for ZipSink<W> {
    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.writer.start_file(name, options)?;
        self.writer.write_all(bytes)?;
        Ok(())
    }
}

/// A flat directory of files.
///
/// Reading lists regular files sorted by name; writing creates the
/// directory on first use.
#[derive(Debug, Clone)]
pub struct DirContainer {
    root: PathBuf,
}

impl DirContainer {
    /// Use `root` as the container directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Container directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| read_error(name, "not a file name"))?;
        Ok(self.root.join(file_name))
    }
}

impl ContainerReader for DirContainer {
    fn entry_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => tracing::warn!(?name, "skipping non UTF-8 file name"),
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(name)?;
        fs::read(&path).map_err(|e| read_error(name, e))
    }
}

impl ContainerWriter for DirContainer {
    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
        }
        let path = self.entry_path(name)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

/// Ordered in-memory entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryContainer {
    entries: Vec<(String, Vec<u8>)>,
}

impl MemoryContainer {
    /// Create an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, builder style.
    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.entries.push((name.into(), bytes.into()));
        self
    }

    /// Look up an entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the container holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the container, returning its entries in insertion order.
    #[must_use]
    pub fn into_entries(self) -> Vec<(String, Vec<u8>)> {
        self.entries
    }
}

impl ContainerReader for MemoryContainer {
    fn entry_names(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|(name, _)| name.clone()).collect())
    }

    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        self.get(name)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| read_error(name, "no such entry"))
    }
}

impl ContainerWriter for MemoryContainer {
    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.entries.retain(|(n, _)| n != name);
        self.entries.push((name.to_string(), bytes.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn zip_round_trip_keeps_entry_order() {
        let mut sink = ZipSink::new(Cursor::new(Vec::new()));
        sink.write_entry("b-wm.jpg", b"bbb").unwrap();
        sink.write_entry("a-wm.jpg", b"aaa").unwrap();
        let bytes = sink.finish().unwrap().into_inner();

        let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.entry_names().unwrap(), vec!["b-wm.jpg", "a-wm.jpg"]);
        assert_eq!(reader.read_entry("a-wm.jpg").unwrap(), b"aaa");
        assert!(matches!(
            reader.read_entry("missing.jpg"),
            Err(Error::ReadEntry { .. })
        ));
    }

    #[test]
    fn zip_reader_skips_directories() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .add_directory("pairs/", SimpleFileOptions::default())
            .unwrap();
        writer
            .start_file("pairs/x-wm.png", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"x").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let reader = ZipReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.entry_names().unwrap(), vec!["pairs/x-wm.png"]);
    }

    #[test]
    fn garbage_is_not_a_zip() {
        assert!(matches!(
            ZipReader::new(Cursor::new(b"not a zip".to_vec())),
            Err(Error::Zip(_))
        ));
    }

    #[test]
    fn dir_container_lists_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.png"), b"2").unwrap();
        fs::write(dir.path().join("a.png"), b"1").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let mut container = DirContainer::new(dir.path());
        assert_eq!(container.entry_names().unwrap(), vec!["a.png", "b.png"]);
        assert_eq!(container.read_entry("b.png").unwrap(), b"2");
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let container = DirContainer::new(dir.path().join("gone"));
        assert!(matches!(container.entry_names(), Err(Error::Io(_))));
    }

    #[test]
    fn dir_container_creates_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut container = DirContainer::new(&out);
        container.write_entry("sub/x-wm.jpg", b"xyz").unwrap();
        assert_eq!(fs::read(out.join("x-wm.jpg")).unwrap(), b"xyz");
    }

    #[test]
    fn memory_container_overwrites_by_name() {
        let mut container = MemoryContainer::new().with_entry("a", b"1".to_vec());
        container.write_entry("a", b"2").unwrap();
        assert_eq!(container.len(), 1);
        assert_eq!(container.get("a"), Some(&b"2"[..]));
    }
}
