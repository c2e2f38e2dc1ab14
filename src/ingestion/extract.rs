//! Extract sources.
//!
//! An extract is read twice on a dataset's first ingestion (once to infer the table shape, once
//! to stage it), so sources hand out a fresh stream on every [`ExtractSource::open`].

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A re-openable CSV byte stream plus a reference naming it.
pub trait ExtractSource: Send + Sync {
    /// Path, URL or timestamped label identifying this extract in logs.
    fn reference(&self) -> String;

    /// Open a new stream positioned at the start of the extract.
    fn open(&self) -> std::io::Result<Box<dyn Read + Send>>;
}

/// An extract stored in a local file.
#[derive(Debug, Clone)]
pub struct FileExtract {
    path: PathBuf,
}

impl FileExtract {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ExtractSource for FileExtract {
    fn reference(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }
}

/// An extract held in memory.
#[derive(Clone)]
pub struct BytesExtract {
    label: String,
    bytes: Arc<[u8]>,
}

impl BytesExtract {
    pub fn new(label: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            bytes: Arc::from(bytes.into()),
        }
    }
}

impl fmt::Debug for BytesExtract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytesExtract")
            .field("label", &self.label)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ExtractSource for BytesExtract {
    fn reference(&self) -> String {
        self.label.clone()
    }

    fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::{BytesExtract, ExtractSource, FileExtract};

    fn read_all(src: &dyn ExtractSource) -> String {
        let mut out = String::new();
        src.open().unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn bytes_extract_reopens_from_the_start() {
        let src = BytesExtract::new("potholes.csv", "a,b\n1,2\n");
        assert_eq!(read_all(&src), "a,b\n1,2\n");
        assert_eq!(read_all(&src), "a,b\n1,2\n");
        assert_eq!(src.reference(), "potholes.csv");
    }

    #[test]
    fn file_extract_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a\n1\n").unwrap();
        let src = FileExtract::new(file.path());
        assert_eq!(read_all(&src), "a\n1\n");
    }

    #[test]
    fn missing_file_fails_on_open() {
        let src = FileExtract::new("definitely/not/here.csv");
        assert!(src.open().is_err());
    }
}
