//! Files and buffers for feeding and observing pipelines in tests.

use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// A temporary file, deleted when dropped.
pub struct TempFilePath {
    _file: NamedTempFile,
    path: PathBuf,
}

impl TempFilePath {
    pub fn new() -> std::io::Result<Self> {
        let file = NamedTempFile::new()?;
        let path = file.path().to_path_buf();
        Ok(Self { _file: file, path })
    }

    /// A temporary file ending in `.{extension}` holding `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn with_contents(extension: &str, contents: &str) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{extension}"))
            .tempfile()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        let path = file.path().to_path_buf();
        Ok(Self { _file: file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path as written inside a TQL string literal.
    #[must_use]
    pub fn tql_literal(&self) -> String {
        format!("'{}'", self.path.display().to_string().replace('\\', "/"))
    }
}

/// A cloneable in-memory output; every clone appends to the same bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, as UTF-8 (lossy).
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// A boxed writer suitable for `RunEnv::new`.
    #[must_use]
    pub fn writer(&self) -> Box<dyn Write + Send> {
        Box::new(self.clone())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_holds_contents() {
        let f = TempFilePath::with_contents("csv", "a,1\nb,2\n").unwrap();
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "a,1\nb,2\n");
        assert!(f.tql_literal().ends_with(".csv'"));
    }

    #[test]
    fn clones_share_output() {
        let buf = SharedBuffer::new();
        let mut w = buf.writer();
        w.write_all(b"hello").unwrap();
        assert_eq!(buf.contents(), "hello");
    }
}
