//! Transfer Data Streams
//!
//! The transfer endpoints read and write file contents through
//! [`TransferStream`]. A sending stream implements `read_data`, a receiving
//! stream implements `create_data` and `write_data`; the defaults refuse.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Byte store behind a transfer
pub trait TransferStream {
    /// Read exactly `len` bytes starting at `offset`
    fn read_data(&mut self, _offset: u64, _len: usize) -> io::Result<Vec<u8>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is not readable",
        ))
    }

    /// Prepare to receive `length` bytes; `false` rejects the transfer
    fn create_data(&mut self, _length: u64, _name: Option<&str>) -> bool {
        false
    }

    /// Store `data` at `offset`; `false` aborts the transfer
    fn write_data(&mut self, _offset: u64, _data: &[u8]) -> bool {
        false
    }
}

/// In-memory stream, readable and writable
///
/// Clones share the same buffer, so a test can keep a handle to inspect what
/// a receiver wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    data: Vec<u8>,
    name: Option<String>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream holding `data`, for sending
    pub fn with_data(data: Vec<u8>) -> Self {
        MemoryStream {
            inner: Arc::new(Mutex::new(MemoryInner { data, name: None })),
        }
    }

    /// Snapshot of the current contents
    pub fn data(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// Name announced by the last `create_data`
    pub fn name(&self) -> Option<String> {
        self.inner.lock().name.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransferStream for MemoryStream {
    fn read_data(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let inner = self.inner.lock();
        let start = usize::try_from(offset).map_err(|_| io::ErrorKind::InvalidInput)?;
        let end = start.checked_add(len).ok_or(io::ErrorKind::InvalidInput)?;
        inner
            .data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| io::ErrorKind::UnexpectedEof.into())
    }

    fn create_data(&mut self, length: u64, name: Option<&str>) -> bool {
        let Ok(length) = usize::try_from(length) else {
            return false;
        };
        let mut inner = self.inner.lock();
        inner.data = vec![0; length];
        inner.name = name.map(str::to_owned);
        true
    }

    fn write_data(&mut self, offset: u64, data: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        let Some(start) = usize::try_from(offset).ok() else {
            return false;
        };
        let Some(end) = start.checked_add(data.len()) else {
            return false;
        };
        match inner.data.get_mut(start..end) {
            Some(slot) => {
                slot.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

/// File to send
#[derive(Debug)]
pub struct FileSource {
    file: File,
    length: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok(FileSource { file, length })
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

impl TransferStream for FileSource {
    fn read_data(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Destination for received files
///
/// Writes to a fixed path, or into a directory under the name the sender
/// announced (only its final path component is used).
#[derive(Debug)]
pub struct FileSink {
    target: SinkTarget,
    file: Option<File>,
    path: Option<PathBuf>,
}

#[derive(Debug)]
enum SinkTarget {
    Path(PathBuf),
    Directory(PathBuf),
}

impl FileSink {
    /// Always write to `path`
    pub fn to_path<P: Into<PathBuf>>(path: P) -> Self {
        FileSink {
            target: SinkTarget::Path(path.into()),
            file: None,
            path: None,
        }
    }

    /// Write into `dir` using the announced file name
    pub fn in_directory<P: Into<PathBuf>>(dir: P) -> Self {
        FileSink {
            target: SinkTarget::Directory(dir.into()),
            file: None,
            path: None,
        }
    }

    /// Path of the file being written, once a transfer was accepted
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn resolve(&self, name: Option<&str>) -> Option<PathBuf> {
        match &self.target {
            SinkTarget::Path(path) => Some(path.clone()),
            SinkTarget::Directory(dir) => {
                let name = Path::new(name?).file_name()?;
                Some(dir.join(name))
            }
        }
    }
}

impl TransferStream for FileSink {
    fn create_data(&mut self, length: u64, name: Option<&str>) -> bool {
        let Some(path) = self.resolve(name) else {
            tracing::warn!("Rejecting transfer without a usable file name");
            return false;
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .and_then(|file| file.set_len(length).map(|_| file));
        match file {
            Ok(file) => {
                tracing::info!("Receiving {} bytes into {}", length, path.display());
                self.file = Some(file);
                self.path = Some(path);
                true
            }
            Err(e) => {
                tracing::warn!("Cannot create {}: {}", path.display(), e);
                false
            }
        }
    }

    fn write_data(&mut self, offset: u64, data: &[u8]) -> bool {
        let Some(file) = self.file.as_mut() else {
            return false;
        };
        let res = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data));
        if let Err(e) = res {
            tracing::warn!("Write at {} failed: {}", offset, e);
            return false;
        }
        true
    }
}
