use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;

/// A key-value storage used to persist compiled kernel binaries across
/// process runs. Nothing is durable until `flush` returns.
pub trait KvStorage: Send {
    fn load(&mut self) -> Result<()>;

    /// returns false if the key was already present; the value is replaced
    /// either way.
    fn insert(&mut self, key: &str, value: Vec<u8>) -> bool;

    fn find(&self, key: &str) -> Option<&[u8]>;

    fn flush(&mut self) -> Result<()>;
}

pub trait KvStorageFactory: Send + Sync {
    fn create_storage(&self, name: &str) -> Box<dyn KvStorage>;
}

/// Creates one storage file per name inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorageFactory {
    dir: PathBuf,
}

impl FileStorageFactory {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl KvStorageFactory for FileStorageFactory {
    fn create_storage(&self, name: &str) -> Box<dyn KvStorage> {
        Box::new(FileStorage::new(self.dir.join(name)))
    }
}

// The file layout is a little endian u32 entry count, followed by the entries,
// each as u32 key length, key bytes, u32 value length, value bytes.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: HashMap<String, Vec<u8>>,
    dirty: bool,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            data: HashMap::new(),
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn decode(&self, buf: &[u8]) -> Result<HashMap<String, Vec<u8>>> {
        let corrupted = |what: &str| {
            Error::from((
                ErrorKind::IOError,
                format!(
                    "corrupted kv storage file {}: {}",
                    self.path.display(),
                    what
                ),
            ))
        };

        let mut r = Cursor::new(buf);
        let count = r
            .read_u32::<LittleEndian>()
            .map_err(|err| corrupted("missing entry count").with_cause(err))?;
        // the header is untrusted, so nothing is sized from it up front
        let mut data = HashMap::new();
        for _ in 0..count {
            let key = read_chunk(&mut r).ok_or_else(|| corrupted("truncated key"))?;
            let value = read_chunk(&mut r).ok_or_else(|| corrupted("truncated value"))?;
            let key = String::from_utf8(key.to_vec()).map_err(|err| {
                Error::from((
                    ErrorKind::IOError,
                    format!("invalid key in kv storage file {}", self.path.display()),
                ))
                .with_cause(err)
            })?;
            data.insert(key, value.to_vec());
        }
        Ok(data)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut keys = self.data.keys().collect::<Vec<_>>();
        keys.sort();

        let mut w = Vec::new();
        w.write_u32::<LittleEndian>(keys.len() as u32)?;
        for key in keys {
            let value = &self.data[key];
            w.write_u32::<LittleEndian>(key.len() as u32)?;
            w.write_all(key.as_bytes())?;
            w.write_u32::<LittleEndian>(value.len() as u32)?;
            w.write_all(value)?;
        }
        Ok(w)
    }
}

/// Reads a u32 length prefixed chunk, or None if the length runs past the end.
pub(crate) fn read_chunk<'a>(r: &mut Cursor<&'a [u8]>) -> Option<&'a [u8]> {
    let len = r.read_u32::<LittleEndian>().ok()? as usize;
    let buf: &'a [u8] = *r.get_ref();
    let start = r.position() as usize;
    let end = start.checked_add(len)?;
    let chunk = buf.get(start..end)?;
    r.set_position(end as u64);
    Some(chunk)
}

impl KvStorage for FileStorage {
    fn load(&mut self) -> Result<()> {
        let buf = match fs::read(&self.path) {
            Ok(buf) => buf,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        self.data = self.decode(&buf)?;
        self.dirty = false;
        tracing::debug!(
            path = %self.path.display(),
            entries = self.data.len(),
            "loaded kv storage"
        );
        Ok(())
    }

    fn insert(&mut self, key: &str, value: Vec<u8>) -> bool {
        self.dirty = true;
        self.data.insert(key.to_string(), value).is_none()
    }

    fn find(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(|v| v.as_slice())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        // write aside and rename, so a crash never leaves a truncated file behind
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, self.encode()?)?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        tracing::debug!(
            path = %self.path.display(),
            entries = self.data.len(),
            "flushed kv storage"
        );
        Ok(())
    }
}
