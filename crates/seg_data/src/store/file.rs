//! Persistent store: a directory holding one append-only data file.
//!
//! ```text
//! <root>/records.bin
//!   header : b"SGR1" | version: u32 LE
//!   entry* : key_len: u32 LE | value_len: u32 LE | key | value
//! ```
//!
//! Cursors scan the file once to build a key index (later entries for the
//! same key win) and then read values lazily by offset.

use super::{Cursor, OpenMode, RecordStore, Transaction};
use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const DATA_FILE: &str = "records.bin";
const MAGIC: &[u8; 4] = b"SGR1";
const STORE_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    data_path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let data_path = root.join(DATA_FILE);
        match mode {
            OpenMode::New => {
                if root.exists() {
                    return Err(PipelineError::store(&root, "path already exists"));
                }
                fs::create_dir_all(&root).map_err(|e| PipelineError::io(&root, e))?;
                let mut file = File::create(&data_path).map_err(|e| PipelineError::io(&data_path, e))?;
                let mut header = Vec::with_capacity(HEADER_LEN as usize);
                header.extend_from_slice(MAGIC);
                header.extend_from_slice(&STORE_VERSION.to_le_bytes());
                file.write_all(&header)
                    .map_err(|e| PipelineError::io(&data_path, e))?;
            }
            OpenMode::Read => {
                if !root.is_dir() {
                    return Err(PipelineError::store(&root, "not a store directory"));
                }
                if !data_path.is_file() {
                    return Err(PipelineError::store(&root, "missing data file"));
                }
                let mut file = File::open(&data_path).map_err(|e| PipelineError::io(&data_path, e))?;
                check_header(&mut file, &data_path)?;
            }
        }
        Ok(Self { root, data_path })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn check_header(file: &mut File, path: &Path) -> Result<()> {
    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header)
        .map_err(|_| PipelineError::store(path, "data file too small"))?;
    if &header[0..4] != MAGIC {
        return Err(PipelineError::store(path, "bad magic in data file"));
    }
    let version = read_u32_le(&header[4..8]);
    if version != STORE_VERSION {
        return Err(PipelineError::store(
            path,
            format!("store version mismatch {} vs {}", version, STORE_VERSION),
        ));
    }
    Ok(())
}

fn read_u32_le(data: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(data);
    u32::from_le_bytes(arr)
}

impl RecordStore for FileStore {
    fn cursor(&self) -> Result<Box<dyn Cursor>> {
        Ok(Box::new(FileCursor::new(&self.data_path)?))
    }

    fn transaction(&self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(FileTransaction {
            store: self,
            pending: Vec::new(),
        }))
    }
}

struct FileTransaction<'a> {
    store: &'a FileStore,
    pending: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Transaction for FileTransaction<'_> {
    fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.pending.push((key.to_vec(), value));
    }

    fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let path = &self.store.data_path;
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| PipelineError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        for (key, value) in self.pending.drain(..) {
            let key_len = u32::try_from(key.len())
                .map_err(|_| PipelineError::store(path, "key longer than u32::MAX"))?;
            let value_len = u32::try_from(value.len())
                .map_err(|_| PipelineError::store(path, "value longer than u32::MAX"))?;
            writer
                .write_all(&key_len.to_le_bytes())
                .and_then(|_| writer.write_all(&value_len.to_le_bytes()))
                .and_then(|_| writer.write_all(&key))
                .and_then(|_| writer.write_all(&value))
                .map_err(|e| PipelineError::io(path, e))?;
        }
        writer.flush().map_err(|e| PipelineError::io(path, e))
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}

struct IndexEntry {
    key: Vec<u8>,
    offset: u64,
    len: usize,
}

struct FileCursor {
    path: PathBuf,
    file: File,
    index: Vec<IndexEntry>,
    position: usize,
    value: Vec<u8>,
}

impl FileCursor {
    fn new(path: &Path) -> Result<Self> {
        let index = build_index(path)?;
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let mut cursor = Self {
            path: path.to_path_buf(),
            file,
            index,
            position: 0,
            value: Vec::new(),
        };
        cursor.load_value()?;
        Ok(cursor)
    }

    fn load_value(&mut self) -> Result<()> {
        let Some(entry) = self.index.get(self.position) else {
            self.value.clear();
            return Ok(());
        };
        self.value.resize(entry.len, 0);
        self.file
            .seek(SeekFrom::Start(entry.offset))
            .and_then(|_| self.file.read_exact(&mut self.value))
            .map_err(|e| PipelineError::io(&self.path, e))
    }
}

/// Scans the data file, returning entries sorted by key.
fn build_index(path: &Path) -> Result<Vec<IndexEntry>> {
    let mut file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    check_header(&mut file, path)?;
    let mut reader = BufReader::new(file);
    let mut offsets: BTreeMap<Vec<u8>, (u64, usize)> = BTreeMap::new();
    let mut position = HEADER_LEN;
    loop {
        let mut lens = [0u8; 8];
        match reader.read_exact(&mut lens) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(PipelineError::io(path, e)),
        }
        let key_len = read_u32_le(&lens[0..4]) as usize;
        let value_len = read_u32_le(&lens[4..8]) as usize;
        let mut key = vec![0u8; key_len];
        reader
            .read_exact(&mut key)
            .map_err(|_| PipelineError::store(path, "truncated entry key"))?;
        let value_offset = position + 8 + key_len as u64;
        reader
            .seek_relative(value_len as i64)
            .map_err(|e| PipelineError::io(path, e))?;
        offsets.insert(key, (value_offset, value_len));
        position = value_offset + value_len as u64;
    }
    let file_len = fs::metadata(path)
        .map_err(|e| PipelineError::io(path, e))?
        .len();
    if position > file_len {
        return Err(PipelineError::store(path, "truncated entry value"));
    }
    Ok(offsets
        .into_iter()
        .map(|(key, (offset, len))| IndexEntry { key, offset, len })
        .collect())
}

impl Cursor for FileCursor {
    fn key(&self) -> Option<&[u8]> {
        self.index.get(self.position).map(|e| e.key.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.valid().then_some(self.value.as_slice())
    }

    fn next(&mut self) -> Result<()> {
        if self.position < self.index.len() {
            self.position += 1;
            self.load_value()?;
        }
        Ok(())
    }

    fn valid(&self) -> bool {
        self.position < self.index.len()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.position = 0;
        self.load_value()
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
