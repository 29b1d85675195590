//! Segments: bounded, append-only windows of the index space.
//!
//! A [`Segment`] owns its backing bytes (a file or a heap buffer), its
//! descriptor and an in-memory offset index. It is shared behind an `Arc`
//! between the log's chain, the tail writer, readers and compaction; the
//! file of a retired segment is deleted once the last holder drops it.
//!
//! Readers only look at bytes below `committed_len`, which the writer
//! advances after a record is fully written.

mod reader;
mod replay;
mod writer;

pub use reader::SegmentReader;
pub use replay::{replay, ReplayStop, SegmentRecovery};
pub use writer::SegmentWriter;

use crate::config::StorageLevel;
use crate::format::{
    parse_header, DescriptorError, HeaderParse, SegmentDescriptor, DESCRIPTOR_SIZE,
    MAX_HEADER_SIZE,
};
use parking_lot::{Mutex, RwLock};
use replog_core::{EntryRegistry, Error, Indexed, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Location of one record inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetEntry {
    /// Entry index
    pub index: u64,
    /// Byte offset of the record
    pub offset: u64,
    /// Entry term
    pub term: u64,
    /// Record size in bytes
    pub size: u32,
}

enum Store {
    Memory(RwLock<Vec<u8>>),
    Disk { path: PathBuf, file: Mutex<File> },
}

impl Store {
    fn len(&self) -> io::Result<u64> {
        match self {
            Store::Memory(buf) => Ok(buf.read().len() as u64),
            Store::Disk { file, .. } => Ok(file.lock().metadata()?.len()),
        }
    }

    fn read_exact_at(&self, pos: u64, out: &mut [u8]) -> io::Result<()> {
        match self {
            Store::Memory(buf) => {
                let buf = buf.read();
                let start = pos as usize;
                let end = start + out.len();
                if end > buf.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "read past end of segment",
                    ));
                }
                out.copy_from_slice(&buf[start..end]);
                Ok(())
            }
            Store::Disk { file, .. } => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(pos))?;
                file.read_exact(out)
            }
        }
    }

    fn write_all_at(&self, pos: u64, data: &[u8]) -> io::Result<()> {
        match self {
            Store::Memory(buf) => {
                let mut buf = buf.write();
                let start = pos as usize;
                let end = start + data.len();
                if buf.len() < end {
                    buf.resize(end, 0);
                }
                buf[start..end].copy_from_slice(data);
                Ok(())
            }
            Store::Disk { file, .. } => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(pos))?;
                file.write_all(data)
            }
        }
    }

    fn zero_from(&self, pos: u64) -> io::Result<()> {
        match self {
            Store::Memory(buf) => {
                buf.write().truncate(pos as usize);
                Ok(())
            }
            Store::Disk { file, .. } => {
                let mut file = file.lock();
                let len = file.metadata()?.len();
                if len <= pos {
                    return Ok(());
                }
                let zeros = [0u8; 4096];
                file.seek(SeekFrom::Start(pos))?;
                let mut remaining = len - pos;
                while remaining > 0 {
                    let n = remaining.min(zeros.len() as u64) as usize;
                    file.write_all(&zeros[..n])?;
                    remaining -= n as u64;
                }
                file.sync_data()?;
                file.set_len(pos)
            }
        }
    }

    fn sync(&self) -> io::Result<()> {
        match self {
            Store::Memory(_) => Ok(()),
            Store::Disk { file, .. } => file.lock().sync_data(),
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Store::Memory(_) => None,
            Store::Disk { path, .. } => Some(path),
        }
    }
}

/// Result of reading one record at a byte position.
#[derive(Debug)]
pub(crate) enum RecordRead {
    /// A complete, decodable record
    Entry(Indexed),
    /// Index field is zero, or the limit was reached exactly
    End,
    /// The record extends beyond the readable limit
    Partial,
    /// The record is malformed
    Corrupt(String),
    /// The record's type id has no registered codec
    Unregistered(u8),
}

/// A bounded window of the index space.
pub struct Segment {
    descriptor: Mutex<SegmentDescriptor>,
    store: Store,
    offsets: RwLock<Vec<OffsetEntry>>,
    committed_len: AtomicU64,
    generation: AtomicU64,
    retired: AtomicBool,
    deleted: AtomicBool,
}

impl Segment {
    /// Create a new segment and persist its descriptor.
    ///
    /// For disk storage the file `{log_name}-{id}-{version}.log` is created
    /// in `dir`, replacing any leftover file of the same name.
    pub fn create(
        level: StorageLevel,
        dir: &Path,
        log_name: &str,
        descriptor: SegmentDescriptor,
    ) -> Result<Self> {
        let store = match level {
            StorageLevel::Memory => Store::Memory(RwLock::new(Vec::new())),
            StorageLevel::Disk => {
                let path = dir.join(descriptor.file_name(log_name));
                let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(true)
                    .open(&path)?;
                Store::Disk {
                    path,
                    file: Mutex::new(file),
                }
            }
        };
        let segment = Segment::with_store(descriptor, store);
        segment.store.write_all_at(0, &descriptor.to_bytes())?;
        segment.store.sync()?;
        if let Some(path) = segment.store.path() {
            sync_parent(path)?;
        }
        debug!(
            target: "replog::segment",
            id = descriptor.id,
            version = descriptor.version,
            starting_index = descriptor.starting_index,
            "Created segment"
        );
        Ok(segment)
    }

    /// Open an existing segment file and validate its descriptor.
    ///
    /// The offset index is empty until the segment is replayed.
    pub fn open(path: &Path) -> std::result::Result<Self, OpenError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header = [0u8; DESCRIPTOR_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(OpenError::Descriptor(DescriptorError::TooShort(
                    file.metadata()?.len() as usize,
                )))
            }
            Err(e) => return Err(e.into()),
        }
        let descriptor = SegmentDescriptor::from_bytes(&header)?;
        Ok(Segment::with_store(
            descriptor,
            Store::Disk {
                path: path.to_path_buf(),
                file: Mutex::new(file),
            },
        ))
    }

    fn with_store(descriptor: SegmentDescriptor, store: Store) -> Self {
        Segment {
            descriptor: Mutex::new(descriptor),
            store,
            offsets: RwLock::new(Vec::new()),
            committed_len: AtomicU64::new(DESCRIPTOR_SIZE as u64),
            generation: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    /// Snapshot of the descriptor.
    pub fn descriptor(&self) -> SegmentDescriptor {
        *self.descriptor.lock()
    }

    /// Segment id
    pub fn id(&self) -> u64 {
        self.descriptor.lock().id
    }

    /// Descriptor version
    pub fn version(&self) -> u64 {
        self.descriptor.lock().version
    }

    /// Index of the first entry the segment may hold
    pub fn starting_index(&self) -> u64 {
        self.descriptor.lock().starting_index
    }

    /// Whether the segment covers a fixed index range
    pub fn is_sealed(&self) -> bool {
        self.descriptor.lock().is_sealed()
    }

    /// Last index covered by a sealed segment, `None` while open.
    pub fn end_index(&self) -> Option<u64> {
        let d = self.descriptor.lock();
        d.is_sealed().then_some(d.end_index)
    }

    /// Backing file path (disk storage only)
    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// Apply `update` to the descriptor and persist it.
    pub fn update_descriptor(&self, update: impl FnOnce(&mut SegmentDescriptor)) -> Result<()> {
        let mut d = self.descriptor.lock();
        let mut next = *d;
        update(&mut next);
        self.store.write_all_at(0, &next.to_bytes())?;
        self.store.sync()?;
        *d = next;
        Ok(())
    }

    /// Bytes readers may look at.
    pub fn committed_len(&self) -> u64 {
        self.committed_len.load(Ordering::Acquire)
    }

    pub(crate) fn set_committed_len(&self, len: u64) {
        self.committed_len.store(len, Ordering::Release);
    }

    /// Bumped on every writer mutation; compaction compares it before and
    /// after a rewrite.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of entries physically present
    pub fn entry_count(&self) -> usize {
        self.offsets.read().len()
    }

    /// Whether no entries are physically present
    pub fn is_empty(&self) -> bool {
        self.offsets.read().is_empty()
    }

    /// Last physically present entry
    pub fn last_entry(&self) -> Option<OffsetEntry> {
        self.offsets.read().last().copied()
    }

    /// Snapshot of the offset index
    pub fn offsets(&self) -> Vec<OffsetEntry> {
        self.offsets.read().clone()
    }

    /// Offset index entry for `index`
    pub fn locate(&self, index: u64) -> Option<OffsetEntry> {
        let offsets = self.offsets.read();
        offsets
            .binary_search_by_key(&index, |e| e.index)
            .ok()
            .map(|i| offsets[i])
    }

    /// First present entry at or after `index`
    pub fn locate_from(&self, index: u64) -> Option<OffsetEntry> {
        let offsets = self.offsets.read();
        let pos = offsets.partition_point(|e| e.index < index);
        offsets.get(pos).copied()
    }

    pub(crate) fn push_offset(&self, entry: OffsetEntry) {
        self.offsets.write().push(entry);
    }

    pub(crate) fn replace_offsets(&self, offsets: Vec<OffsetEntry>) {
        *self.offsets.write() = offsets;
    }

    /// Keep offsets for indices `<= index`; returns the kept tail entry.
    pub(crate) fn truncate_offsets(&self, index: u64) -> Option<OffsetEntry> {
        let mut offsets = self.offsets.write();
        let keep = offsets.partition_point(|e| e.index <= index);
        offsets.truncate(keep);
        offsets.last().copied()
    }

    /// Read an entry by index. `None` if the index is not physically
    /// present (never written, skipped, or reclaimed).
    pub fn get(&self, index: u64, registry: &EntryRegistry) -> Result<Option<Indexed>> {
        let Some(loc) = self.locate(index) else {
            return Ok(None);
        };
        self.read_located(loc, registry).map(Some)
    }

    pub(crate) fn read_located(&self, loc: OffsetEntry, registry: &EntryRegistry) -> Result<Indexed> {
        match self.read_record(loc.offset, self.committed_len(), loc.term, registry)? {
            RecordRead::Entry(mut indexed) if indexed.index == loc.index => {
                indexed.term = loc.term;
                Ok(indexed)
            }
            RecordRead::Entry(indexed) => Err(Error::corrupted(
                loc.offset,
                format!("expected index {}, found {}", loc.index, indexed.index),
            )),
            RecordRead::Unregistered(type_id) => Err(Error::UnregisteredEntryType(type_id)),
            RecordRead::Corrupt(detail) => Err(Error::corrupted(loc.offset, detail)),
            RecordRead::End | RecordRead::Partial => Err(Error::corrupted(
                loc.offset,
                format!("record for index {} is missing", loc.index),
            )),
        }
    }

    /// Read the record starting at `pos`, looking no further than `limit`.
    ///
    /// `prev_term` is the term inherited by a record that carries no term.
    pub(crate) fn read_record(
        &self,
        pos: u64,
        limit: u64,
        prev_term: u64,
        registry: &EntryRegistry,
    ) -> Result<RecordRead> {
        if pos >= limit {
            return Ok(RecordRead::End);
        }
        let avail = ((limit - pos) as usize).min(MAX_HEADER_SIZE);
        let mut header_buf = [0u8; MAX_HEADER_SIZE];
        self.store.read_exact_at(pos, &mut header_buf[..avail])?;

        let header = match parse_header(&header_buf[..avail]) {
            HeaderParse::Header(header) => header,
            HeaderParse::End => return Ok(RecordRead::End),
            HeaderParse::Incomplete => return Ok(RecordRead::Partial),
            HeaderParse::BadTermFlag(flag) => {
                return Ok(RecordRead::Corrupt(format!("invalid term flag {}", flag)))
            }
        };
        if header.length == 0 {
            return Ok(RecordRead::Corrupt("zero entry length".to_string()));
        }
        let record_len = header.record_len();
        if pos + record_len > limit {
            return Ok(RecordRead::Partial);
        }

        let mut body = vec![0u8; header.length as usize];
        self.store
            .read_exact_at(pos + header.header_len() as u64, &mut body)?;
        let type_id = body[0];
        if !registry.is_registered(type_id) {
            return Ok(RecordRead::Unregistered(type_id));
        }
        match registry.decode(type_id, &body[1..], pos) {
            Ok(entry) => Ok(RecordRead::Entry(Indexed {
                index: header.index,
                term: header.term.unwrap_or(prev_term),
                entry,
                size: record_len as u32,
            })),
            Err(Error::EntryCorrupted { detail, .. }) => Ok(RecordRead::Corrupt(detail)),
            Err(e) => Err(e),
        }
    }

    /// Total bytes in the backing store, including unreplayed trailing bytes.
    pub(crate) fn store_len(&self) -> Result<u64> {
        Ok(self.store.len()?)
    }

    pub(crate) fn write_at(&self, pos: u64, data: &[u8]) -> Result<()> {
        Ok(self.store.write_all_at(pos, data)?)
    }

    /// Zero every byte from `pos` to the end of the backing store.
    pub(crate) fn zero_from(&self, pos: u64) -> Result<()> {
        Ok(self.store.zero_from(pos)?)
    }

    /// Flush written bytes to durable storage.
    pub fn sync(&self) -> Result<()> {
        Ok(self.store.sync()?)
    }

    /// Mark the segment for deletion once the last holder drops it.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Whether the segment has been retired
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Retire the segment and remove its file now.
    ///
    /// Holders keep reading through their open handle on unix.
    pub(crate) fn delete(&self) -> Result<()> {
        self.retire();
        if let Some(path) = self.store.path() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            sync_parent(path)?;
            debug!(target: "replog::segment", path = %path.display(), "Deleted segment");
        }
        self.deleted.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.is_retired() || self.deleted.load(Ordering::Acquire) {
            return;
        }
        if let Some(path) = self.store.path() {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(target: "replog::segment", path = %path.display(), "Deleted retired segment"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    target: "replog::segment",
                    path = %path.display(),
                    error = %e,
                    "Failed to delete retired segment"
                ),
            }
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("descriptor", &self.descriptor())
            .field("entries", &self.entry_count())
            .field("committed_len", &self.committed_len())
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// Errors opening an existing segment file.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The descriptor is invalid
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
}

pub(crate) fn sync_parent(path: &Path) -> io::Result<()> {
    // Directory handles cannot be opened for sync outside unix
    if cfg!(unix) {
        if let Some(parent) = path.parent() {
            if parent.exists() {
                File::open(parent)?.sync_all()?;
            }
        }
    }
    Ok(())
}
