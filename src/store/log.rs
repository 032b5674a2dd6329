//! Append-only, checksummed row log.
//!
//! Every write is one framed entry: a little-endian `u32` length, the
//! MessagePack-encoded [`LogEntry`], and a CRC32 of the encoded bytes.
//! Opening the store replays all entries into [`Tables`].

use super::table::{Order, Row, RowId, TableSchema, Tables, Values};
use super::{CompactionStats, RowStore, StoreProvider};
use crate::error::{Result, StoreError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Magic bytes for the row log.
const LOG_MAGIC: &[u8; 4] = b"PPL\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Magic plus version.
const HEADER_SIZE: u64 = 5;

const LOG_HEADER: [u8; HEADER_SIZE as usize] =
    [LOG_MAGIC[0], LOG_MAGIC[1], LOG_MAGIC[2], LOG_MAGIC[3], LOG_VERSION];

/// Length prefix plus checksum.
const FRAME_OVERHEAD: u64 = 8;

/// Sanity limit for a single entry.
const MAX_ENTRY_SIZE: usize = 16 * 1024 * 1024;

/// A logged write.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) enum LogEntry {
    CreateTable { schema: TableSchema },
    Insert { table: String, id: RowId, values: Values },
    Update { table: String, id: RowId, values: Values },
    Delete { table: String, id: RowId },
    /// Keeps the id counter monotonic after compaction dropped deleted rows.
    Reserve { table: String, next_id: RowId },
}

/// Result of reading one frame.
enum Frame {
    Entry { entry: LogEntry, size: u64 },
    End,
    Torn,
}

/// File-backed row store.
pub struct LogStore {
    /// Path to the log file.
    path: PathBuf,

    /// Log file handle.
    file: File,

    /// Lock file held for the lifetime of the store.
    lock_file: File,

    /// Replayed table state.
    tables: Tables,

    /// Current file size (for appending).
    file_size: u64,

    /// Number of entries in the file.
    entry_count: u64,

    /// Number of writes since last sync.
    writes_since_sync: u64,

    /// Sync every N writes.
    sync_interval: u64,
}

impl LogStore {
    /// Sync on every write.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 1;

    /// Open or create a row log that syncs on every write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a row log with a custom sync interval.
    /// - sync_interval = 0 or 1: sync every write
    /// - sync_interval = 100: sync every 100 writes (faster, a crash may lose
    ///   the unsynced tail)
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let lock_file = Self::acquire_lock(&path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE {
            Self::write_header(&mut file, &path, file_size)?;
            file_size = HEADER_SIZE;
        }

        let (tables, entry_count, good_size) = Self::replay(&file)?;
        if good_size < file_size {
            warn!(
                path = %path.display(),
                discarded_bytes = file_size - good_size,
                "Truncating torn entry at end of row log"
            );
            file.set_len(good_size)?;
            file.sync_all()?;
            file_size = good_size;
        }

        debug!(path = %path.display(), entries = entry_count, "Opened row log");

        Ok(Self {
            path,
            file,
            lock_file,
            tables,
            file_size,
            entry_count,
            writes_since_sync: 0,
            sync_interval: sync_interval.max(1),
        })
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Number of entries in the log.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    fn lock_path(path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(Self::lock_path(path))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }

    /// Write the header into a new file, or one whose header creation was
    /// interrupted. Anything that is not a prefix of the header is rejected.
    fn write_header(file: &mut File, path: &Path, existing: u64) -> Result<()> {
        if existing > 0 {
            let mut partial = vec![0u8; existing as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut partial)?;
            if !LOG_HEADER.starts_with(&partial) {
                return Err(StoreError::InvalidFormat("Invalid row log magic".into()));
            }
            warn!(path = %path.display(), "Rewriting torn row log header");
            file.set_len(0)?;
        }

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&LOG_HEADER)?;
        file.sync_all()?;
        Ok(())
    }

    /// Replay all entries. Returns the tables, the entry count and the size
    /// of the valid prefix of the file.
    fn replay(file: &File) -> Result<(Tables, u64, u64)> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid row log magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported row log version: {}",
                version[0]
            )));
        }

        let mut tables = Tables::new();
        let mut entries = 0u64;
        let mut offset = HEADER_SIZE;

        loop {
            match Self::read_frame(&mut reader)? {
                Frame::Entry { entry, size } => {
                    Self::apply(&mut tables, entry)?;
                    entries += 1;
                    offset += size;
                }
                Frame::End | Frame::Torn => break,
            }
        }

        Ok((tables, entries, offset))
    }

    fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
        let mut len_bytes = [0u8; 4];
        match read_full(reader, &mut len_bytes)? {
            0 => return Ok(Frame::End),
            4 => {}
            _ => return Ok(Frame::Torn),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        // Encoded entries are never empty; a zero length is unwritten space
        if len == 0 {
            return Ok(Frame::Torn);
        }
        if len > MAX_ENTRY_SIZE {
            return Err(StoreError::Corruption("Row log entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        if read_full(reader, &mut encoded)? < len {
            return Ok(Frame::Torn);
        }

        let mut checksum_bytes = [0u8; 4];
        if read_full(reader, &mut checksum_bytes)? < 4 {
            return Ok(Frame::Torn);
        }
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&encoded);

        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let entry = rmp_serde::from_slice(&encoded)?;
        Ok(Frame::Entry {
            entry,
            size: FRAME_OVERHEAD + len as u64,
        })
    }

    fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;

        let mut frame = Vec::with_capacity(encoded.len() + FRAME_OVERHEAD as usize);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    /// Apply a logged entry to the tables.
    fn apply(tables: &mut Tables, entry: LogEntry) -> Result<()> {
        match entry {
            LogEntry::CreateTable { schema } => {
                tables.prepare_create(&schema).map_err(|e| {
                    StoreError::Corruption(format!("Conflicting table definition: {}", e))
                })?;
                tables.apply_create(schema);
            }
            LogEntry::Insert { table, id, values } => {
                Self::require_table(tables, &table)?;
                tables.apply_insert(&table, id, values);
            }
            LogEntry::Update { table, id, values } => {
                Self::require_table(tables, &table)?;
                tables.apply_update(&table, values, id);
            }
            LogEntry::Delete { table, id } => {
                Self::require_table(tables, &table)?;
                tables.apply_delete(&table, id);
            }
            LogEntry::Reserve { table, next_id } => {
                Self::require_table(tables, &table)?;
                tables.apply_reserve(&table, next_id);
            }
        }
        Ok(())
    }

    fn require_table(tables: &Tables, table: &str) -> Result<()> {
        tables
            .get(table)
            .map(|_| ())
            .map_err(|_| StoreError::Corruption(format!("Entry for unknown table {}", table)))
    }

    /// Append an entry durably, then apply it in memory.
    ///
    /// On a failed write or sync the file is cut back to its previous length
    /// and memory is left untouched.
    fn commit(&mut self, entry: LogEntry) -> Result<()> {
        let frame = Self::encode_frame(&entry)?;

        let needs_sync = self.writes_since_sync + 1 >= self.sync_interval;
        if let Err(e) = write_at(&mut self.file, self.file_size, &frame, needs_sync) {
            self.discard_uncommitted();
            return Err(e.into());
        }

        self.file_size += frame.len() as u64;
        self.entry_count += 1;
        self.writes_since_sync = if needs_sync { 0 } else { self.writes_since_sync + 1 };

        Self::apply(&mut self.tables, entry)
    }

    /// Cut the file back to the last committed entry.
    ///
    /// Bytes left past `file_size` are overwritten by the next append and
    /// dropped as a torn tail on replay, so a failure here is only logged.
    fn discard_uncommitted(&mut self) {
        if let Err(e) = self.file.set_len(self.file_size) {
            warn!(
                path = %self.path.display(),
                committed_size = self.file_size,
                error = %e,
                "Failed to truncate partial row log entry"
            );
        }
    }

    /// Write a fresh log holding only live rows into `tmp`. Returns the open
    /// handle, the entry count and the size of the new log.
    fn write_compacted(&self, tmp: &Path) -> Result<(File, u64, u64)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp)?;

        file.write_all(&LOG_HEADER)?;
        let mut size = HEADER_SIZE;

        let mut tables: Vec<_> = self.tables.iter().collect();
        tables.sort_by(|a, b| a.schema().name.cmp(&b.schema().name));

        let mut entries = 0u64;
        for table in tables {
            let name = table.schema.name.clone();
            let mut batch = vec![
                LogEntry::CreateTable {
                    schema: table.schema.clone(),
                },
                LogEntry::Reserve {
                    table: name.clone(),
                    next_id: table.next_id,
                },
            ];
            batch.extend(table.rows.iter().map(|(id, values)| LogEntry::Insert {
                table: name.clone(),
                id: *id,
                values: values.clone(),
            }));

            for entry in &batch {
                let frame = Self::encode_frame(entry)?;
                file.write_all(&frame)?;
                size += frame.len() as u64;
                entries += 1;
            }
        }

        file.sync_all()?;
        Ok((file, entries, size))
    }
}

impl RowStore for LogStore {
    fn create_table(&mut self, schema: &TableSchema) -> Result<bool> {
        if !self.tables.prepare_create(schema)? {
            return Ok(false);
        }
        self.commit(LogEntry::CreateTable {
            schema: schema.clone(),
        })?;
        Ok(true)
    }

    fn query(&self, table: &str, columns: &[&str], order: Order) -> Result<Vec<Row>> {
        self.tables.query(table, columns, order)
    }

    fn insert(&mut self, table: &str, values: Values) -> Result<RowId> {
        let id = self.tables.prepare_insert(table, &values)?;
        self.commit(LogEntry::Insert {
            table: table.to_string(),
            id,
            values,
        })?;
        Ok(id)
    }

    fn update(&mut self, table: &str, values: Values, id: RowId) -> Result<usize> {
        if !self.tables.prepare_update(table, &values, id)? {
            return Ok(0);
        }
        self.commit(LogEntry::Update {
            table: table.to_string(),
            id,
            values,
        })?;
        Ok(1)
    }

    fn delete(&mut self, table: &str, id: RowId) -> Result<usize> {
        if !self.tables.prepare_delete(table, id)? {
            return Ok(0);
        }
        self.commit(LogEntry::Delete {
            table: table.to_string(),
            id,
        })?;
        Ok(1)
    }

    fn compact(&mut self) -> Result<CompactionStats> {
        let entries_before = self.entry_count;
        let bytes_before = self.file_size;

        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".compact");
        let tmp = PathBuf::from(tmp);

        // Once renamed, writes must go through the handle on the new log
        let renamed = self.write_compacted(&tmp).and_then(|written| {
            fs::rename(&tmp, &self.path)?;
            Ok(written)
        });
        let (file, entries_after, bytes_after) = match renamed {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };

        self.file = file;
        self.file_size = bytes_after;
        self.entry_count = entries_after;
        self.writes_since_sync = 0;

        sync_parent_dir(&self.path)?;

        let stats = CompactionStats {
            entries_before,
            entries_after,
            bytes_before,
            bytes_after: self.file_size,
        };
        info!(
            path = %self.path.display(),
            entries_before = stats.entries_before,
            entries_after = stats.entries_after,
            "Compacted row log"
        );
        Ok(stats)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.sync()?;
        self.lock_file.unlock()?;
        Ok(())
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        if self.writes_since_sync > 0 {
            let _ = self.file.sync_all();
        }
    }
}

fn write_at(file: &mut File, offset: u64, frame: &[u8], sync: bool) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(frame)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

/// Make a rename inside the log's directory durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Read until `buf` is full or the reader is exhausted. Returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Opens [`LogStore`]s.
#[derive(Clone, Debug)]
pub struct LogStoreProvider {
    sync_interval: u64,
}

impl LogStoreProvider {
    pub fn new(sync_interval: u64) -> Self {
        Self { sync_interval }
    }
}

impl Default for LogStoreProvider {
    fn default() -> Self {
        Self::new(LogStore::DEFAULT_SYNC_INTERVAL)
    }
}

impl StoreProvider for LogStoreProvider {
    fn open(&self, location: &Path) -> Result<Box<dyn RowStore>> {
        Ok(Box::new(LogStore::open_with_sync_interval(
            location,
            self.sync_interval,
        )?))
    }
}
