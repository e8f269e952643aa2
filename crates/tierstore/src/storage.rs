//! Storage engine implementation
//!
//! File layout:
//! - `db.toon`: Data file with TOON header + rows
//! - `db.toon.idx`: Index file mapping row IDs to offsets
//!
//! Rows are append-only. Updates append a new live row for the same id,
//! deletes append a tombstone. The live map always points at the newest
//! row for each `(namespace, id)`.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::RandomState;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::{Error, Result};
use crate::parser::{
    create_header, format_row, parse_header, parse_line, parse_row, Row, TOON_IDX_MAGIC,
    TOON_MAGIC,
};
use crate::record::{Mutation, QuerySignature, Record, Value};
use crate::Persistence;

/// Maximum row size (1 MB)
const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Maximum database size (1 GB)
const MAX_DB_SIZE: u64 = 1024 * 1024 * 1024;

/// Current data file format version
const FORMAT_VERSION: u32 = 1;

/// How a mapped statement resolves its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Single integer parameter matched against the `id` field
    ById,
    /// Single parameter matched against the named field; lowest id wins
    ByField(String),
}

type LiveMap = HashMap<String, BTreeMap<i64, u64>, RandomState>;

struct Inner {
    data_file: File,
    idx_file: File,
    /// row_id -> offset in data file
    index: Vec<u64>,
    /// namespace -> id -> row_id of the newest live row
    live: LiveMap,
    db_size: u64,
    closed: bool,
}

/// File-backed record store
pub struct RecordStore {
    /// Path to the database directory
    path: PathBuf,

    /// Files, index and live map under one lock
    inner: RwLock<Inner>,

    /// (namespace, statement) -> lookup strategy
    statements: RwLock<HashMap<(String, String), Lookup, RandomState>>,
}

impl RecordStore {
    /// Open or create a store at the given path
    ///
    /// # Arguments
    /// * `path` - Directory path for the database files
    ///
    /// # Returns
    /// * `Result<RecordStore>` - Store handle
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let data_path = path.join("db.toon");
        let idx_path = path.join("db.toon.idx");

        let inner = if data_path.exists() {
            Self::open_existing(&data_path, &idx_path)?
        } else {
            Self::create_new(&data_path, &idx_path)?
        };

        Ok(RecordStore {
            path: path.to_path_buf(),
            inner: RwLock::new(inner),
            statements: RwLock::new(HashMap::with_hasher(RandomState::new())),
        })
    }

    fn open_existing(data_path: &Path, idx_path: &Path) -> Result<Inner> {
        let mut data_file = OpenOptions::new().read(true).write(true).open(data_path)?;

        let mut idx_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(idx_path)?;

        let mut header_buf = vec![0u8; TOON_MAGIC.len() + 8];
        data_file.read_exact(&mut header_buf)?;
        let header = parse_header(&header_buf)?;
        if header.version != FORMAT_VERSION {
            return Err(Error::Parse(format!(
                "Unsupported format version {}",
                header.version
            )));
        }

        let indexed = Self::read_index(&mut idx_file)?;

        // Replay every row; the index file only covers rows flushed on close
        let mut body = Vec::new();
        data_file.read_to_end(&mut body)?;

        // A crash mid-append can leave a final row without its newline
        let complete = body.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1);
        if complete < body.len() {
            warn!(
                offset = header_buf.len() + complete,
                bytes = body.len() - complete,
                "dropping unterminated row at end of data file"
            );
            data_file.set_len((header_buf.len() + complete) as u64)?;
            body.truncate(complete);
        }

        let mut index = Vec::new();
        let mut live: LiveMap = HashMap::with_hasher(RandomState::new());
        let mut offset = header_buf.len() as u64;
        let mut rest: &[u8] = &body;
        while !rest.is_empty() {
            let (remaining, line) = parse_line(rest)?;
            let row_id = index.len() as u64;
            index.push(offset);
            Self::apply_row(&mut live, parse_row(line)?, row_id)?;
            offset += line.len() as u64 + 1;
            rest = remaining;
        }

        if indexed.len() > index.len() || indexed[..] != index[..indexed.len()] {
            return Err(Error::Parse(
                "Index file does not match data file".to_string(),
            ));
        }

        Ok(Inner {
            data_file,
            idx_file,
            index,
            live,
            db_size: offset,
            closed: false,
        })
    }

    fn read_index(idx_file: &mut File) -> Result<Vec<u64>> {
        if idx_file.metadata()?.len() == 0 {
            return Ok(Vec::new());
        }

        let mut idx_magic = vec![0u8; TOON_IDX_MAGIC.len()];
        idx_file.read_exact(&mut idx_magic)?;
        if idx_magic != TOON_IDX_MAGIC {
            return Err(Error::Parse("Invalid index file magic".to_string()));
        }

        let mut count_buf = [0u8; 4];
        idx_file.read_exact(&mut count_buf)?;
        let count = u32::from_le_bytes(count_buf);

        let mut offsets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut offset_buf = [0u8; 8];
            idx_file.read_exact(&mut offset_buf)?;
            offsets.push(u64::from_le_bytes(offset_buf));
        }
        Ok(offsets)
    }

    fn create_new(data_path: &Path, idx_path: &Path) -> Result<Inner> {
        let mut data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_path)?;

        let mut idx_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(idx_path)?;

        let header = create_header(FORMAT_VERSION, 0);
        data_file.write_all(&header)?;

        idx_file.write_all(TOON_IDX_MAGIC)?;
        idx_file.write_all(&0u32.to_le_bytes())?;

        Ok(Inner {
            data_file,
            idx_file,
            index: Vec::new(),
            live: HashMap::with_hasher(RandomState::new()),
            db_size: header.len() as u64,
            closed: false,
        })
    }

    fn apply_row(live: &mut LiveMap, row: Row, row_id: u64) -> Result<()> {
        let id = row.record.id().ok_or(Error::MissingId)?;
        if row.live {
            live.entry(row.namespace).or_default().insert(id, row_id);
        } else if let Some(ids) = live.get_mut(&row.namespace) {
            ids.remove(&id);
        }
        Ok(())
    }

    /// Directory this store lives in
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map a statement name in a namespace to a lookup strategy
    ///
    /// Re-mapping an existing statement replaces its strategy.
    pub fn map_statement(&self, namespace: &str, statement: &str, lookup: Lookup) {
        self.statements
            .write()
            .insert((namespace.to_string(), statement.to_string()), lookup);
    }

    fn append(inner: &mut Inner, namespace: &str, live: bool, record: &Record) -> Result<u64> {
        let line = format_row(namespace, live, record)?;
        if line.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge(line.len()));
        }
        if inner.db_size + line.len() as u64 + 1 > MAX_DB_SIZE {
            return Err(Error::DatabaseFull(inner.db_size));
        }

        let offset = inner.data_file.seek(SeekFrom::End(0))?;
        let written = inner
            .data_file
            .write_all(&line)
            .and_then(|_| inner.data_file.write_all(b"\n"));
        if let Err(e) = written {
            // Leave no partial row behind for the next append to join onto
            if let Err(truncate) = inner.data_file.set_len(offset) {
                warn!(offset, "failed to roll back partial row: {}", truncate);
            }
            return Err(e.into());
        }

        let row_id = inner.index.len() as u64;
        inner.index.push(offset);
        inner.db_size = offset + line.len() as u64 + 1;

        Ok(row_id)
    }

    fn read_row(inner: &mut Inner, row_id: u64) -> Result<Row> {
        let offset = inner.index[row_id as usize];
        let next_offset = inner
            .index
            .get(row_id as usize + 1)
            .copied()
            .unwrap_or(inner.db_size);

        inner.data_file.seek(SeekFrom::Start(offset))?;
        let mut line = vec![0u8; (next_offset - offset - 1) as usize];
        inner.data_file.read_exact(&mut line)?;

        parse_row(&line)
    }

    fn is_live(inner: &Inner, namespace: &str, id: i64) -> bool {
        inner
            .live
            .get(namespace)
            .is_some_and(|ids| ids.contains_key(&id))
    }

    /// Fetch the live record for an id
    pub fn get(&self, namespace: &str, id: i64) -> Result<Option<Record>> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }

        let row_id = match inner.live.get(namespace).and_then(|ids| ids.get(&id)) {
            Some(&row_id) => row_id,
            None => return Ok(None),
        };
        Ok(Some(Self::read_row(&mut inner, row_id)?.record))
    }

    fn find_by_field(
        &self,
        namespace: &str,
        field: &str,
        wanted: &Value,
    ) -> Result<Option<Record>> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }

        let row_ids: Vec<u64> = match inner.live.get(namespace) {
            Some(ids) => ids.values().copied().collect(),
            None => return Ok(None),
        };
        for row_id in row_ids {
            let row = Self::read_row(&mut inner, row_id)?;
            if row.record.get(field) == Some(wanted) {
                return Ok(Some(row.record));
            }
        }
        Ok(None)
    }

    /// Apply a mutation, returning the number of rows affected
    pub fn apply(&self, mutation: &Mutation) -> Result<u64> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }

        match mutation {
            Mutation::Insert { namespace, record } => {
                let id = record.id().ok_or(Error::MissingId)?;
                if Self::is_live(&inner, namespace, id) {
                    return Err(Error::Duplicate {
                        namespace: namespace.clone(),
                        id,
                    });
                }
                let row_id = Self::append(&mut inner, namespace, true, record)?;
                inner.live.entry(namespace.clone()).or_default().insert(id, row_id);
                Ok(1)
            }
            Mutation::Update { namespace, record } => {
                let id = record.id().ok_or(Error::MissingId)?;
                if !Self::is_live(&inner, namespace, id) {
                    return Ok(0);
                }
                let row_id = Self::append(&mut inner, namespace, true, record)?;
                inner.live.entry(namespace.clone()).or_default().insert(id, row_id);
                Ok(1)
            }
            Mutation::Delete { namespace, id } => {
                if !Self::is_live(&inner, namespace, *id) {
                    return Ok(0);
                }
                let tombstone = Record::new().with("id", *id);
                Self::append(&mut inner, namespace, false, &tombstone)?;
                if let Some(ids) = inner.live.get_mut(namespace) {
                    ids.remove(id);
                }
                Ok(1)
            }
        }
    }

    /// Number of live records in a namespace
    pub fn count(&self, namespace: &str) -> usize {
        self.inner
            .read()
            .live
            .get(namespace)
            .map_or(0, BTreeMap::len)
    }

    /// Get the number of rows (including superseded rows and tombstones)
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().index.is_empty()
    }

    /// Close the store and fsync all changes
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }

        let row_count = inner.index.len() as u32;

        inner
            .data_file
            .seek(SeekFrom::Start(TOON_MAGIC.len() as u64 + 4))?;
        inner.data_file.write_all(&row_count.to_le_bytes())?;
        inner.data_file.sync_all()?;

        let mut idx = Vec::with_capacity(TOON_IDX_MAGIC.len() + 4 + inner.index.len() * 8);
        idx.extend_from_slice(TOON_IDX_MAGIC);
        idx.extend_from_slice(&row_count.to_le_bytes());
        for offset in &inner.index {
            idx.extend_from_slice(&offset.to_le_bytes());
        }
        inner.idx_file.set_len(0)?;
        inner.idx_file.seek(SeekFrom::Start(0))?;
        inner.idx_file.write_all(&idx)?;
        inner.idx_file.sync_all()?;

        inner.closed = true;

        Ok(())
    }
}

impl Persistence for RecordStore {
    fn fetch(&self, signature: &QuerySignature) -> Result<Option<Record>> {
        let lookup = self
            .statements
            .read()
            .get(&(
                signature.namespace().to_string(),
                signature.statement().to_string(),
            ))
            .cloned()
            .ok_or_else(|| Error::UnknownStatement {
                namespace: signature.namespace().to_string(),
                statement: signature.statement().to_string(),
            })?;

        match (lookup, signature.params()) {
            (Lookup::ById, [Value::Int(id)]) => self.get(signature.namespace(), *id),
            (Lookup::ById, params) => Err(Error::BadParameters(format!(
                "{} expects one integer id, got {} params",
                signature,
                params.len()
            ))),
            (Lookup::ByField(field), [wanted]) => {
                self.find_by_field(signature.namespace(), &field, wanted)
            }
            (Lookup::ByField(_), params) => Err(Error::BadParameters(format!(
                "{} expects one parameter, got {}",
                signature,
                params.len()
            ))),
        }
    }

    fn execute(&self, mutation: &Mutation) -> Result<u64> {
        self.apply(mutation)
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
