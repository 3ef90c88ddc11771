//! LMDB-backed append-only audit log.
//!
//! Entries are stored as JSON under big-endian sequence keys so a cursor
//! walks them in append order. The next sequence number lives in a separate
//! `meta` database and is advanced in the same write transaction as the
//! entries, so a batch is either fully written or not at all.

use std::fs;
use std::path::{Path, PathBuf};

use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use log::{info, warn};

use crate::audit::{AuditEntry, AuditSink};
use crate::error::{Result, SyncError};

const ENTRIES_DB: &str = "audit_entries";
const META_DB: &str = "audit_meta";
const NEXT_SEQ_KEY: &str = "next_seq";

pub struct LmdbAuditSink {
    env: Environment,
    entries: Database,
    meta: Database,
    path: PathBuf,
}

impl LmdbAuditSink {
    /// Opens (or creates) the audit log in directory `path`.
    pub fn open(path: &Path, map_size: usize) -> Result<Self> {
        fs::create_dir_all(path)?;
        info!("Opening audit log at: {}", path.display());

        let env = Environment::new()
            .set_max_dbs(2)
            .set_map_size(map_size)
            .open(path)
            .map_err(|e| {
                warn!("Failed to open audit log at {}: {e}", path.display());
                SyncError::Storage(e)
            })?;

        let entries = env.create_db(Some(ENTRIES_DB), DatabaseFlags::empty())?;
        let meta = env.create_db(Some(META_DB), DatabaseFlags::empty())?;

        Ok(Self {
            env,
            entries,
            meta,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored entry with its sequence number, oldest first.
    pub fn entries(&self) -> Result<Vec<(u64, AuditEntry)>> {
        let txn = self.env.begin_ro_txn()?;
        let mut out = Vec::new();
        {
            let mut cursor = txn.open_ro_cursor(self.entries)?;
            // `iter_start` panics on an empty database; `iter` just yields nothing.
            for (key, value) in cursor.iter() {
                let seq = decode_seq(key)?;
                let entry: AuditEntry = serde_json::from_slice(value)?;
                out.push((seq, entry));
            }
        }
        txn.commit()?;
        Ok(out)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn write(&self, batch: &[AuditEntry]) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;

        let mut seq = match txn.get(self.meta, &NEXT_SEQ_KEY) {
            Ok(bytes) => decode_seq(bytes)?,
            Err(lmdb::Error::NotFound) => 1,
            Err(e) => return Err(e.into()),
        };

        for entry in batch {
            let json = serde_json::to_vec(entry)?;
            txn.put(self.entries, &seq.to_be_bytes(), &json, WriteFlags::APPEND)?;
            seq += 1;
        }

        txn.put(self.meta, &NEXT_SEQ_KEY, &seq.to_be_bytes(), WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }
}

impl AuditSink for LmdbAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.write(std::slice::from_ref(entry))
    }

    fn append_batch(&self, entries: &[AuditEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.write(entries)
    }
}

fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| SyncError::Internal(format!("corrupt audit sequence key of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}
