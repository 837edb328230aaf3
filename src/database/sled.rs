use crate::database::{
    Database, DbError, DbResult, ScanIter, Snapshot, Transaction, ensure_absent,
};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

const ENGINE: &str = "sled";

pub struct Sled {
    db: sled::Db,
    snapshots: Mutex<HashSet<u64>>,
    next_snapshot: AtomicU64,
}

impl Sled {
    pub fn open(path: &Path) -> DbResult<Self> {
        ensure_absent(path)?;
        let db = sled::Config::default()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .open()
            .map_err(DbError::engine(ENGINE))?;
        Ok(Sled {
            db,
            snapshots: Mutex::new(HashSet::new()),
            next_snapshot: AtomicU64::new(1),
        })
    }
}

impl Database for Sled {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn init(&self) -> DbResult<()> {
        Ok(())
    }

    fn begin(&self) -> DbResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(SledTxn {
            db: &self.db,
            writes: BTreeMap::new(),
        }))
    }

    // sled has no point-in-time views; snapshot handles are only tracked so
    // that scans under a released handle are rejected like on other engines.
    fn snapshot(&self) -> DbResult<Snapshot> {
        let id = self.next_snapshot.fetch_add(1, Ordering::Relaxed);
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
        Ok(Snapshot(id))
    }

    fn release(&self, snapshot: Snapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&snapshot.0);
    }

    fn scan(
        &self,
        prefix: &[u8],
        upper_bound: &[u8],
        snapshot: Option<&Snapshot>,
    ) -> DbResult<ScanIter<'_>> {
        if let Some(s) = snapshot {
            let open = self
                .snapshots
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&s.0);
            if !open {
                return Err(DbError::UnknownSnapshot(s.0));
            }
        }
        if prefix > upper_bound {
            return Ok(Box::new(std::iter::empty()));
        }
        let iter = self
            .db
            .range(prefix.to_vec()..upper_bound.to_vec())
            .map(|item| {
                item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(DbError::engine(ENGINE))
            });
        Ok(Box::new(iter))
    }

    fn close(&self) -> DbResult<()> {
        self.db.flush().map_err(DbError::engine(ENGINE))?;
        Ok(())
    }
}

/// Buffers writes and applies them as one atomic batch on commit.
pub struct SledTxn<'a> {
    db: &'a sled::Db,
    writes: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Transaction for SledTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.writes.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> DbResult<Vec<u8>> {
        if let Some(v) = self.writes.get(key) {
            return Ok(v.clone());
        }
        match self.db.get(key).map_err(DbError::engine(ENGINE))? {
            Some(v) => Ok(v.to_vec()),
            None => Err(DbError::NotFound),
        }
    }

    fn commit(self: Box<Self>) -> DbResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let mut batch = sled::Batch::default();
        for (k, v) in self.writes {
            batch.insert(k, v);
        }
        self.db.apply_batch(batch).map_err(DbError::engine(ENGINE))
    }
}
