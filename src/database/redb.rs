use crate::database::{
    Database, DbError, DbResult, ScanIter, Snapshot, Transaction, ensure_absent,
};
use redb::{ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

const ENGINE: &str = "redb";
static TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("data");

/// Snapshots are held open read transactions. Scans clone the transaction
/// out of the map so the lock is not held while reading.
pub struct Redb {
    db: redb::Database,
    snapshots: Mutex<HashMap<u64, Arc<ReadTransaction>>>,
    next_snapshot: AtomicU64,
}

impl Redb {
    pub fn open(path: &Path) -> DbResult<Self> {
        ensure_absent(path)?;
        let db = redb::Database::create(path).map_err(DbError::engine(ENGINE))?;
        Ok(Redb {
            db,
            snapshots: Mutex::new(HashMap::new()),
            next_snapshot: AtomicU64::new(1),
        })
    }

    fn snapshot_tx(&self, snapshot: &Snapshot) -> DbResult<Arc<ReadTransaction>> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&snapshot.0)
            .cloned()
            .ok_or(DbError::UnknownSnapshot(snapshot.0))
    }
}

fn collect_range(
    tx: &ReadTransaction,
    prefix: &[u8],
    upper_bound: &[u8],
) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let table = tx.open_table(TABLE).map_err(DbError::engine(ENGINE))?;
    let mut items = Vec::new();
    for item in table
        .range(prefix..upper_bound)
        .map_err(DbError::engine(ENGINE))?
    {
        let (k, v) = item.map_err(DbError::engine(ENGINE))?;
        items.push((k.value().to_vec(), v.value().to_vec()));
    }
    Ok(items)
}

impl Database for Redb {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn init(&self) -> DbResult<()> {
        let tx = self.db.begin_write().map_err(DbError::engine(ENGINE))?;
        {
            let _ = tx.open_table(TABLE).map_err(DbError::engine(ENGINE))?;
        }
        tx.commit().map_err(DbError::engine(ENGINE))?;
        Ok(())
    }

    fn begin(&self) -> DbResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(RedbTxn {
            db: &self.db,
            write: None,
        }))
    }

    fn snapshot(&self) -> DbResult<Snapshot> {
        let tx = self.db.begin_read().map_err(DbError::engine(ENGINE))?;
        let id = self.next_snapshot.fetch_add(1, Ordering::Relaxed);
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(tx));
        Ok(Snapshot(id))
    }

    fn release(&self, snapshot: Snapshot) {
        let tx = self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&snapshot.0);
        drop(tx);
    }

    fn scan(
        &self,
        prefix: &[u8],
        upper_bound: &[u8],
        snapshot: Option<&Snapshot>,
    ) -> DbResult<ScanIter<'_>> {
        if prefix > upper_bound {
            return Ok(Box::new(std::iter::empty()));
        }
        let items = match snapshot {
            Some(s) => {
                let tx = self.snapshot_tx(s)?;
                collect_range(&tx, prefix, upper_bound)?
            }
            None => {
                let tx = self.db.begin_read().map_err(DbError::engine(ENGINE))?;
                collect_range(&tx, prefix, upper_bound)?
            }
        };
        Ok(Box::new(items.into_iter().map(Ok)))
    }

    fn close(&self) -> DbResult<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}

/// Reads go through a fresh read transaction until the first put opens the
/// write transaction; from then on reads see the pending writes.
pub struct RedbTxn<'a> {
    db: &'a redb::Database,
    write: Option<WriteTransaction>,
}

impl Transaction for RedbTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> DbResult<()> {
        let tx = match self.write.take() {
            Some(tx) => tx,
            None => self.db.begin_write().map_err(DbError::engine(ENGINE))?,
        };
        {
            let mut table = tx.open_table(TABLE).map_err(DbError::engine(ENGINE))?;
            table.insert(key, value).map_err(DbError::engine(ENGINE))?;
        }
        self.write = Some(tx);
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> DbResult<Vec<u8>> {
        let value = match &self.write {
            Some(tx) => {
                let table = tx.open_table(TABLE).map_err(DbError::engine(ENGINE))?;
                let guard = table.get(key).map_err(DbError::engine(ENGINE))?;
                guard.map(|g| g.value().to_vec())
            }
            None => {
                let tx = self.db.begin_read().map_err(DbError::engine(ENGINE))?;
                let table = tx.open_table(TABLE).map_err(DbError::engine(ENGINE))?;
                let guard = table.get(key).map_err(DbError::engine(ENGINE))?;
                guard.map(|g| g.value().to_vec())
            }
        };
        value.ok_or(DbError::NotFound)
    }

    fn commit(self: Box<Self>) -> DbResult<()> {
        match self.write {
            Some(tx) => tx.commit().map_err(DbError::engine(ENGINE)),
            None => Ok(()),
        }
    }
}
