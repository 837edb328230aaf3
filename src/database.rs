mod mem_btree;
mod redb;
mod sled;

use crate::DatabaseType;
use crate::database::mem_btree::MemBTree;
use crate::database::redb::Redb;
use crate::database::sled::Sled;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("storage `{}` already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("key not found")]
    NotFound,

    #[error("transaction conflict")]
    Conflict,

    #[error("unknown snapshot {0}")]
    UnknownSnapshot(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{engine} error: {message}")]
    Engine {
        engine: &'static str,
        message: String,
    },
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Adapter for `map_err` on engine specific errors.
    pub(crate) fn engine<E: std::fmt::Display>(engine: &'static str) -> impl Fn(E) -> DbError {
        move |e| DbError::Engine {
            engine,
            message: e.to_string(),
        }
    }
}

/// Handle on a read view. Must be given back through [`Database::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Snapshot(u64);

pub type ScanItem = DbResult<(Vec<u8>, Vec<u8>)>;
pub type ScanIter<'a> = Box<dyn Iterator<Item = ScanItem> + 'a>;

/// The capabilities the harness needs from a storage engine. Implementations
/// are shared by every worker and must be safe for concurrent use.
pub trait Database: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-time setup after open, e.g. creating tables.
    fn init(&self) -> DbResult<()>;

    fn begin(&self) -> DbResult<Box<dyn Transaction + '_>>;

    fn snapshot(&self) -> DbResult<Snapshot>;

    fn release(&self, snapshot: Snapshot);

    /// Pairs with `prefix <= key < upper_bound`, in key order. With a
    /// snapshot the scan reads that view, otherwise the latest data.
    fn scan(
        &self,
        prefix: &[u8],
        upper_bound: &[u8],
        snapshot: Option<&Snapshot>,
    ) -> DbResult<ScanIter<'_>>;

    /// Flushes pending state. The handle is not used afterwards.
    fn close(&self) -> DbResult<()>;
}

/// A transaction wraps exactly one logical operation in the harness.
pub trait Transaction {
    fn put(&mut self, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Fails with [`DbError::NotFound`] for absent keys.
    fn get(&mut self, key: &[u8]) -> DbResult<Vec<u8>>;

    fn commit(self: Box<Self>) -> DbResult<()>;
}

/// Opens `database` under the storage directory `dir`, which must exist.
pub fn open_db(database: DatabaseType, dir: &Path) -> DbResult<Arc<dyn Database>> {
    let db: Arc<dyn Database> = match database {
        DatabaseType::MemBtree => Arc::new(MemBTree::default()),
        DatabaseType::Sled => Arc::new(Sled::open(&dir.join("sled"))?),
        DatabaseType::Redb => Arc::new(Redb::open(&dir.join("data.redb"))?),
    };
    db.init()?;
    Ok(db)
}

/// Smallest key greater than every key starting with `prefix`, or `None`
/// when the prefix is all `0xff`.
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

pub(crate) fn ensure_absent(path: &Path) -> DbResult<()> {
    if path.exists() {
        Err(DbError::AlreadyExists(path.to_path_buf()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn upper_bound_of_prefix() {
        assert_eq!(prefix_upper_bound(b"key_1_"), Some(b"key_1`".to_vec()));
        assert_eq!(prefix_upper_bound(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_upper_bound(b"\xff\xff"), None);
        assert_eq!(prefix_upper_bound(b""), None);

        let upper = prefix_upper_bound(b"key_1_").unwrap();
        assert!(b"key_1_99xx".as_slice() < upper.as_slice());
        assert!(b"key_10_0xx".as_slice() < b"key_1_".as_slice());
    }

    fn exercise(db: &dyn Database) {
        let mut tx = db.begin().unwrap();
        tx.put(b"key_0_0", b"v0").unwrap();
        tx.put(b"key_0_1", b"v1").unwrap();
        tx.put(b"key_1_0", b"w0").unwrap();
        assert_eq!(tx.get(b"key_0_1").unwrap(), b"v1");
        tx.commit().unwrap();

        let mut tx = db.begin().unwrap();
        assert_eq!(tx.get(b"key_0_0").unwrap(), b"v0");
        assert!(matches!(tx.get(b"missing"), Err(DbError::NotFound)));
        tx.commit().unwrap();

        let snap = db.snapshot().unwrap();
        let upper = prefix_upper_bound(b"key_0_").unwrap();
        let items: Vec<_> = db
            .scan(b"key_0_", &upper, Some(&snap))
            .unwrap()
            .collect::<DbResult<_>>()
            .unwrap();
        assert_eq!(
            items,
            vec![
                (b"key_0_0".to_vec(), b"v0".to_vec()),
                (b"key_0_1".to_vec(), b"v1".to_vec())
            ]
        );
        db.release(snap);

        let all = db.scan(b"key_", b"key`", None).unwrap().count();
        assert_eq!(all, 3);
        db.close().unwrap();
    }

    #[test]
    fn mem_btree_adapter() {
        let dir = TempDir::new().unwrap();
        let db = open_db(DatabaseType::MemBtree, dir.path()).unwrap();
        assert_eq!(db.name(), "mem-btree");
        exercise(db.as_ref());
    }

    #[test]
    fn sled_adapter() {
        let dir = TempDir::new().unwrap();
        let db = open_db(DatabaseType::Sled, dir.path()).unwrap();
        assert_eq!(db.name(), "sled");
        exercise(db.as_ref());
    }

    #[test]
    fn redb_adapter() {
        let dir = TempDir::new().unwrap();
        let db = open_db(DatabaseType::Redb, dir.path()).unwrap();
        assert_eq!(db.name(), "redb");
        exercise(db.as_ref());
    }

    #[test]
    fn open_refuses_existing_storage() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.redb"), b"stale").unwrap();
        assert!(matches!(
            open_db(DatabaseType::Redb, dir.path()),
            Err(DbError::AlreadyExists(_))
        ));

        std::fs::create_dir(dir.path().join("sled")).unwrap();
        assert!(matches!(
            open_db(DatabaseType::Sled, dir.path()),
            Err(DbError::AlreadyExists(_))
        ));
    }
}
