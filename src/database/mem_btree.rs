use crate::database::{Database, DbError, DbResult, ScanIter, Snapshot, Transaction};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Sequence number of a committed write. 0 means "never written".
type Seq = u64;

struct Version {
    seq: Seq,
    value: Arc<[u8]>,
}

#[derive(Default)]
struct State {
    data: BTreeMap<Vec<u8>, Vec<Version>>,
    /// Last committed sequence number.
    seq: Seq,
    /// Open snapshots by sequence number, with a reference count each.
    snapshots: BTreeMap<Seq, usize>,
}

impl State {
    fn latest_seq(&self, key: &[u8]) -> Seq {
        self.data
            .get(key)
            .and_then(|v| v.last())
            .map_or(0, |v| v.seq)
    }

    /// Oldest sequence number a reader may still ask for.
    fn horizon(&self) -> Seq {
        self.snapshots
            .keys()
            .next()
            .copied()
            .unwrap_or(self.seq)
    }
}

fn visible(versions: &[Version], at: Seq) -> Option<&Arc<[u8]>> {
    versions
        .iter()
        .rev()
        .find(|v| v.seq <= at)
        .map(|v| &v.value)
}

/// Drops versions no snapshot can see any more, keeping the newest one at
/// or below the horizon.
fn prune(versions: &mut Vec<Version>, horizon: Seq) {
    if let Some(keep) = versions.iter().rposition(|v| v.seq <= horizon) {
        versions.drain(..keep);
    }
}

/// In-memory reference engine: multi-versioned B-tree with snapshots and
/// optimistic transactions that validate their write set at commit.
#[derive(Default)]
pub struct MemBTree {
    state: RwLock<State>,
}

impl MemBTree {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Database for MemBTree {
    fn name(&self) -> &'static str {
        "mem-btree"
    }

    fn init(&self) -> DbResult<()> {
        Ok(())
    }

    fn begin(&self) -> DbResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(MemTxn {
            db: self,
            tracked: HashMap::new(),
            writes: BTreeMap::new(),
        }))
    }

    fn snapshot(&self) -> DbResult<Snapshot> {
        let mut state = self.write();
        let seq = state.seq;
        *state.snapshots.entry(seq).or_default() += 1;
        Ok(Snapshot(seq))
    }

    fn release(&self, snapshot: Snapshot) {
        let mut state = self.write();
        if let Entry::Occupied(mut e) = state.snapshots.entry(snapshot.0) {
            *e.get_mut() -= 1;
            if *e.get() == 0 {
                e.remove();
            }
        }
    }

    fn scan(
        &self,
        prefix: &[u8],
        upper_bound: &[u8],
        snapshot: Option<&Snapshot>,
    ) -> DbResult<ScanIter<'_>> {
        let state = self.read();
        let at = match snapshot {
            Some(s) if state.snapshots.contains_key(&s.0) => s.0,
            Some(s) => return Err(DbError::UnknownSnapshot(s.0)),
            None => state.seq,
        };
        if prefix > upper_bound {
            return Ok(Box::new(std::iter::empty()));
        }
        let items: Vec<_> = state
            .data
            .range(prefix.to_vec()..upper_bound.to_vec())
            .filter_map(|(k, versions)| visible(versions, at).map(|v| Ok((k.clone(), v.to_vec()))))
            .collect();
        Ok(Box::new(items.into_iter()))
    }

    fn close(&self) -> DbResult<()> {
        Ok(())
    }
}

pub struct MemTxn<'a> {
    db: &'a MemBTree,
    /// Written keys with the sequence number seen when first written.
    tracked: HashMap<Vec<u8>, Seq>,
    writes: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Transaction for MemTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> DbResult<()> {
        if !self.tracked.contains_key(key) {
            let seen = self.db.read().latest_seq(key);
            self.tracked.insert(key.to_vec(), seen);
        }
        self.writes.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> DbResult<Vec<u8>> {
        if let Some(v) = self.writes.get(key) {
            return Ok(v.clone());
        }
        let state = self.db.read();
        state
            .data
            .get(key)
            .and_then(|versions| versions.last())
            .map(|v| v.value.to_vec())
            .ok_or(DbError::NotFound)
    }

    fn commit(self: Box<Self>) -> DbResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let mut state = self.db.write();
        for (key, seen) in &self.tracked {
            if state.latest_seq(key) != *seen {
                return Err(DbError::Conflict);
            }
        }

        state.seq += 1;
        let seq = state.seq;
        let horizon = state.horizon();
        for (key, value) in self.writes {
            let versions = state.data.entry(key).or_default();
            versions.push(Version {
                seq,
                value: value.into(),
            });
            prune(versions, horizon);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(db: &MemBTree, key: &[u8], value: &[u8]) {
        let mut tx = db.begin().unwrap();
        tx.put(key, value).unwrap();
        tx.commit().unwrap();
    }

    fn scan_values(db: &MemBTree, snapshot: Option<&Snapshot>) -> Vec<Vec<u8>> {
        db.scan(b"k", b"l", snapshot)
            .unwrap()
            .map(|r| r.unwrap().1)
            .collect()
    }

    #[test]
    fn write_write_conflict() {
        let db = MemBTree::default();
        let mut a = db.begin().unwrap();
        let mut b = db.begin().unwrap();
        a.put(b"k1", b"a").unwrap();
        b.put(b"k1", b"b").unwrap();
        a.commit().unwrap();
        assert!(matches!(b.commit(), Err(DbError::Conflict)));

        let mut tx = db.begin().unwrap();
        assert_eq!(tx.get(b"k1").unwrap(), b"a");
    }

    #[test]
    fn disjoint_writers_commit() {
        let db = MemBTree::default();
        let mut a = db.begin().unwrap();
        let mut b = db.begin().unwrap();
        a.put(b"k1", b"a").unwrap();
        b.put(b"k2", b"b").unwrap();
        a.commit().unwrap();
        b.commit().unwrap();
        assert_eq!(scan_values(&db, None), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn snapshot_hides_later_commits() {
        let db = MemBTree::default();
        put(&db, b"k1", b"v1");
        let snap = db.snapshot().unwrap();
        put(&db, b"k1", b"v2");
        put(&db, b"k2", b"new");

        assert_eq!(scan_values(&db, Some(&snap)), vec![b"v1".to_vec()]);
        assert_eq!(
            scan_values(&db, None),
            vec![b"v2".to_vec(), b"new".to_vec()]
        );

        db.release(snap);
        assert!(matches!(
            db.scan(b"k", b"l", Some(&snap)),
            Err(DbError::UnknownSnapshot(_))
        ));
    }

    #[test]
    fn versions_pruned_without_snapshots() {
        let db = MemBTree::default();
        for i in 0..10u8 {
            put(&db, b"k1", &[i]);
        }
        assert_eq!(db.read().data[b"k1".as_slice()].len(), 1);

        let snap = db.snapshot().unwrap();
        put(&db, b"k1", b"x");
        put(&db, b"k1", b"y");
        assert_eq!(db.read().data[b"k1".as_slice()].len(), 3);
        db.release(snap);
        put(&db, b"k1", b"z");
        assert_eq!(db.read().data[b"k1".as_slice()].len(), 1);
    }

    #[test]
    fn concurrent_inserts() {
        let db = MemBTree::default();
        std::thread::scope(|s| {
            for t in 0..4 {
                let db = &db;
                s.spawn(move || {
                    for i in 0..500 {
                        put(db, format!("k_{t}_{i}").as_bytes(), b"v");
                    }
                });
            }
        });
        assert_eq!(db.scan(b"k", b"l", None).unwrap().count(), 2000);
        assert_eq!(db.read().seq, 2000);
    }
}
