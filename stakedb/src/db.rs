use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use crate::errors::{StakeDbError, StakeDbResult};

pub const CF_TICKETS: &str = "tickets";
pub const CF_MATURING: &str = "maturing";
pub const CF_EXPIRING: &str = "expiring";
pub const CF_POOL_INFO: &str = "pool_info";
pub const CF_UNDO: &str = "undo";
pub const CF_META: &str = "meta";

/// Thin RocksDB wrapper with named column families. All values are bincode;
/// key layout is owned by the callers.
pub struct Database {
    db: Arc<DB>,
    is_closed: Arc<RwLock<bool>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> StakeDbResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(10);
        opts.set_max_background_jobs(2);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let cf_names = [CF_TICKETS, CF_MATURING, CF_EXPIRING, CF_POOL_INFO, CF_UNDO, CF_META];
        let cf_descriptors: Vec<_> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        Ok(Self { db: Arc::new(db), is_closed: Arc::new(RwLock::new(false)) })
    }

    fn check_closed(&self) -> StakeDbResult<()> {
        if *self.is_closed.read() {
            return Err(StakeDbError::DatabaseClosed);
        }
        Ok(())
    }

    fn cf_handle(&self, cf_name: &str) -> StakeDbResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf_name)
            .ok_or_else(|| StakeDbError::ColumnFamilyNotFound(cf_name.to_string()))
    }

    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> StakeDbResult<()> {
        self.check_closed()?;
        let cf = self.cf_handle(cf_name)?;
        self.db.put_cf(cf, key, value)?;
        Ok(())
    }

    pub fn get(&self, cf_name: &str, key: &[u8]) -> StakeDbResult<Option<Vec<u8>>> {
        self.check_closed()?;
        let cf = self.cf_handle(cf_name)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    pub fn delete(&self, cf_name: &str, key: &[u8]) -> StakeDbResult<()> {
        self.check_closed()?;
        let cf = self.cf_handle(cf_name)?;
        self.db.delete_cf(cf, key)?;
        Ok(())
    }

    pub fn batch(&self) -> WriteBatch {
        WriteBatch::default()
    }

    pub fn batch_put(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8], value: &[u8]) -> StakeDbResult<()> {
        let cf = self.cf_handle(cf_name)?;
        batch.put_cf(cf, key, value);
        Ok(())
    }

    pub fn batch_delete(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8]) -> StakeDbResult<()> {
        let cf = self.cf_handle(cf_name)?;
        batch.delete_cf(cf, key);
        Ok(())
    }

    pub fn write_batch(&self, batch: WriteBatch) -> StakeDbResult<()> {
        self.check_closed()?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Collect every (key, value) pair of a column family whose key starts
    /// with `prefix`. Pass an empty prefix for a full scan.
    pub fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> StakeDbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_closed()?;
        let cf = self.cf_handle(cf_name)?;
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix, rocksdb::Direction::Forward)
        };
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (k, v) = item?;
            if !prefix.is_empty() && !k.starts_with(prefix) {
                break;
            }
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    pub fn close(&self) {
        *self.is_closed.write() = true;
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), is_closed: self.is_closed.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_put_get_delete() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();
        db.put(CF_META, b"k", b"v").unwrap();
        assert_eq!(db.get(CF_META, b"k").unwrap(), Some(b"v".to_vec()));
        db.delete(CF_META, b"k").unwrap();
        assert_eq!(db.get(CF_META, b"k").unwrap(), None);
    }

    #[test]
    fn prefix_scan_stops_at_prefix_end() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();
        db.put(CF_MATURING, &[0, 0, 0, 5, 1], b"a").unwrap();
        db.put(CF_MATURING, &[0, 0, 0, 5, 2], b"b").unwrap();
        db.put(CF_MATURING, &[0, 0, 0, 6, 1], b"c").unwrap();
        let got = db.scan_prefix(CF_MATURING, &[0, 0, 0, 5]).unwrap();
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn closed_database_rejects_io() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();
        db.close();
        assert!(matches!(db.put(CF_META, b"k", b"v"), Err(StakeDbError::DatabaseClosed)));
    }
}
