use crate::db::DB;
use std::sync::{Arc, Weak};
use tempfile::TempDir;

/// Keeps a temporary database directory alive. On drop it waits for all database handles to be
/// released before the directory is deleted
#[derive(Default)]
pub struct DbLifetime {
    weak_db_ref: Weak<DB>,
    tempdir: Option<TempDir>,
}

impl DbLifetime {
    pub fn new(tempdir: TempDir, weak_db_ref: Weak<DB>) -> Self {
        Self { tempdir: Some(tempdir), weak_db_ref }
    }

    /// Tracks the lifetime of a database which lives in a directory not owned by this struct
    pub fn without_destroy(weak_db_ref: Weak<DB>) -> Self {
        Self { tempdir: None, weak_db_ref }
    }
}

impl Drop for DbLifetime {
    fn drop(&mut self) {
        for _ in 0..16 {
            if self.weak_db_ref.strong_count() > 0 {
                // Sometimes another thread is shutting down and cleaning resources
                std::thread::sleep(std::time::Duration::from_millis(1000));
            } else {
                break;
            }
        }
        assert_eq!(self.weak_db_ref.strong_count(), 0, "DB is expected to have no strong references when lifetime is dropped");
        if let Some(dir) = self.tempdir.take() {
            let _ = dir.close();
        }
    }
}

pub fn get_kestrel_tempdir() -> std::io::Result<TempDir> {
    let global_tempdir = std::env::temp_dir();
    let kestrel_tempdir = global_tempdir.join("kestrel-rust");
    std::fs::create_dir_all(kestrel_tempdir.as_path())?;
    tempfile::tempdir_in(kestrel_tempdir.as_path())
}

/// Creates a DB within a temp directory under `<OS SPECIFIC TEMP DIR>/kestrel-rust`.
/// Callers must keep the returned `DbLifetime` alive for as long as the DB is in use
#[macro_export]
macro_rules! create_temp_db {
    ($conn_builder: expr) => {{
        let db_tempdir = $crate::utils::get_kestrel_tempdir().expect("failed to create temp dir");
        let db_path = db_tempdir.path().to_owned();
        let db = $conn_builder.with_db_path(db_path).build().expect("failed to open temp db");
        ($crate::utils::DbLifetime::new(db_tempdir, std::sync::Arc::downgrade(&db)), db)
    }};
}

/// An in-memory DB paired with a lifetime guard, with the same shape as [`create_temp_db`]
pub fn create_memory_db() -> (DbLifetime, Arc<DB>) {
    let db = DB::new_memory();
    (DbLifetime::without_destroy(Arc::downgrade(&db)), db)
}

#[cfg(test)]
mod tests {
    use crate::prelude::ConnBuilder;

    #[test]
    fn test_temp_db_roundtrip() {
        let (lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        db.put([1, 2], [3]).unwrap();
        assert_eq!(db.get([1, 2]).unwrap(), Some(vec![3]));
        drop(db);
        drop(lifetime);
    }
}
