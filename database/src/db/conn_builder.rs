use super::{DB, RocksKv};
use crate::errors::StoreResult;
use log::debug;
use rocksdb::{BlockBasedOptions, DBCompressionType, DBWithThreadMode, MultiThreaded};
use std::{path::PathBuf, sync::Arc};

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

#[derive(Debug)]
pub struct Unspecified;

/// Builds a RocksDB-backed [`DB`]. The path must be specified before `build` becomes available
#[derive(Debug)]
pub struct ConnBuilder<Path> {
    db_path: Path,
    create_if_missing: bool,
    parallelism: usize,
    files_limit: i32,
    mem_budget: usize,
}

impl Default for ConnBuilder<Unspecified> {
    fn default() -> Self {
        ConnBuilder { db_path: Unspecified, create_if_missing: true, parallelism: 1, files_limit: 500, mem_budget: 64 * MB }
    }
}

impl<Path> ConnBuilder<Path> {
    pub fn with_db_path(self, db_path: PathBuf) -> ConnBuilder<PathBuf> {
        ConnBuilder {
            db_path,
            create_if_missing: self.create_if_missing,
            parallelism: self.parallelism,
            files_limit: self.files_limit,
            mem_budget: self.mem_budget,
        }
    }

    pub fn with_create_if_missing(self, create_if_missing: bool) -> Self {
        ConnBuilder { create_if_missing, ..self }
    }

    pub fn with_parallelism(self, parallelism: impl Into<usize>) -> Self {
        ConnBuilder { parallelism: parallelism.into(), ..self }
    }

    pub fn with_mem_budget(self, mem_budget: impl Into<usize>) -> Self {
        ConnBuilder { mem_budget: mem_budget.into(), ..self }
    }

    pub fn with_files_limit(self, files_limit: impl Into<i32>) -> Self {
        ConnBuilder { files_limit: files_limit.into(), ..self }
    }

    fn options(&self) -> rocksdb::Options {
        let mut opts = rocksdb::Options::default();
        if self.parallelism > 1 {
            opts.increase_parallelism(self.parallelism as i32);
        }
        opts.set_max_background_jobs((num_cpus::get() / 2).max(1) as i32);
        opts.optimize_level_style_compaction(self.mem_budget);

        let buffer_size = 32usize * MB;
        opts.set_target_file_size_base(32 * MB as u64);
        opts.set_write_buffer_size(buffer_size);
        opts.set_max_write_buffer_number(16);
        opts.set_min_write_buffer_number_to_merge(4);
        opts.set_level_zero_file_num_compaction_trigger(12);
        opts.set_max_total_wal_size(GB as u64);
        opts.set_keep_log_file_num(1);
        opts.set_compression_per_level(&[
            DBCompressionType::None,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
        ]);
        opts.set_level_compaction_dynamic_level_bytes(true);

        let mut b_opts = BlockBasedOptions::default();
        b_opts.set_bloom_filter(4.9, true);
        b_opts.set_block_size(128 * KB);
        opts.set_block_based_table_factory(&b_opts);

        opts.set_max_open_files(self.files_limit);
        opts.create_if_missing(self.create_if_missing);
        opts
    }
}

impl ConnBuilder<PathBuf> {
    pub fn build(self) -> StoreResult<Arc<DB>> {
        let opts = self.options();
        let inner = <DBWithThreadMode<MultiThreaded>>::open(&opts, &self.db_path)?;
        debug!("Opened database at {} (files limit {}, memory budget {})", self.db_path.display(), self.files_limit, self.mem_budget);
        Ok(Arc::new(DB::new(RocksKv::new(inner))))
    }
}
