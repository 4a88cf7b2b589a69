use super::Consensus;
use crate::pipeline::ProcessingCounters;
use kestrel_consensus_core::{
    config::Config,
    errors::consensus::{ConsensusError, ConsensusResult},
    notify::ConsensusNotificationRoot,
};
use kestrel_core::info;
use kestrel_database::prelude::{ConnBuilder, DB, delete_db};
use std::{fs, path::PathBuf, sync::Arc};

const CONSENSUS_DIR_NAME: &str = "consensus";

/// Opens the consensus database under the node data directory and assembles a [`Consensus`] on top of it
pub struct Factory {
    db_dir: PathBuf,
    config: Arc<Config>,
    db_parallelism: usize,
    files_limit: i32,
}

impl Factory {
    pub fn new(data_dir: PathBuf, config: Arc<Config>, db_parallelism: usize, files_limit: i32) -> Self {
        Self { db_dir: data_dir.join(CONSENSUS_DIR_NAME), config, db_parallelism, files_limit }
    }

    pub fn db_dir(&self) -> &PathBuf {
        &self.db_dir
    }

    /// Destroys the consensus database, if one exists
    pub fn reset(&self) -> ConsensusResult<()> {
        info!("Deleting the consensus database at {}", self.db_dir.display());
        delete_db(self.db_dir.clone()).map_err(|err| ConsensusError::GeneralOwned(err.to_string()))
    }

    pub fn open(
        &self,
        notification_root: Arc<ConsensusNotificationRoot>,
        counters: Arc<ProcessingCounters>,
    ) -> ConsensusResult<(Arc<Consensus>, Arc<DB>)> {
        fs::create_dir_all(&self.db_dir).map_err(|err| ConsensusError::GeneralOwned(err.to_string()))?;
        let db = ConnBuilder::default()
            .with_db_path(self.db_dir.clone())
            .with_parallelism(self.db_parallelism)
            .with_files_limit(self.files_limit)
            .build()
            .map_err(|err| ConsensusError::GeneralOwned(format!("failed opening the consensus database: {err}")))?;
        let consensus = Arc::new(Consensus::new(db.clone(), self.config.clone(), notification_root, counters)?);
        info!("Consensus database opened at {}", self.db_dir.display());
        Ok((consensus, db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus_core::{
        api::ConsensusApi,
        config::{
            ConfigBuilder,
            params::{DEVNET_PARAMS, SIMNET_PARAMS},
        },
    };
    use kestrel_database::utils::get_kestrel_tempdir;

    #[test]
    fn test_reopen_and_network_mismatch() {
        let data_dir = get_kestrel_tempdir().unwrap();
        let simnet = Arc::new(ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build());
        let factory = Factory::new(data_dir.path().to_owned(), simnet.clone(), 1, 64);

        let (consensus, db) = factory.open(Default::default(), Default::default()).unwrap();
        assert_eq!(consensus.get_sink(), simnet.genesis_hash());
        drop(consensus);
        drop(db);

        // Reopening with the same network succeeds and keeps the state
        let (consensus, db) = factory.open(Default::default(), Default::default()).unwrap();
        assert_eq!(consensus.get_sink(), simnet.genesis_hash());
        drop(consensus);
        drop(db);

        let devnet = Arc::new(ConfigBuilder::new(DEVNET_PARAMS).skip_proof_of_work().build());
        let factory = Factory::new(data_dir.path().to_owned(), devnet, 1, 64);
        match factory.open(Default::default(), Default::default()) {
            Err(ConsensusError::IncompatibleDatabase(..)) => {}
            Err(err) => panic!("unexpected error {err}"),
            Ok(_) => panic!("a database of another network must be refused"),
        }
    }
}
