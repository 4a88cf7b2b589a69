pub(crate) mod consensus_mock;
