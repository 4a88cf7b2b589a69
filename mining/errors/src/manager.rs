use crate::{
    block_template::BuilderError,
    mempool::{RejectCode, RuleError},
};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MiningManagerError {
    /// A block template building error
    #[error(transparent)]
    BlockTemplateBuilderError(#[from] BuilderError),

    /// A mempool rule error
    #[error(transparent)]
    MempoolError(#[from] RuleError),
}

impl MiningManagerError {
    /// The reject code a peer or RPC client is told about, if the error concerns a submitted transaction
    pub fn reject_code(&self) -> Option<RejectCode> {
        match self {
            MiningManagerError::BlockTemplateBuilderError(_) => None,
            MiningManagerError::MempoolError(err) => Some(err.reject_code()),
        }
    }
}

pub type MiningManagerResult<T> = std::result::Result<T, MiningManagerError>;

impl TryFrom<MiningManagerError> for RuleError {
    type Error = &'static str;

    fn try_from(value: MiningManagerError) -> Result<Self, Self::Error> {
        match value {
            MiningManagerError::BlockTemplateBuilderError(_) => Err("wrong variant"),
            MiningManagerError::MempoolError(err) => Ok(err),
        }
    }
}
