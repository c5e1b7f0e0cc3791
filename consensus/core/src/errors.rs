use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("malformed vote script: {0}")]
    MalformedVote(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}
