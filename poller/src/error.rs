use lcap_types::PollKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("hash scheduler refused {0}")]
    Scheduling(String),

    #[error("hashing failed: {0}")]
    Hashing(String),

    #[error("send failed: {0}")]
    Io(String),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("poll conflicts with running poll {existing}")]
    Conflict { existing: PollKey },

    #[error("unknown poll {0}")]
    UnknownPoll(PollKey),

    #[error("capacity reached: {0}")]
    CapacityReached(String),

    #[error("content unavailable: {0}")]
    ContentUnavailable(String),

    #[error("vote agreement already decided for {0}")]
    AgreementAlreadySet(String),

    #[error("tally for {0} is frozen")]
    TallyFrozen(PollKey),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<lcap_crypto::CryptoError> for PollError {
    fn from(e: lcap_crypto::CryptoError) -> Self {
        Self::ProtocolMismatch(e.to_string())
    }
}

impl From<lcap_types::TypesError> for PollError {
    fn from(e: lcap_types::TypesError) -> Self {
        Self::ProtocolMismatch(e.to_string())
    }
}
