pub mod config;
pub mod types;
pub mod processor;
pub mod home;
pub mod consensus;
pub mod election;
pub mod heartbeat;
pub mod scanner;
pub mod relayer;
pub mod retry;
pub mod shutdown;

pub use config::Config;
pub use types::{QueuedMessage, MessageWithSignatures, Valset, ConsensusPayload};
pub use relayer::Relayer;
pub use shutdown::{Shutdown, ShutdownHandle};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No consensus reached for message {0}")]
    NoConsensus(u64),

    #[error("Processor connected to wrong chain: expected {expected}, got {actual}")]
    WrongChain { expected: String, actual: String },

    #[error("Query limit exceeded: {0}")]
    QueryLimitExceeded(String),

    #[error("Election lane is closed")]
    LaneClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("{} errors: [{}]", .0.len(), join_errors(.0))]
    Aggregate(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// 致命错误会中止当前阶段，不再重试
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Cancelled
            | Error::Fatal(_)
            | Error::WrongChain { .. }
            | Error::Config(_)
            | Error::LaneClosed => true,
            Error::Aggregate(errors) => errors.iter().any(Error::is_fatal),
            _ => false,
        }
    }

    pub fn is_no_consensus(&self) -> bool {
        matches!(self, Error::NoConsensus(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// 将多个错误合并为一个；空列表返回 None
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Cancelled.is_fatal());
        assert!(Error::WrongChain { expected: "a".into(), actual: "b".into() }.is_fatal());
        assert!(!Error::Network("timeout".into()).is_fatal());
        assert!(!Error::NoConsensus(1).is_fatal());

        let mixed = Error::Aggregate(vec![Error::Network("x".into()), Error::LaneClosed]);
        assert!(mixed.is_fatal());
    }

    #[test]
    fn test_aggregate() {
        assert!(Error::aggregate(vec![]).is_none());
        assert!(matches!(
            Error::aggregate(vec![Error::Chain("a".into())]),
            Some(Error::Chain(_))
        ));

        let err = Error::aggregate(vec![Error::Chain("a".into()), Error::Network("b".into())]).unwrap();
        assert_eq!(err.to_string(), "2 errors: [Chain error: a; Network error: b]");
    }
}
