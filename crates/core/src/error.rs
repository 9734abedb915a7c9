use thiserror::Error;

use crate::work::Tier;

#[derive(Error, Debug)]
pub enum ArbiterError {
    #[error("admission rejected: {tier} queue is full")]
    AdmissionRejected { tier: Tier },

    #[error("invalid work item: {0}")]
    InvalidWorkItem(String),

    #[error("security lockdown active, admission halted")]
    SecurityLockdown,

    #[error("unknown worker: {0}")]
    UnknownWorker(usize),

    #[error("work item not queued: {0}")]
    UnknownWorkItem(u64),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

impl ArbiterError {
    /// Whether the error should stop the caller's loop rather than be handled locally.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArbiterError::SecurityLockdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lockdown_is_fatal() {
        assert!(ArbiterError::SecurityLockdown.is_fatal());
        assert!(!ArbiterError::AdmissionRejected { tier: Tier::Low }.is_fatal());
        assert!(!ArbiterError::UnknownWorker(3).is_fatal());
    }

    #[test]
    fn messages_name_the_subject() {
        let err = ArbiterError::AdmissionRejected { tier: Tier::High };
        assert_eq!(err.to_string(), "admission rejected: high queue is full");
        assert_eq!(ArbiterError::UnknownWorker(12).to_string(), "unknown worker: 12");
    }
}
