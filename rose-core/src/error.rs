// ABOUTME: Error taxonomy shared by the session store, queue service, dispatch loop and relay
// ABOUTME: NotFound and Validation are client errors; Upstream, Timeout and storage failures are not

use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown session, ticket, agent or assignment
    #[error("{0}")]
    NotFound(String),
    /// Wrong participant cardinality, missing required field
    #[error("{0}")]
    Validation(String),
    /// A collaborator call failed
    #[error("upstream call failed: {0}")]
    Upstream(String),
    /// A bounded wait was exceeded (the relay waiting for an agent reply)
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("corrupt stored data: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database mutex poisoned")]
    LockPoisoned,
}

impl Error {
    pub fn session_not_found(session_id: &str) -> Self {
        Self::NotFound(format!("Session not found: {}", session_id))
    }

    /// Wrap a collaborator failure, keeping the whole context chain in the message
    pub fn upstream(err: &anyhow::Error) -> Self {
        Self::Upstream(format!("{:#}", err))
    }

    /// True for errors caused by the caller rather than by this service
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::session_not_found("abc").is_client_error());
        assert!(Error::Validation("bad".to_string()).is_client_error());
        assert!(!Error::Upstream("boom".to_string()).is_client_error());
        assert!(!Error::Timeout(Duration::from_secs(1)).is_client_error());
        assert!(!Error::LockPoisoned.is_client_error());
    }

    #[test]
    fn test_upstream_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("Failed to list agents");
        let wrapped = Error::upstream(&err);
        let text = wrapped.to_string();
        assert!(text.contains("Failed to list agents"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn test_not_found_message_names_session() {
        assert_eq!(
            Error::session_not_found("s-1").to_string(),
            "Session not found: s-1"
        );
    }
}
