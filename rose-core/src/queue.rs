// ABOUTME: Queue operations over the session store: create/find/append/poll/history
// ABOUTME: Enforces the two-participant rule and turns missing sessions into NotFound
use crate::error::{Error, Result};
use crate::session::{History, Participant, SessionStore};
use std::sync::Arc;
use tokio::sync::Notify;

/// Result of a create-or-get call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub id: String,
    /// False when an existing session with the requested id was returned
    pub created: bool,
}

#[derive(Clone)]
pub struct QueueService {
    store: SessionStore,
}

fn require_pair(participants: &[Participant]) -> Result<()> {
    if participants.len() != 2 {
        return Err(Error::Validation(format!(
            "A session needs exactly 2 participants, got {}",
            participants.len()
        )));
    }
    Ok(())
}

/// Order-independent identity of a participant pair
fn pair_key(participants: &[Participant]) -> Vec<(&str, bool)> {
    let mut key: Vec<(&str, bool)> = participants
        .iter()
        .map(|p| (p.name.as_str(), p.is_agent))
        .collect();
    key.sort_unstable();
    key
}

impl QueueService {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Create a session, or return the existing one when `session_id` is already taken.
    /// A missing id gets a fresh UUID v4. Participants of an existing session are kept as-is.
    pub fn create_or_get_session(
        &self,
        participants: &[Participant],
        session_id: Option<&str>,
    ) -> Result<CreatedSession> {
        require_pair(participants)?;

        let id = match session_id {
            Some(id) if id.trim().is_empty() => {
                return Err(Error::Validation("sessionId must not be blank".to_string()));
            }
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let created = self.store.create_session(&id, participants)?;
        if created {
            tracing::info!(session_id = %id, "Session created");
        } else {
            tracing::debug!(session_id = %id, "Session already exists");
        }
        Ok(CreatedSession { id, created })
    }

    /// First session (in id order) whose participant pair matches, ignoring order
    pub fn find_by_participants(&self, participants: &[Participant]) -> Result<String> {
        require_pair(participants)?;
        let wanted = pair_key(participants);

        self.store
            .list_participants()?
            .into_iter()
            .find(|(_, existing)| pair_key(existing) == wanted)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::NotFound("No session for these participants".to_string()))
    }

    /// Append a message; never creates the session. Returns the assigned ordinal.
    pub fn append_message(&self, session_id: &str, sender: &str, content: &str) -> Result<i64> {
        match self.store.append_message(session_id, sender, content)? {
            Some(ordinal) => {
                metrics::counter!("rose_messages_appended_total").increment(1);
                Ok(ordinal)
            }
            None => Err(Error::session_not_found(session_id)),
        }
    }

    pub fn has_unseen(&self, session_id: &str) -> Result<bool> {
        self.store.has_unseen(session_id)
    }

    pub fn get_history(&self, session_id: &str, clear_unseen: bool) -> Result<History> {
        self.store
            .history(session_id, clear_unseen)?
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    pub fn list_unseen_ids(&self) -> Result<Vec<String>> {
        self.store.list_unseen_ids()
    }

    pub fn append_notifier(&self) -> Arc<Notify> {
        self.store.append_notifier()
    }
}
