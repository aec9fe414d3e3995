// ABOUTME: Channel-to-agent assignment table shared with the session store's SQLite connection
// ABOUTME: Answers "which agent serves this (community, channel)" for the channel relay
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAssignment {
    pub community_id: String,
    pub channel_id: String,
    pub agent_id: String,
}

#[derive(Clone)]
pub struct ChannelAssignmentStore {
    db: Arc<Mutex<Connection>>,
}

impl ChannelAssignmentStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| Error::LockPoisoned)
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS channel_assignments (
                community_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                PRIMARY KEY (community_id, channel_id)
            )",
            [],
        )?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<ChannelAssignment>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT community_id, channel_id, agent_id FROM channel_assignments
             ORDER BY community_id, channel_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ChannelAssignment {
                    community_id: row.get(0)?,
                    channel_id: row.get(1)?,
                    agent_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_agent_id(&self, community_id: &str, channel_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let agent_id = conn
            .query_row(
                "SELECT agent_id FROM channel_assignments WHERE community_id = ?1 AND channel_id = ?2",
                params![community_id, channel_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(agent_id)
    }

    pub fn upsert(&self, community_id: &str, channel_id: &str, agent_id: &str) -> Result<()> {
        if agent_id.trim().is_empty() {
            return Err(Error::Validation("agentId must not be blank".to_string()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO channel_assignments (community_id, channel_id, agent_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(community_id, channel_id) DO UPDATE SET agent_id = excluded.agent_id",
            params![community_id, channel_id, agent_id],
        )?;
        tracing::info!(
            community_id = %community_id,
            channel_id = %channel_id,
            agent_id = %agent_id,
            "Channel assignment saved"
        );
        Ok(())
    }

    /// Returns false when there was nothing to delete
    pub fn delete(&self, community_id: &str, channel_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM channel_assignments WHERE community_id = ?1 AND channel_id = ?2",
            params![community_id, channel_id],
        )?;
        Ok(removed > 0)
    }
}
