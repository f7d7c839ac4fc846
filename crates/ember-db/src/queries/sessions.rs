use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Row, named_params, params};
use uuid::Uuid;

use ember_types::models::{SessionStatus, UserSummary};

use super::USER_SUMMARY_COLS;
use crate::columns::{self, OptionalExt};
use crate::models::{ChatMessageRow, SessionRow};
use crate::{Database, now, timestamp};

const SESSION_COLS: &str =
    "id, host_id, club_id, title, description, capacity, is_private, status, created_at";

/// Who may see and enter session `s`: anyone for public sessions, otherwise
/// the host, listed participants and members of the owning club.
const SESSION_ACCESS: &str = "(s.is_private = 0
      OR s.host_id = :viewer
      OR EXISTS (SELECT 1 FROM herf_participants p WHERE p.session_id = s.id AND p.user_id = :viewer)
      OR (s.club_id IS NOT NULL
          AND EXISTS (SELECT 1 FROM club_members m WHERE m.club_id = s.club_id AND m.user_id = :viewer)))";

pub struct NewSession<'a> {
    pub id: Uuid,
    pub host_id: Uuid,
    pub club_id: Option<Uuid>,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub capacity: u32,
    pub is_private: bool,
}

impl Database {
    // -- Sessions --

    /// Creates the session with the host as its first participant.
    pub fn create_session(&self, session: &NewSession<'_>) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let created_at = now();
            tx.execute(
                "INSERT INTO herf_sessions (id, host_id, club_id, title, description, capacity, is_private, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    session.id.to_string(),
                    session.host_id.to_string(),
                    session.club_id.map(|c| c.to_string()),
                    session.title,
                    session.description,
                    session.capacity,
                    session.is_private,
                    SessionStatus::Scheduled.as_str(),
                    created_at
                ],
            )?;
            tx.execute(
                "INSERT INTO herf_participants (session_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![session.id.to_string(), session.host_id.to_string(), created_at],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: Uuid) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM herf_sessions WHERE id = ?1", SESSION_COLS);
            conn.query_row(&sql, [id.to_string()], map_session).optional()
        })
    }

    /// Sessions that have not ended and that `viewer` may enter, newest first.
    pub fn list_open_sessions(&self, viewer: Uuid, limit: u32, offset: u32) -> Result<Vec<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM herf_sessions s WHERE s.status != 'ended' AND {}
                 ORDER BY s.created_at DESC, s.rowid DESC LIMIT :limit OFFSET :offset",
                SESSION_COLS, SESSION_ACCESS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    named_params! { ":viewer": viewer.to_string(), ":limit": limit, ":offset": offset },
                    map_session,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// False for unknown sessions as well as for users the session does not admit.
    pub fn may_enter_session(&self, session_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT EXISTS (SELECT 1 FROM herf_sessions s WHERE s.id = :session AND {})",
                SESSION_ACCESS
            );
            let allowed: bool = conn.query_row(
                &sql,
                named_params! { ":session": session_id.to_string(), ":viewer": user_id.to_string() },
                |row| row.get(0),
            )?;
            Ok(allowed)
        })
    }

    pub fn set_session_status(&self, id: Uuid, status: SessionStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE herf_sessions SET status = ?2 WHERE id = ?1",
                params![id.to_string(), status.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Participants --

    pub fn session_participants(&self, session_id: Uuid) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM herf_participants p JOIN users u ON u.id = p.user_id
                 WHERE p.session_id = ?1 ORDER BY p.joined_at ASC",
                USER_SUMMARY_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([session_id.to_string()], |row| columns::user_summary(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_session_participant(&self, session_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM herf_participants WHERE session_id = ?1 AND user_id = ?2",
                    params![session_id.to_string(), user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Adds the participant unless the session is already at capacity.
    /// Returns false when full; rejoining is a no-op that returns true.
    pub fn add_session_participant(&self, session_id: Uuid, user_id: Uuid, capacity: u32) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO herf_participants (session_id, user_id, joined_at)
                 SELECT ?1, ?2, ?3
                 WHERE EXISTS (SELECT 1 FROM herf_participants WHERE session_id = ?1 AND user_id = ?2)
                    OR (SELECT COUNT(*) FROM herf_participants WHERE session_id = ?1) < ?4",
                params![session_id.to_string(), user_id.to_string(), now(), capacity],
            )?;
            if changed == 1 {
                return Ok(true);
            }
            let already: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM herf_participants WHERE session_id = ?1 AND user_id = ?2",
                    params![session_id.to_string(), user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(already.is_some())
        })
    }

    pub fn remove_session_participant(&self, session_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM herf_participants WHERE session_id = ?1 AND user_id = ?2",
                params![session_id.to_string(), user_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Chat --

    pub fn insert_chat_message(
        &self,
        id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO herf_chat_messages (id, session_id, user_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    session_id.to_string(),
                    user_id.to_string(),
                    content,
                    timestamp(created_at)
                ],
            )?;
            Ok(())
        })
    }

    /// The newest `limit` messages, returned oldest first.
    pub fn recent_chat_messages(&self, session_id: Uuid, limit: u32) -> Result<Vec<ChatMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT m.id, m.session_id, m.content, m.created_at, {}
                 FROM herf_chat_messages m JOIN users u ON u.id = m.user_id
                 WHERE m.session_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2",
                USER_SUMMARY_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(params![session_id.to_string(), limit], |row| {
                    Ok(ChatMessageRow {
                        id: columns::uuid(row, 0)?,
                        session_id: columns::uuid(row, 1)?,
                        content: row.get(2)?,
                        created_at: columns::time(row, 3)?,
                        user: columns::user_summary(row, 4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }
}

fn map_session(row: &Row) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: columns::uuid(row, 0)?,
        host_id: columns::uuid(row, 1)?,
        club_id: columns::opt_uuid(row, 2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        capacity: row.get(5)?,
        is_private: row.get(6)?,
        status: columns::tag(row, 7)?,
        created_at: columns::time(row, 8)?,
    })
}
