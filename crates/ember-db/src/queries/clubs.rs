use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use ember_types::models::ClubRole;

use super::USER_SUMMARY_COLS;
use crate::columns::{self, OptionalExt};
use crate::models::{ClubMemberRow, ClubRow};
use crate::{Database, now};

const CLUB_SELECT: &str = "SELECT c.id, c.name, c.description, c.is_private, c.owner_id,
            (SELECT COUNT(*) FROM club_members m WHERE m.club_id = c.id),
            c.created_at
     FROM clubs c";

impl Database {
    /// Creates the club and enrols the owner in one transaction.
    pub fn create_club(
        &self,
        id: Uuid,
        owner_id: Uuid,
        name: &str,
        description: Option<&str>,
        is_private: bool,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let created_at = now();
            tx.execute(
                "INSERT INTO clubs (id, name, description, is_private, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id.to_string(), name, description, is_private, owner_id.to_string(), created_at],
            )?;
            tx.execute(
                "INSERT INTO club_members (club_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), owner_id.to_string(), ClubRole::Owner.as_str(), created_at],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_club(&self, id: Uuid) -> Result<Option<ClubRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE c.id = ?1", CLUB_SELECT);
            conn.query_row(&sql, [id.to_string()], map_club).optional()
        })
    }

    pub fn get_club_by_name(&self, name: &str) -> Result<Option<ClubRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE c.name = ?1", CLUB_SELECT);
            conn.query_row(&sql, [name], map_club).optional()
        })
    }

    pub fn list_clubs(&self, limit: u32, offset: u32) -> Result<Vec<ClubRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} ORDER BY c.created_at DESC LIMIT ?1 OFFSET ?2", CLUB_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![limit, offset], map_club)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn club_member_role(&self, club_id: Uuid, user_id: Uuid) -> Result<Option<ClubRole>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT role FROM club_members WHERE club_id = ?1 AND user_id = ?2",
                params![club_id.to_string(), user_id.to_string()],
                |row| columns::tag(row, 0),
            )
            .optional()
        })
    }

    /// Returns true when the user was not already a member. Any pending
    /// invite is consumed.
    pub fn add_club_member(&self, club_id: Uuid, user_id: Uuid, role: ClubRole) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO club_members (club_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![club_id.to_string(), user_id.to_string(), role.as_str(), now()],
            )?;
            conn.execute(
                "DELETE FROM club_invites WHERE club_id = ?1 AND user_id = ?2",
                params![club_id.to_string(), user_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn remove_club_member(&self, club_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM club_members WHERE club_id = ?1 AND user_id = ?2",
                params![club_id.to_string(), user_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn club_members(&self, club_id: Uuid, limit: u32, offset: u32) -> Result<Vec<ClubMemberRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT m.club_id, m.role, m.joined_at, {}
                 FROM club_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.club_id = ?1
                 ORDER BY m.joined_at ASC
                 LIMIT ?2 OFFSET ?3",
                USER_SUMMARY_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![club_id.to_string(), limit, offset], |row| {
                    Ok(ClubMemberRow {
                        club_id: columns::uuid(row, 0)?,
                        role: columns::tag(row, 1)?,
                        joined_at: columns::time(row, 2)?,
                        user: columns::user_summary(row, 3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn club_member_ids(&self, club_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT user_id FROM club_members WHERE club_id = ?1")?;
            let ids = stmt
                .query_map([club_id.to_string()], |row| columns::uuid(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Returns true when a new invite was recorded.
    pub fn create_club_invite(&self, club_id: Uuid, user_id: Uuid, invited_by: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO club_invites (club_id, user_id, invited_by, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![club_id.to_string(), user_id.to_string(), invited_by.to_string(), now()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn has_club_invite(&self, club_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM club_invites WHERE club_id = ?1 AND user_id = ?2",
                    params![club_id.to_string(), user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

fn map_club(row: &Row) -> rusqlite::Result<ClubRow> {
    Ok(ClubRow {
        id: columns::uuid(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_private: row.get(3)?,
        owner_id: columns::uuid(row, 4)?,
        member_count: row.get(5)?,
        created_at: columns::time(row, 6)?,
    })
}
