use anyhow::Result;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use ember_types::models::UserSummary;

use super::USER_SUMMARY_COLS;
use crate::columns::{self, OptionalExt};
use crate::models::UserRow;
use crate::{Database, now};

/// Profile fields a user can edit. `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct ProfileUpdate<'a> {
    pub display_name: Option<&'a str>,
    pub bio: Option<&'a str>,
    pub avatar_url: Option<&'a str>,
    pub location: Option<&'a str>,
}

const USER_COLS: &str =
    "id, username, password, display_name, bio, avatar_url, location, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
        display_name: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), username, password_hash, display_name, now()],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    /// Resolve usernames to users, silently skipping unknown names.
    pub fn get_users_by_usernames(&self, usernames: &[String]) -> Result<Vec<UserSummary>> {
        if usernames.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=usernames.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM users u WHERE u.username IN ({})",
                USER_SUMMARY_COLS,
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(usernames.iter()), |row| {
                    columns::user_summary(row, 0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn update_profile(&self, id: Uuid, update: &ProfileUpdate<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                    display_name = COALESCE(?2, display_name),
                    bio          = COALESCE(?3, bio),
                    avatar_url   = COALESCE(?4, avatar_url),
                    location     = COALESCE(?5, location)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    update.display_name,
                    update.bio,
                    update.avatar_url,
                    update.location
                ],
            )?;
            Ok(())
        })
    }

    // -- Follows --

    /// Returns true when a new follow row was written.
    pub fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, following_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![follower_id.to_string(), following_id.to_string(), now()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                params![follower_id.to_string(), following_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT follower_id FROM follows WHERE following_id = ?1")?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| columns::uuid(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn followers(&self, user_id: Uuid, limit: u32, offset: u32) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            query_follow_list(
                conn,
                "JOIN follows f ON f.follower_id = u.id WHERE f.following_id = ?1",
                user_id,
                limit,
                offset,
            )
        })
    }

    pub fn following(&self, user_id: Uuid, limit: u32, offset: u32) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            query_follow_list(
                conn,
                "JOIN follows f ON f.following_id = u.id WHERE f.follower_id = ?1",
                user_id,
                limit,
                offset,
            )
        })
    }

    /// (followers, following)
    pub fn follow_counts(&self, user_id: Uuid) -> Result<(u32, u32)> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM follows WHERE following_id = ?1),
                    (SELECT COUNT(*) FROM follows WHERE follower_id = ?1)",
                [user_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(counts)
        })
    }
}

fn map_user(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: columns::uuid(row, 0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        display_name: row.get(3)?,
        bio: row.get(4)?,
        avatar_url: row.get(5)?,
        location: row.get(6)?,
        created_at: columns::time(row, 7)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLS, column);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], map_user).optional()
}

fn query_follow_list(
    conn: &Connection,
    clause: &str,
    user_id: Uuid,
    limit: u32,
    offset: u32,
) -> Result<Vec<UserSummary>> {
    let sql = format!(
        "SELECT {} FROM users u {} ORDER BY f.created_at DESC LIMIT ?2 OFFSET ?3",
        USER_SUMMARY_COLS, clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id.to_string(), limit, offset], |row| {
            columns::user_summary(row, 0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;

    #[test]
    fn username_lookup_is_case_insensitive() {
        let db = fixtures::db();
        let id = fixtures::user(&db, "Briarwood");

        let row = db.get_user_by_username("briarwood").unwrap().unwrap();
        assert_eq!(row.id, id);
        assert!(db.get_user_by_username("meerschaum").unwrap().is_none());
    }

    #[test]
    fn follow_is_idempotent_and_counted() {
        let db = fixtures::db();
        let a = fixtures::user(&db, "alice");
        let b = fixtures::user(&db, "bob");

        assert!(db.follow(a, b).unwrap());
        assert!(!db.follow(a, b).unwrap());
        assert_eq!(db.follower_ids(b).unwrap(), vec![a]);
        assert_eq!(db.follow_counts(b).unwrap(), (1, 0));
        assert_eq!(db.following(a, 10, 0).unwrap()[0].username, "bob");

        assert!(db.unfollow(a, b).unwrap());
        assert!(db.follower_ids(b).unwrap().is_empty());
    }

    #[test]
    fn profile_update_keeps_unset_fields() {
        let db = fixtures::db();
        let id = fixtures::user(&db, "alice");

        db.update_profile(id, &ProfileUpdate { bio: Some("Latakia devotee"), ..Default::default() })
            .unwrap();
        db.update_profile(id, &ProfileUpdate { location: Some("Bristol"), ..Default::default() })
            .unwrap();

        let row = db.get_user_by_id(id).unwrap().unwrap();
        assert_eq!(row.bio.as_deref(), Some("Latakia devotee"));
        assert_eq!(row.location.as_deref(), Some("Bristol"));
    }

    #[test]
    fn mention_resolution_skips_unknown_names() {
        let db = fixtures::db();
        fixtures::user(&db, "alice");

        let found = db
            .get_users_by_usernames(&["alice".to_string(), "ghost".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "alice");
    }
}
