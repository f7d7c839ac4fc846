use anyhow::Result;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use ember_types::models::{NotificationPayload, NotificationPreferences};

use crate::columns::{self, OptionalExt};
use crate::models::{NotificationRow, PushSubscriptionRow};
use crate::{Database, now};

const NOTIFICATION_COLS: &str = "id, user_id, category, title, body, link_url, read, created_at";
const PUSH_COLS: &str = "id, user_id, endpoint, p256dh, auth, created_at";

impl Database {
    // -- Preferences --

    /// Stored preferences, or `None` when the user never touched them.
    /// Callers that only need to read (the dispatcher) treat `None` as defaults.
    pub fn get_preferences(&self, user_id: Uuid) -> Result<Option<NotificationPreferences>> {
        self.with_conn(|conn| query_preferences(conn, user_id))
    }

    /// Reads preferences, materializing the default row on first access.
    pub fn get_or_create_preferences(&self, user_id: Uuid) -> Result<NotificationPreferences> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO notification_preferences (user_id, updated_at) VALUES (?1, ?2)",
                params![user_id.to_string(), now()],
            )?;
            query_preferences(conn, user_id)?
                .ok_or_else(|| anyhow::anyhow!("preferences missing after insert for {}", user_id))
        })
    }

    pub fn save_preferences(&self, user_id: Uuid, prefs: &NotificationPreferences) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notification_preferences (
                    user_id, new_follower, new_post_in_club, new_comment, new_reply,
                    post_mention, event_reminder, club_invite, new_message, push_enabled, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(user_id) DO UPDATE SET
                    new_follower = excluded.new_follower,
                    new_post_in_club = excluded.new_post_in_club,
                    new_comment = excluded.new_comment,
                    new_reply = excluded.new_reply,
                    post_mention = excluded.post_mention,
                    event_reminder = excluded.event_reminder,
                    club_invite = excluded.club_invite,
                    new_message = excluded.new_message,
                    push_enabled = excluded.push_enabled,
                    updated_at = excluded.updated_at",
                params![
                    user_id.to_string(),
                    prefs.new_follower,
                    prefs.new_post_in_club,
                    prefs.new_comment,
                    prefs.new_reply,
                    prefs.post_mention,
                    prefs.event_reminder,
                    prefs.club_invite,
                    prefs.new_message,
                    prefs.push_enabled,
                    now()
                ],
            )?;
            Ok(())
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, id: Uuid, user_id: Uuid, payload: &NotificationPayload) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, category, title, body, link_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    user_id.to_string(),
                    payload.category.as_str(),
                    payload.title,
                    payload.body,
                    payload.link_url,
                    now()
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM notifications
                 WHERE user_id = ?1 AND (?2 = 0 OR read = 0)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3 OFFSET ?4",
                NOTIFICATION_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id.to_string(), unread_only, limit, offset], map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn unread_notification_count(&self, user_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// False when the notification does not exist or belongs to someone else.
    pub fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                [user_id.to_string()],
            )?;
            Ok(changed)
        })
    }

    pub fn delete_notification(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn count_notifications(&self, user_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Push subscriptions --

    /// Insert or rebind by endpoint: a browser re-subscribing (possibly after
    /// a different user logged in) takes the row over with fresh keys.
    pub fn upsert_push_subscription(
        &self,
        id: Uuid,
        user_id: Uuid,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(endpoint) DO UPDATE SET
                    user_id = excluded.user_id,
                    p256dh = excluded.p256dh,
                    auth = excluded.auth",
                params![id.to_string(), user_id.to_string(), endpoint, p256dh, auth, now()],
            )?;
            Ok(())
        })
    }

    pub fn push_subscriptions_for(&self, user_id: Uuid) -> Result<Vec<PushSubscriptionRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM push_subscriptions WHERE user_id = ?1", PUSH_COLS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], map_push)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_push_subscription(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM push_subscriptions WHERE id = ?1", [id.to_string()])?;
            Ok(changed == 1)
        })
    }

    pub fn delete_push_subscription_by_endpoint(&self, user_id: Uuid, endpoint: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM push_subscriptions WHERE user_id = ?1 AND endpoint = ?2",
                params![user_id.to_string(), endpoint],
            )?;
            Ok(changed == 1)
        })
    }
}

fn query_preferences(conn: &Connection, user_id: Uuid) -> Result<Option<NotificationPreferences>> {
    conn.query_row(
        "SELECT new_follower, new_post_in_club, new_comment, new_reply, post_mention,
                event_reminder, club_invite, new_message, push_enabled
         FROM notification_preferences WHERE user_id = ?1",
        [user_id.to_string()],
        |row| {
            Ok(NotificationPreferences {
                new_follower: row.get(0)?,
                new_post_in_club: row.get(1)?,
                new_comment: row.get(2)?,
                new_reply: row.get(3)?,
                post_mention: row.get(4)?,
                event_reminder: row.get(5)?,
                club_invite: row.get(6)?,
                new_message: row.get(7)?,
                push_enabled: row.get(8)?,
            })
        },
    )
    .optional()
}

fn map_notification(row: &Row) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: columns::uuid(row, 0)?,
        user_id: columns::uuid(row, 1)?,
        category: columns::tag(row, 2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        link_url: row.get(5)?,
        read: row.get(6)?,
        created_at: columns::time(row, 7)?,
    })
}

fn map_push(row: &Row) -> rusqlite::Result<PushSubscriptionRow> {
    Ok(PushSubscriptionRow {
        id: columns::uuid(row, 0)?,
        user_id: columns::uuid(row, 1)?,
        endpoint: row.get(2)?,
        p256dh: row.get(3)?,
        auth: row.get(4)?,
        created_at: columns::time(row, 5)?,
    })
}
