use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use uuid::Uuid;

use ember_types::models::{ReminderWindow, RsvpStatus};

use crate::columns::{self, OptionalExt};
use crate::models::EventRow;
use crate::{Database, now, timestamp};

const EVENT_SELECT: &str = "SELECT e.id, e.host_id, e.club_id, e.title, e.description, e.location,
            e.starts_at,
            (SELECT COUNT(*) FROM rsvps r WHERE r.event_id = e.id AND r.status = 'going'),
            e.created_at
     FROM events e";

pub struct NewEvent<'a> {
    pub id: Uuid,
    pub host_id: Uuid,
    pub club_id: Option<Uuid>,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub location: Option<&'a str>,
    pub starts_at: DateTime<Utc>,
}

impl Database {
    pub fn create_event(&self, event: &NewEvent<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, host_id, club_id, title, description, location, starts_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id.to_string(),
                    event.host_id.to_string(),
                    event.club_id.map(|c| c.to_string()),
                    event.title,
                    event.description,
                    event.location,
                    timestamp(event.starts_at),
                    now()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_event(&self, id: Uuid) -> Result<Option<EventRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE e.id = ?1", EVENT_SELECT);
            conn.query_row(&sql, [id.to_string()], map_event).optional()
        })
    }

    /// Events visible to `viewer` starting at or after `from`, soonest first.
    /// Private club events are only listed to members of that club.
    pub fn list_events(
        &self,
        viewer: Uuid,
        from: Option<DateTime<Utc>>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} LEFT JOIN clubs c ON c.id = e.club_id
                 WHERE (?1 IS NULL OR e.starts_at >= ?1)
                   AND (e.club_id IS NULL OR c.is_private = 0
                        OR EXISTS (SELECT 1 FROM club_members m WHERE m.club_id = e.club_id AND m.user_id = ?4))
                 ORDER BY e.starts_at ASC LIMIT ?2 OFFSET ?3",
                EVENT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![from.map(timestamp), limit, offset, viewer.to_string()],
                    map_event,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Half-open range `[from, to)` on the start time.
    pub fn events_starting_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE e.starts_at >= ?1 AND e.starts_at < ?2 ORDER BY e.starts_at ASC",
                EVENT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![timestamp(from), timestamp(to)], map_event)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn upsert_rsvp(&self, event_id: Uuid, user_id: Uuid, status: RsvpStatus) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rsvps (event_id, user_id, status, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(event_id, user_id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
                params![event_id.to_string(), user_id.to_string(), status.as_str(), now()],
            )?;
            Ok(())
        })
    }

    pub fn going_attendee_ids(&self, event_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM rsvps WHERE event_id = ?1 AND status = 'going'",
            )?;
            let ids = stmt
                .query_map([event_id.to_string()], |row| columns::uuid(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Claims the reminder slot for (event, user, window). Returns false when
    /// an earlier sweep already sent it.
    pub fn record_reminder(&self, event_id: Uuid, user_id: Uuid, window: ReminderWindow) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO event_reminders (event_id, user_id, reminder_window, sent_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![event_id.to_string(), user_id.to_string(), window.as_str(), now()],
            )?;
            Ok(changed == 1)
        })
    }
}

fn map_event(row: &Row) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: columns::uuid(row, 0)?,
        host_id: columns::uuid(row, 1)?,
        club_id: columns::opt_uuid(row, 2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        location: row.get(5)?,
        starts_at: columns::time(row, 6)?,
        going_count: row.get(7)?,
        created_at: columns::time(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;
    use chrono::Duration;

    fn event_at(db: &Database, host: Uuid, starts_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        db.create_event(&NewEvent {
            id,
            host_id: host,
            club_id: None,
            title: "Autumn herf",
            description: None,
            location: Some("The Crown"),
            starts_at,
        })
        .unwrap();
        id
    }

    #[test]
    fn range_query_is_half_open() {
        let db = fixtures::db();
        let host = fixtures::user(&db, "host");
        let base = Utc::now();
        let inside = event_at(&db, host, base + Duration::minutes(10));
        event_at(&db, host, base + Duration::minutes(30));

        let found = db
            .events_starting_between(base, base + Duration::minutes(30))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, inside);
    }

    #[test]
    fn listing_hides_private_club_events_from_non_members() {
        let db = fixtures::db();
        let owner = fixtures::user(&db, "owner");
        let outsider = fixtures::user(&db, "outsider");
        let club = Uuid::new_v4();
        db.create_club(club, owner, "Back Room", None, true).unwrap();

        let open = event_at(&db, owner, Utc::now() + Duration::days(1));
        let hidden = Uuid::new_v4();
        db.create_event(&NewEvent {
            id: hidden,
            host_id: owner,
            club_id: Some(club),
            title: "Members only",
            description: None,
            location: None,
            starts_at: Utc::now() + Duration::days(2),
        })
        .unwrap();

        let seen: Vec<Uuid> = db.list_events(outsider, None, 50, 0).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(seen, vec![open]);
        let seen: Vec<Uuid> = db.list_events(owner, None, 50, 0).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(seen, vec![open, hidden]);
    }

    #[test]
    fn rsvp_upsert_changes_going_set() {
        let db = fixtures::db();
        let host = fixtures::user(&db, "host");
        let guest = fixtures::user(&db, "guest");
        let event = event_at(&db, host, Utc::now() + Duration::days(2));

        db.upsert_rsvp(event, guest, RsvpStatus::Going).unwrap();
        assert_eq!(db.going_attendee_ids(event).unwrap(), vec![guest]);
        assert_eq!(db.get_event(event).unwrap().unwrap().going_count, 1);

        db.upsert_rsvp(event, guest, RsvpStatus::Maybe).unwrap();
        assert!(db.going_attendee_ids(event).unwrap().is_empty());
    }

    #[test]
    fn reminder_marker_is_claimed_once() {
        let db = fixtures::db();
        let host = fixtures::user(&db, "host");
        let event = event_at(&db, host, Utc::now() + Duration::hours(1));

        assert!(db.record_reminder(event, host, ReminderWindow::HourBefore).unwrap());
        assert!(!db.record_reminder(event, host, ReminderWindow::HourBefore).unwrap());
        assert!(db.record_reminder(event, host, ReminderWindow::DayBefore).unwrap());
    }
}
