use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use super::USER_SUMMARY_COLS;
use crate::columns;
use crate::models::{ConversationRow, DirectMessageRow};
use crate::{Database, now};

const DM_COLS: &str = "id, sender_id, recipient_id, content, read, created_at";

impl Database {
    pub fn insert_direct_message(&self, id: Uuid, sender_id: Uuid, recipient_id: Uuid, content: &str) -> Result<DirectMessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO direct_messages (id, sender_id, recipient_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), sender_id.to_string(), recipient_id.to_string(), content, now()],
            )?;
            let sql = format!("SELECT {} FROM direct_messages WHERE id = ?1", DM_COLS);
            let row = conn.query_row(&sql, [id.to_string()], map_dm)?;
            Ok(row)
        })
    }

    /// Both directions of a conversation, oldest first.
    pub fn conversation(&self, user_id: Uuid, partner_id: Uuid, limit: u32, offset: u32) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| {
            // Page from the newest end, then flip back to chronological order
            let sql = format!(
                "SELECT {} FROM direct_messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3 OFFSET ?4",
                DM_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    params![user_id.to_string(), partner_id.to_string(), limit, offset],
                    map_dm,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Marks messages from `partner_id` to `reader_id` as read.
    pub fn mark_conversation_read(&self, reader_id: Uuid, partner_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE direct_messages SET read = 1
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND read = 0",
                params![reader_id.to_string(), partner_id.to_string()],
            )?;
            Ok(changed)
        })
    }

    /// One entry per conversation partner, most recently active first.
    pub fn conversations(&self, user_id: Uuid) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "WITH mine AS (
                    SELECT d.*, d.rowid AS seq,
                           CASE WHEN d.sender_id = ?1 THEN d.recipient_id ELSE d.sender_id END AS partner_id
                    FROM direct_messages d
                    WHERE d.sender_id = ?1 OR d.recipient_id = ?1
                 ),
                 latest AS (
                    SELECT partner_id, MAX(seq) AS seq FROM mine GROUP BY partner_id
                 )
                 SELECT m.id, m.sender_id, m.recipient_id, m.content, m.read, m.created_at,
                        (SELECT COUNT(*) FROM mine x
                          WHERE x.partner_id = m.partner_id AND x.recipient_id = ?1 AND x.read = 0),
                        {}
                 FROM mine m
                 JOIN latest l ON l.partner_id = m.partner_id AND l.seq = m.seq
                 JOIN users u ON u.id = m.partner_id
                 ORDER BY m.created_at DESC, m.seq DESC",
                USER_SUMMARY_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(ConversationRow {
                        last_message: map_dm(row)?,
                        unread: row.get(6)?,
                        partner: columns::user_summary(row, 7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn map_dm(row: &Row) -> rusqlite::Result<DirectMessageRow> {
    Ok(DirectMessageRow {
        id: columns::uuid(row, 0)?,
        sender_id: columns::uuid(row, 1)?,
        recipient_id: columns::uuid(row, 2)?,
        content: row.get(3)?,
        read: row.get(4)?,
        created_at: columns::time(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;

    #[test]
    fn conversation_reads_in_order_and_marks_read() {
        let db = fixtures::db();
        let alice = fixtures::user(&db, "alice");
        let bob = fixtures::user(&db, "bob");
        let carol = fixtures::user(&db, "carol");

        db.insert_direct_message(Uuid::new_v4(), alice, bob, "herf tonight?").unwrap();
        db.insert_direct_message(Uuid::new_v4(), bob, alice, "count me in").unwrap();
        db.insert_direct_message(Uuid::new_v4(), carol, bob, "hello").unwrap();

        let convo = db.conversation(bob, alice, 50, 0).unwrap();
        assert_eq!(convo.len(), 2);
        assert_eq!(convo[0].content, "herf tonight?");
        assert_eq!(convo[1].content, "count me in");

        let partners = db.conversations(bob).unwrap();
        assert_eq!(partners.len(), 2);
        assert_eq!(partners[0].partner.username, "carol");
        assert_eq!(partners[0].unread, 1);
        let with_alice = partners.iter().find(|c| c.partner.id == alice).unwrap();
        assert_eq!(with_alice.last_message.content, "count me in");
        assert_eq!(with_alice.unread, 1);

        assert_eq!(db.mark_conversation_read(bob, alice).unwrap(), 1);
        assert_eq!(db.mark_conversation_read(bob, alice).unwrap(), 0);
    }
}
