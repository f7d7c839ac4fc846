use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use ember_types::models::ReportTarget;

use crate::columns::{self, OptionalExt};
use crate::models::{ReportRow, UploadRow};
use crate::{Database, now};

const REPORT_COLS: &str = "id, reporter_id, target_kind, target_id, reason, status, created_at";
const UPLOAD_COLS: &str = "id, owner_id, sha256, content_type, size, created_at";

impl Database {
    // -- Reports --

    pub fn create_report(
        &self,
        id: Uuid,
        reporter_id: Uuid,
        target_kind: ReportTarget,
        target_id: Uuid,
        reason: &str,
    ) -> Result<ReportRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reports (id, reporter_id, target_kind, target_id, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    reporter_id.to_string(),
                    target_kind.as_str(),
                    target_id.to_string(),
                    reason,
                    now()
                ],
            )?;
            let sql = format!("SELECT {} FROM reports WHERE id = ?1", REPORT_COLS);
            Ok(conn.query_row(&sql, [id.to_string()], map_report)?)
        })
    }

    pub fn reports_by(&self, reporter_id: Uuid) -> Result<Vec<ReportRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM reports WHERE reporter_id = ?1 ORDER BY created_at DESC, rowid DESC",
                REPORT_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([reporter_id.to_string()], map_report)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Uploads --

    pub fn insert_upload(
        &self,
        id: Uuid,
        owner_id: Uuid,
        sha256: &str,
        content_type: &str,
        size: u64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO uploads (id, owner_id, sha256, content_type, size, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id.to_string(), owner_id.to_string(), sha256, content_type, size as i64, now()],
            )?;
            Ok(())
        })
    }

    pub fn get_upload(&self, id: Uuid) -> Result<Option<UploadRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM uploads WHERE id = ?1", UPLOAD_COLS);
            conn.query_row(&sql, [id.to_string()], |row| {
                Ok(UploadRow {
                    id: columns::uuid(row, 0)?,
                    owner_id: columns::uuid(row, 1)?,
                    sha256: row.get(2)?,
                    content_type: row.get(3)?,
                    size: row.get::<_, i64>(4)? as u64,
                    created_at: columns::time(row, 5)?,
                })
            })
            .optional()
        })
    }
}

fn map_report(row: &Row) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        id: columns::uuid(row, 0)?,
        reporter_id: columns::uuid(row, 1)?,
        target_kind: columns::tag(row, 2)?,
        target_id: columns::uuid(row, 3)?,
        reason: row.get(4)?,
        status: row.get(5)?,
        created_at: columns::time(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;

    #[test]
    fn reports_list_for_reporter() {
        let db = fixtures::db();
        let alice = fixtures::user(&db, "alice");
        let bob = fixtures::user(&db, "bob");

        let report = db
            .create_report(Uuid::new_v4(), alice, ReportTarget::User, bob, "spam")
            .unwrap();
        assert_eq!(report.status, "open");
        assert_eq!(db.reports_by(alice).unwrap().len(), 1);
        assert!(db.reports_by(bob).unwrap().is_empty());
    }

    #[test]
    fn upload_metadata_round_trip() {
        let db = fixtures::db();
        let alice = fixtures::user(&db, "alice");
        let id = Uuid::new_v4();
        db.insert_upload(id, alice, "abc123", "image/png", 42).unwrap();

        let row = db.get_upload(id).unwrap().unwrap();
        assert_eq!(row.owner_id, alice);
        assert_eq!(row.size, 42);
        assert!(db.get_upload(Uuid::new_v4()).unwrap().is_none());
    }
}
