use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use ember_types::models::ProductKind;

use super::USER_SUMMARY_COLS;
use crate::columns::{self, OptionalExt};
use crate::models::{CommentRow, PostRow, ReviewRow};
use crate::{Database, now};

impl Database {
    // -- Posts --

    pub fn create_post(&self, id: Uuid, author_id: Uuid, club_id: Option<Uuid>, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, club_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    author_id.to_string(),
                    club_id.map(|c| c.to_string()),
                    content,
                    now()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE p.id = ?1", post_select());
            conn.query_row(&sql, [id.to_string()], map_post).optional()
        })
    }

    /// Newest first. `club_id = None` lists the public feed (posts outside any club).
    pub fn list_posts(&self, club_id: Option<Uuid>, limit: u32, offset: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE p.club_id IS ?1 ORDER BY p.created_at DESC, p.rowid DESC LIMIT ?2 OFFSET ?3",
                post_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![club_id.map(|c| c.to_string()), limit, offset], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_post(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM posts WHERE id = ?1", [id.to_string()])?;
            Ok(changed == 1)
        })
    }

    // -- Comments --

    pub fn create_comment(
        &self,
        id: Uuid,
        post_id: Uuid,
        author_id: Uuid,
        parent_id: Option<Uuid>,
        content: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, parent_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    post_id.to_string(),
                    author_id.to_string(),
                    parent_id.map(|p| p.to_string()),
                    content,
                    now()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE c.id = ?1", comment_select());
            conn.query_row(&sql, [id.to_string()], map_comment).optional()
        })
    }

    /// Oldest first, so threads read top to bottom.
    pub fn list_comments(&self, post_id: Uuid, limit: u32, offset: u32) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE c.post_id = ?1 ORDER BY c.created_at ASC, c.rowid ASC LIMIT ?2 OFFSET ?3",
                comment_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![post_id.to_string(), limit, offset], map_comment)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reviews --

    pub fn create_review(
        &self,
        id: Uuid,
        author_id: Uuid,
        product_name: &str,
        product_kind: ProductKind,
        rating: u8,
        content: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reviews (id, author_id, product_name, product_kind, rating, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    author_id.to_string(),
                    product_name,
                    product_kind.as_str(),
                    rating,
                    content,
                    now()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_review(&self, id: Uuid) -> Result<Option<ReviewRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE r.id = ?1", review_select());
            conn.query_row(&sql, [id.to_string()], map_review).optional()
        })
    }

    pub fn list_reviews(&self, author_id: Option<Uuid>, limit: u32, offset: u32) -> Result<Vec<ReviewRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE (?1 IS NULL OR r.author_id = ?1)
                 ORDER BY r.created_at DESC, r.rowid DESC LIMIT ?2 OFFSET ?3",
                review_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![author_id.map(|a| a.to_string()), limit, offset], map_review)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn post_select() -> String {
    format!(
        "SELECT p.id, p.club_id, p.content, p.created_at,
                (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id),
                {}
         FROM posts p JOIN users u ON u.id = p.author_id",
        USER_SUMMARY_COLS
    )
}

fn map_post(row: &Row) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: columns::uuid(row, 0)?,
        club_id: columns::opt_uuid(row, 1)?,
        content: row.get(2)?,
        created_at: columns::time(row, 3)?,
        comment_count: row.get(4)?,
        author: columns::user_summary(row, 5)?,
    })
}

fn comment_select() -> String {
    format!(
        "SELECT c.id, c.post_id, c.parent_id, c.content, c.created_at, {}
         FROM comments c JOIN users u ON u.id = c.author_id",
        USER_SUMMARY_COLS
    )
}

fn map_comment(row: &Row) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: columns::uuid(row, 0)?,
        post_id: columns::uuid(row, 1)?,
        parent_id: columns::opt_uuid(row, 2)?,
        content: row.get(3)?,
        created_at: columns::time(row, 4)?,
        author: columns::user_summary(row, 5)?,
    })
}

fn review_select() -> String {
    format!(
        "SELECT r.id, r.product_name, r.product_kind, r.rating, r.content, r.created_at, {}
         FROM reviews r JOIN users u ON u.id = r.author_id",
        USER_SUMMARY_COLS
    )
}

fn map_review(row: &Row) -> rusqlite::Result<ReviewRow> {
    Ok(ReviewRow {
        id: columns::uuid(row, 0)?,
        product_name: row.get(1)?,
        product_kind: columns::tag(row, 2)?,
        rating: row.get(3)?,
        content: row.get(4)?,
        created_at: columns::time(row, 5)?,
        author: columns::user_summary(row, 6)?,
    })
}
