//! Database row types. Ids, timestamps and tags are decoded on read; the
//! API layer maps these onto the ember-types response bodies.
use chrono::{DateTime, Utc};
use uuid::Uuid;

use ember_types::models::{
    ClubRole, NotificationCategory, ProductKind, ReportTarget, SessionStatus,
    UserSummary,
};

pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

pub struct ClubRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub owner_id: Uuid,
    pub member_count: u32,
    pub created_at: DateTime<Utc>,
}

pub struct ClubMemberRow {
    pub club_id: Uuid,
    pub user: UserSummary,
    pub role: ClubRole,
    pub joined_at: DateTime<Utc>,
}

pub struct PostRow {
    pub id: Uuid,
    pub author: UserSummary,
    pub club_id: Option<Uuid>,
    pub content: String,
    pub comment_count: u32,
    pub created_at: DateTime<Utc>,
}

pub struct CommentRow {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author: UserSummary,
    pub parent_id: Option<Uuid>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct ReviewRow {
    pub id: Uuid,
    pub author: UserSummary,
    pub product_name: String,
    pub product_kind: ProductKind,
    pub rating: u8,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct DirectMessageRow {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

pub struct ConversationRow {
    pub partner: UserSummary,
    pub last_message: DirectMessageRow,
    pub unread: u32,
}

pub struct EventRow {
    pub id: Uuid,
    pub host_id: Uuid,
    pub club_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub going_count: u32,
    pub created_at: DateTime<Utc>,
}

pub struct NotificationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category: NotificationCategory,
    pub title: String,
    pub body: String,
    pub link_url: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PushSubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: DateTime<Utc>,
}

pub struct SessionRow {
    pub id: Uuid,
    pub host_id: Uuid,
    pub club_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub capacity: u32,
    pub is_private: bool,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

pub struct ChatMessageRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user: UserSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct ReportRow {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub target_kind: ReportTarget,
    pub target_id: Uuid,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub struct UploadRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub sha256: String,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}
