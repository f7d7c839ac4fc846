use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ClubRole, NotificationPreferences, ProductKind, ReportTarget, RsvpStatus, SessionStatus,
    UserSummary,
};

// -- JWT Claims --

/// JWT claims shared across ember-api (REST middleware) and ember-gateway
/// (WebSocket handshake).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Pagination --

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl Page {
    /// Clamp to a sane window so a client can't ask for the whole table.
    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, 100),
            offset: self.offset,
        }
    }
}

fn default_limit() -> u32 {
    20
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
    pub follower_count: u32,
    pub following_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowResponse {
    pub following: bool,
}

// -- Clubs --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateClubRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClubResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub owner_id: Uuid,
    pub member_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClubMemberResponse {
    pub user: UserSummary,
    pub role: ClubRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClubInviteRequest {
    pub user_id: Uuid,
}

// -- Posts & comments --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: String,
    pub club_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub author: UserSummary,
    pub club_id: Option<Uuid>,
    pub content: String,
    pub comment_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub content: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author: UserSummary,
    pub parent_id: Option<Uuid>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Reviews --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReviewRequest {
    pub product_name: String,
    pub product_kind: ProductKind,
    pub rating: u8,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub author: UserSummary,
    pub product_name: String,
    pub product_kind: ProductKind,
    pub rating: u8,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Direct messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendDirectMessageRequest {
    pub recipient_id: Uuid,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirectMessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub partner: UserSummary,
    pub last_message: DirectMessageResponse,
    pub unread: u32,
}

// -- Events --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub club_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
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

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsvpRequest {
    pub status: RsvpStatus,
}

// -- Herf sessions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionRequest {
    pub title: String,
    pub description: Option<String>,
    pub club_id: Option<Uuid>,
    pub capacity: Option<u32>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub host_id: Uuid,
    pub club_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub capacity: u32,
    pub is_private: bool,
    pub status: SessionStatus,
    pub participants: Vec<UserSummary>,
    pub created_at: DateTime<Utc>,
}

// -- Notifications --

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub count: u32,
}

/// Partial update: fields left out keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePreferencesRequest {
    pub new_follower: Option<bool>,
    pub new_post_in_club: Option<bool>,
    pub new_comment: Option<bool>,
    pub new_reply: Option<bool>,
    pub post_mention: Option<bool>,
    pub event_reminder: Option<bool>,
    pub club_invite: Option<bool>,
    pub new_message: Option<bool>,
    pub push_enabled: Option<bool>,
}

impl UpdatePreferencesRequest {
    pub fn apply(&self, prefs: &mut NotificationPreferences) {
        let fields = [
            (self.new_follower, &mut prefs.new_follower),
            (self.new_post_in_club, &mut prefs.new_post_in_club),
            (self.new_comment, &mut prefs.new_comment),
            (self.new_reply, &mut prefs.new_reply),
            (self.post_mention, &mut prefs.post_mention),
            (self.event_reminder, &mut prefs.event_reminder),
            (self.club_invite, &mut prefs.club_invite),
            (self.new_message, &mut prefs.new_message),
            (self.push_enabled, &mut prefs.push_enabled),
        ];
        for (update, slot) in fields {
            if let Some(value) = update {
                *slot = value;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushSubscribeRequest {
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushUnsubscribeRequest {
    pub endpoint: String,
}

// -- Uploads --

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub url: String,
    pub content_type: String,
    pub size: u64,
}

// -- Reports --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReportRequest {
    pub target_kind: ReportTarget,
    pub target_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    pub id: Uuid,
    pub target_kind: ReportTarget,
    pub target_id: Uuid,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
