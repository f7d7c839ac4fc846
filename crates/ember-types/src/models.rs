use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification categories. Each one is gated by exactly one preference flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationCategory {
    NewFollower,
    NewPostInClub,
    NewComment,
    NewReply,
    PostMention,
    EventReminder,
    ClubInvite,
    NewMessage,
}

impl NotificationCategory {
    pub const ALL: [NotificationCategory; 8] = [
        Self::NewFollower,
        Self::NewPostInClub,
        Self::NewComment,
        Self::NewReply,
        Self::PostMention,
        Self::EventReminder,
        Self::ClubInvite,
        Self::NewMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewFollower => "NEW_FOLLOWER",
            Self::NewPostInClub => "NEW_POST_IN_CLUB",
            Self::NewComment => "NEW_COMMENT",
            Self::NewReply => "NEW_REPLY",
            Self::PostMention => "POST_MENTION",
            Self::EventReminder => "EVENT_REMINDER",
            Self::ClubInvite => "CLUB_INVITE",
            Self::NewMessage => "NEW_MESSAGE",
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Returned when a stored or submitted enum tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// What a caller hands to the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub category: NotificationCategory,
    pub title: String,
    pub body: String,
    pub link_url: Option<String>,
}

impl NotificationPayload {
    pub fn new(category: NotificationCategory, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            category,
            title: title.into(),
            body: body.into(),
            link_url: None,
        }
    }

    pub fn with_link(mut self, url: impl Into<String>) -> Self {
        self.link_url = Some(url.into());
        self
    }
}

/// Per-user switches. A user without a stored row gets `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub new_follower: bool,
    pub new_post_in_club: bool,
    pub new_comment: bool,
    pub new_reply: bool,
    pub post_mention: bool,
    pub event_reminder: bool,
    pub club_invite: bool,
    pub new_message: bool,
    pub push_enabled: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            new_follower: true,
            new_post_in_club: true,
            new_comment: true,
            new_reply: true,
            post_mention: true,
            event_reminder: true,
            club_invite: true,
            new_message: true,
            push_enabled: false,
        }
    }
}

impl NotificationPreferences {
    pub fn allows(&self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::NewFollower => self.new_follower,
            NotificationCategory::NewPostInClub => self.new_post_in_club,
            NotificationCategory::NewComment => self.new_comment,
            NotificationCategory::NewReply => self.new_reply,
            NotificationCategory::PostMention => self.post_mention,
            NotificationCategory::EventReminder => self.event_reminder,
            NotificationCategory::ClubInvite => self.club_invite,
            NotificationCategory::NewMessage => self.new_message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub category: NotificationCategory,
    pub title: String,
    pub body: String,
    pub link_url: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Public view of a user, embedded in posts, messages and relay events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

macro_rules! tag_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $tag:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $tag),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok(Self::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }
    };
}

tag_enum!(
    ClubRole { Owner => "owner", Admin => "admin", Member => "member" }
);

impl ClubRole {
    pub fn can_invite(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

tag_enum!(
    RsvpStatus { Going => "going", Maybe => "maybe", NotGoing => "not_going" }
);

tag_enum!(
    ProductKind { Pipe => "pipe", Cigar => "cigar", Tobacco => "tobacco", Accessory => "accessory" }
);

tag_enum!(
    ReportTarget { User => "user", Post => "post", Comment => "comment", Review => "review", Club => "club" }
);

tag_enum!(
    /// Lifecycle of a herf session record. The video room itself lives with the vendor.
    SessionStatus { Scheduled => "scheduled", Live => "live", Ended => "ended" }
);

tag_enum!(
    /// Which reminder a sweep is sending for an event.
    ReminderWindow { DayBefore => "24h", HourBefore => "1h" }
);
