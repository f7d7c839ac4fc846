mod clubs;
mod events;
mod messages;
mod misc;
mod notifications;
mod posts;
mod sessions;
mod users;

pub use events::NewEvent;
pub use sessions::NewSession;
pub use users::ProfileUpdate;

/// SELECT list for the embedded author/user summary. Callers alias the users
/// table as `u`.
pub(crate) const USER_SUMMARY_COLS: &str = "u.id, u.username, u.display_name, u.avatar_url";

#[cfg(test)]
pub(crate) mod fixtures {
    use uuid::Uuid;

    use crate::Database;

    pub fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    pub fn user(db: &Database, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, username, "hash", None).unwrap();
        id
    }
}
