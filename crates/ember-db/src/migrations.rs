use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id            TEXT PRIMARY KEY,
                username      TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password      TEXT NOT NULL,
                display_name  TEXT,
                bio           TEXT,
                avatar_url    TEXT,
                location      TEXT,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE follows (
                follower_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                following_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at    TEXT NOT NULL,
                PRIMARY KEY (follower_id, following_id)
            );

            CREATE INDEX idx_follows_following ON follows(following_id);

            CREATE TABLE clubs (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL UNIQUE COLLATE NOCASE,
                description  TEXT,
                is_private   INTEGER NOT NULL DEFAULT 0,
                owner_id     TEXT NOT NULL REFERENCES users(id),
                created_at   TEXT NOT NULL
            );

            CREATE TABLE club_members (
                club_id    TEXT NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
                user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role       TEXT NOT NULL DEFAULT 'member',
                joined_at  TEXT NOT NULL,
                PRIMARY KEY (club_id, user_id)
            );

            CREATE TABLE club_invites (
                club_id     TEXT NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                invited_by  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (club_id, user_id)
            );

            CREATE TABLE posts (
                id          TEXT PRIMARY KEY,
                author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                club_id     TEXT REFERENCES clubs(id) ON DELETE CASCADE,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_posts_club ON posts(club_id, created_at);

            CREATE TABLE comments (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                parent_id   TEXT REFERENCES comments(id) ON DELETE CASCADE,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_comments_post ON comments(post_id, created_at);

            CREATE TABLE reviews (
                id            TEXT PRIMARY KEY,
                author_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                product_name  TEXT NOT NULL,
                product_kind  TEXT NOT NULL,
                rating        INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                content       TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE direct_messages (
                id            TEXT PRIMARY KEY,
                sender_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                recipient_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content       TEXT NOT NULL,
                read          INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL
            );

            CREATE INDEX idx_dm_pair ON direct_messages(sender_id, recipient_id, created_at);

            CREATE TABLE events (
                id           TEXT PRIMARY KEY,
                host_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                club_id      TEXT REFERENCES clubs(id) ON DELETE CASCADE,
                title        TEXT NOT NULL,
                description  TEXT,
                location     TEXT,
                starts_at    TEXT NOT NULL,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX idx_events_start ON events(starts_at);

            CREATE TABLE rsvps (
                event_id    TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                status      TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (event_id, user_id)
            );

            CREATE TABLE event_reminders (
                event_id         TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                user_id          TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                reminder_window  TEXT NOT NULL,
                sent_at          TEXT NOT NULL,
                PRIMARY KEY (event_id, user_id, reminder_window)
            );

            CREATE TABLE notification_preferences (
                user_id           TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                new_follower      INTEGER NOT NULL DEFAULT 1,
                new_post_in_club  INTEGER NOT NULL DEFAULT 1,
                new_comment       INTEGER NOT NULL DEFAULT 1,
                new_reply         INTEGER NOT NULL DEFAULT 1,
                post_mention      INTEGER NOT NULL DEFAULT 1,
                event_reminder    INTEGER NOT NULL DEFAULT 1,
                club_invite       INTEGER NOT NULL DEFAULT 1,
                new_message       INTEGER NOT NULL DEFAULT 1,
                push_enabled      INTEGER NOT NULL DEFAULT 0,
                updated_at        TEXT NOT NULL
            );

            CREATE TABLE notifications (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                category    TEXT NOT NULL,
                title       TEXT NOT NULL,
                body        TEXT NOT NULL,
                link_url    TEXT,
                read        INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_user ON notifications(user_id, created_at);

            CREATE TABLE push_subscriptions (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                endpoint    TEXT NOT NULL UNIQUE,
                p256dh      TEXT NOT NULL,
                auth        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_push_user ON push_subscriptions(user_id);

            CREATE TABLE herf_sessions (
                id           TEXT PRIMARY KEY,
                host_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                club_id      TEXT REFERENCES clubs(id) ON DELETE SET NULL,
                title        TEXT NOT NULL,
                description  TEXT,
                capacity     INTEGER NOT NULL DEFAULT 10,
                is_private   INTEGER NOT NULL DEFAULT 0,
                status       TEXT NOT NULL DEFAULT 'scheduled',
                created_at   TEXT NOT NULL
            );

            CREATE TABLE herf_participants (
                session_id  TEXT NOT NULL REFERENCES herf_sessions(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                joined_at   TEXT NOT NULL,
                PRIMARY KEY (session_id, user_id)
            );

            CREATE TABLE herf_chat_messages (
                id          TEXT PRIMARY KEY,
                session_id  TEXT NOT NULL REFERENCES herf_sessions(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_herf_chat_session ON herf_chat_messages(session_id, created_at);

            CREATE TABLE reports (
                id           TEXT PRIMARY KEY,
                reporter_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                target_kind  TEXT NOT NULL,
                target_id    TEXT NOT NULL,
                reason       TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'open',
                created_at   TEXT NOT NULL
            );

            CREATE TABLE uploads (
                id            TEXT PRIMARY KEY,
                owner_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                sha256        TEXT NOT NULL,
                content_type  TEXT NOT NULL,
                size          INTEGER NOT NULL,
                created_at    TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
