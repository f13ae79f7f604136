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
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT,
                display_name    TEXT,
                avatar_url      TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE social_connections (
                id                      TEXT PRIMARY KEY,
                user_id                 TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                platform                TEXT NOT NULL,
                platform_user_id        TEXT NOT NULL,
                platform_username       TEXT,
                access_token_enc        TEXT NOT NULL,
                refresh_token_enc       TEXT,
                expires_at              TEXT,
                scopes                  TEXT NOT NULL DEFAULT '[]',
                is_active               INTEGER NOT NULL DEFAULT 1,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            -- At most one active connection per user and platform
            CREATE UNIQUE INDEX idx_connections_active
                ON social_connections(user_id, platform) WHERE is_active = 1;

            CREATE INDEX idx_connections_identity
                ON social_connections(platform, platform_user_id);

            CREATE TABLE refresh_tokens (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token_hash  TEXT NOT NULL UNIQUE,
                expires_at  TEXT NOT NULL,
                revoked     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE oauth_states (
                state           TEXT PRIMARY KEY,
                platform        TEXT NOT NULL,
                user_id         TEXT REFERENCES users(id) ON DELETE CASCADE,
                code_verifier   TEXT,
                redirect_uri    TEXT NOT NULL,
                expires_at      TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE posts (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content         TEXT NOT NULL,
                media_urls      TEXT NOT NULL DEFAULT '[]',
                status          TEXT NOT NULL DEFAULT 'draft',
                scheduled_at    TEXT,
                published_at    TEXT,
                claim_id        TEXT,
                claimed_at      TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_posts_due ON posts(status, scheduled_at);
            CREATE INDEX idx_posts_user ON posts(user_id, created_at);

            CREATE TABLE post_targets (
                id                  TEXT PRIMARY KEY,
                post_id             TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                connection_id       TEXT NOT NULL REFERENCES social_connections(id),
                status              TEXT NOT NULL DEFAULT 'pending',
                platform_post_id    TEXT,
                error_message       TEXT,
                attempts            INTEGER NOT NULL DEFAULT 0,
                published_at        TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL,
                UNIQUE(post_id, connection_id)
            );

            CREATE TABLE notification_tokens (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token       TEXT NOT NULL UNIQUE,
                device_type TEXT,
                device_id   TEXT,
                is_active   INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
