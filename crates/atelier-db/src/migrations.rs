use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT,
            role        TEXT NOT NULL CHECK (role IN ('client', 'designer')),
            avatar_url  TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS projects (
            id          TEXT PRIMARY KEY,
            client_id   TEXT NOT NULL REFERENCES users(id),
            designer_id TEXT REFERENCES users(id),
            title       TEXT NOT NULL,
            description TEXT NOT NULL,
            budget      REAL NOT NULL CHECK (budget >= 0),
            status      TEXT NOT NULL DEFAULT 'open'
                        CHECK (status IN ('open', 'in_progress', 'closed')),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_projects_client
            ON projects(client_id);

        -- One conversation per unordered participant pair. pair_key is
        -- '<participant_a>:<participant_b>' with participant_a < participant_b.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            pair_key        TEXT NOT NULL UNIQUE,
            participant_a   TEXT NOT NULL REFERENCES users(id),
            participant_b   TEXT NOT NULL REFERENCES users(id),
            project_id      TEXT REFERENCES projects(id),
            last_message    TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            CHECK (participant_a < participant_b)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_a
            ON conversations(participant_a, updated_at);
        CREATE INDEX IF NOT EXISTS idx_conversations_b
            ON conversations(participant_b, updated_at);

        CREATE TABLE IF NOT EXISTS conversation_unread (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            text            TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
