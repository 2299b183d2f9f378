use crate::models::{ConversationListRow, ConversationRow, MessageRow, ProjectRow, UserRow};
use crate::Database;
use anyhow::{Result, ensure};
use rusqlite::{Connection, Row};
use tracing::debug;

const USER_COLUMNS: &str = "id, name, email, password, role, avatar_url, created_at";

const PROJECT_COLUMNS: &str =
    "id, client_id, designer_id, title, description, budget, status, created_at";

const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, project_id, last_message, created_at, updated_at";

impl Database {
    // -- Users --

    /// Insert a user. Returns false, without touching the table, when the
    /// email is already registered.
    #[allow(clippy::too_many_arguments)]
    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        password_hash: Option<&str>,
        role: &str,
        avatar_url: &str,
        now: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, name, email, password, role, avatar_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(email) DO NOTHING",
                rusqlite::params![id, name, email, password_hash, role, avatar_url, now],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Update the mutable profile fields. `None` leaves a field unchanged.
    /// Returns false if the user does not exist.
    pub fn update_user_profile(
        &self,
        id: &str,
        role: Option<&str>,
        avatar_url: Option<&str>,
        now: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users
                 SET role = COALESCE(?2, role), avatar_url = COALESCE(?3, avatar_url), updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, role, avatar_url, now],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Projects --

    pub fn create_project(
        &self,
        id: &str,
        client_id: &str,
        title: &str,
        description: &str,
        budget: f64,
        now: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, client_id, title, description, budget, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![id, client_id, title, description, budget, now],
            )?;
            Ok(())
        })
    }

    pub fn get_project(&self, id: &str) -> Result<Option<ProjectRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
            conn.query_row(&sql, [id], project_from_row).optional()
        })
    }

    /// Record the selected designer and move the project to in_progress.
    /// Only open projects transition; returns false otherwise.
    pub fn select_designer(&self, project_id: &str, designer_id: &str, now: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE projects
                 SET designer_id = ?2, status = 'in_progress', updated_at = ?3
                 WHERE id = ?1 AND status = 'open'",
                rusqlite::params![project_id, designer_id, now],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Conversations --

    /// Insert-or-fetch the conversation for an unordered participant pair.
    ///
    /// The insert is a no-op when the pair already has a conversation (the
    /// UNIQUE pair_key absorbs concurrent first contact), and the follow-up
    /// select returns whichever row won. Returns (conversation_id, created).
    pub fn resolve_conversation(
        &self,
        candidate_id: &str,
        user_a: &str,
        user_b: &str,
        project_id: Option<&str>,
        now: &str,
    ) -> Result<(String, bool)> {
        ensure!(user_a != user_b, "a conversation needs two distinct participants");

        let (first, second) = ordered_pair(user_a, user_b);
        let key = pair_key(user_a, user_b);

        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO conversations
                    (id, pair_key, participant_a, participant_b, project_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(pair_key) DO NOTHING",
                rusqlite::params![candidate_id, key, first, second, project_id, now],
            )?;

            let id: String = conn.query_row(
                "SELECT id FROM conversations WHERE pair_key = ?1",
                [&key],
                |row| row.get(0),
            )?;

            debug!("Resolved pair {} to conversation {} (created: {})", key, id, inserted == 1);
            Ok((id, inserted == 1))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
            conn.query_row(&sql, [id], conversation_from_row).optional()
        })
    }

    /// All conversations `user_id` takes part in, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationListRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.project_id, c.last_message, c.updated_at,
                        u.id, u.name, u.avatar_url,
                        EXISTS (
                            SELECT 1 FROM conversation_unread r
                            WHERE r.conversation_id = c.id AND r.user_id = ?1
                        )
                 FROM conversations c
                 JOIN users u
                   ON u.id = CASE WHEN c.participant_a = ?1 THEN c.participant_b ELSE c.participant_a END
                 WHERE c.participant_a = ?1 OR c.participant_b = ?1
                 ORDER BY c.updated_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationListRow {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        last_message: row.get(2)?,
                        updated_at: row.get(3)?,
                        other_id: row.get(4)?,
                        other_name: row.get(5)?,
                        other_avatar_url: row.get(6)?,
                        unread: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Refresh the denormalized summary after a message was stored: the
    /// last-message snapshot, the activity timestamp, and the unread set
    /// (sender read, recipient unread). Last writer wins.
    pub fn update_conversation_summary(
        &self,
        conversation_id: &str,
        sender_id: &str,
        recipient_id: &str,
        text: &str,
        at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET last_message = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![conversation_id, text, at],
            )?;
            conn.execute(
                "DELETE FROM conversation_unread WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, sender_id),
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO conversation_unread (conversation_id, user_id) VALUES (?1, ?2)",
                (conversation_id, recipient_id),
            )?;
            Ok(())
        })
    }

    // -- Unread --

    /// Clear `user_id`'s unread flag. Returns whether it was set.
    pub fn mark_read(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM conversation_unread WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, user_id),
            )?;
            Ok(removed > 0)
        })
    }

    pub fn is_unread(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let unread: bool = conn.query_row(
                "SELECT EXISTS (
                    SELECT 1 FROM conversation_unread WHERE conversation_id = ?1 AND user_id = ?2
                 )",
                (conversation_id, user_id),
                |row| row.get(0),
            )?;
            Ok(unread)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, conversation_id, sender_id, text, created_at],
            )?;
            Ok(())
        })
    }

    /// Messages of a conversation, oldest first. With `after`, only those
    /// created strictly later.
    pub fn get_messages(&self, conversation_id: &str, after: Option<&str>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id, after))
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT m.id, m.conversation_id, m.sender_id, u.name, u.avatar_url, m.text, m.created_at
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.id = ?1",
                [id],
                message_from_row,
            )
            .optional()
        })
    }
}

fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a < b { (a, b) } else { (b, a) }
}

/// Canonical key for an unordered participant pair.
pub fn pair_key(a: &str, b: &str) -> String {
    let (first, second) = ordered_pair(a, b);
    format!("{}:{}", first, second)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                role: row.get(4)?,
                avatar_url: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_messages(conn: &Connection, conversation_id: &str, after: Option<&str>) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch sender display fields in a single query (no N+1).
    // rowid breaks ties between messages stored within the same microsecond.
    let mut stmt = conn.prepare(
        "SELECT m.id, m.conversation_id, m.sender_id, u.name, u.avatar_url, m.text, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.conversation_id = ?1 AND (?2 IS NULL OR m.created_at > ?2)
         ORDER BY m.created_at ASC, m.rowid ASC",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![conversation_id, after], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get::<_, Option<String>>(3)?.unwrap_or_else(|| "unknown".to_string()),
        sender_avatar_url: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        text: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        client_id: row.get(1)?,
        designer_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        budget: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        project_id: row.get(3)?,
        last_message: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
