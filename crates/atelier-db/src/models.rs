/// Database row types. These map directly to SQLite rows.
/// Distinct from atelier-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: Option<String>,
    pub role: String,
    pub avatar_url: String,
    pub created_at: String,
}

pub struct ProjectRow {
    pub id: String,
    pub client_id: String,
    pub designer_id: Option<String>,
    pub title: String,
    pub description: String,
    pub budget: f64,
    pub status: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub project_id: Option<String>,
    pub last_message: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversationRow {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// The participant that is not `user_id`. Only meaningful when
    /// `user_id` is a participant.
    pub fn other_participant(&self, user_id: &str) -> &str {
        if self.participant_a == user_id {
            &self.participant_b
        } else {
            &self.participant_a
        }
    }
}

/// A conversation as seen by one participant: the other side's display
/// fields and the viewer's unread flag.
pub struct ConversationListRow {
    pub id: String,
    pub project_id: Option<String>,
    pub last_message: String,
    pub updated_at: String,
    pub other_id: String,
    pub other_name: String,
    pub other_avatar_url: String,
    pub unread: bool,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar_url: String,
    pub text: String,
    pub created_at: String,
}
