use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Lenient mapping used for upstream requests: anything unknown becomes `user`.
    pub fn from_lenient(role: &str) -> Self {
        match role.to_lowercase().as_str() {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role/content pair as it travels over the HTTP API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User.as_str()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            is_streaming: false,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Empty assistant turn that receives streamed content.
    pub fn streaming_placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Role::Assistant, "")
        }
    }

    /// Content can only grow while the message is streaming.
    pub fn append(&mut self, delta: &str) -> bool {
        if !self.is_streaming {
            return false;
        }
        self.content.push_str(delta);
        true
    }

    pub fn finish(&mut self) {
        self.is_streaming = false;
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }

    /// Converts an API message into an internal one, tolerating unknown roles.
    pub fn from_chat_message(msg: &ChatMessage) -> Self {
        Self::new(Role::from_lenient(&msg.role), msg.content.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_entities: Option<Vec<String>>,
}

impl ConversationContext {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            start_time: now,
            last_update_time: now,
            message_count: 0,
            topic: None,
            detected_entities: None,
        }
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.messages.len(),
        }
    }

    /// Restores `updated_at >= created_at` after an upsert merged timestamps.
    pub fn normalize_timestamps(&mut self) {
        if self.updated_at < self.created_at {
            self.updated_at = self.created_at;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Explicit session identity, passed to every store and augmenter call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn anonymous() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: format!("anon-{}", &simple[..8]),
        }
    }

    pub fn with_new_session(&self) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
        }
    }
}

/// Short display title derived from the first user message.
pub fn generate_title(content: &str) -> String {
    if content.is_empty() {
        return "New Conversation".to_string();
    }
    if content.chars().count() <= 30 {
        return content.to_string();
    }

    let first_sentence = content
        .split(|c| c == '.' || c == '!' || c == '?')
        .next()
        .unwrap_or("")
        .trim();

    if first_sentence.chars().count() <= 50 {
        return first_sentence.to_string();
    }

    let head: String = first_sentence.chars().take(47).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_is_lenient() {
        assert_eq!(Role::from_lenient("Assistant"), Role::Assistant);
        assert_eq!(Role::from_lenient("system"), Role::System);
        assert_eq!(Role::from_lenient("tool"), Role::User);
    }

    #[test]
    fn finished_messages_are_immutable() {
        let mut msg = Message::streaming_placeholder();
        assert!(msg.append("Hel"));
        assert!(msg.append("lo"));
        msg.finish();
        assert!(!msg.append("!"));
        assert_eq!(msg.content, "Hello");
    }

    #[test]
    fn message_serializes_camel_case() {
        let msg = Message::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["role"], "user");
        assert!(json.get("isStreaming").is_none());
    }

    #[test]
    fn anonymous_session_shape() {
        let session = SessionContext::anonymous();
        assert!(session.user_id.starts_with("anon-"));
        assert_eq!(session.user_id.len(), "anon-".len() + 8);

        let rotated = session.with_new_session();
        assert_eq!(rotated.user_id, session.user_id);
        assert_ne!(rotated.session_id, session.session_id);
    }

    #[test]
    fn titles_follow_first_sentence() {
        assert_eq!(generate_title(""), "New Conversation");
        assert_eq!(generate_title("Short question"), "Short question");
        assert_eq!(
            generate_title("Tell me about rust lifetimes. And also borrowing rules please."),
            "Tell me about rust lifetimes"
        );
        let long = "a".repeat(80);
        let title = generate_title(&long);
        assert_eq!(title.len(), 50);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn timestamps_are_clamped() {
        let mut conversation = Conversation {
            id: "c1".into(),
            user_id: "u1".into(),
            title: "t".into(),
            messages: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now() - chrono::Duration::hours(1),
        };
        conversation.normalize_timestamps();
        assert!(conversation.updated_at >= conversation.created_at);
    }
}
