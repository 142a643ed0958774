use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time in epoch milliseconds, the unit used for every persisted
/// timestamp.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A persisted conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Who authored a message. A closed two-value tag, stored as the literal
/// strings "Yo" and "Bot".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    Yo,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Yo => "Yo",
            Sender::Bot => "Bot",
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Yo" => Ok(Sender::Yo),
            "Bot" => Ok(Sender::Bot),
            other => Err(format!("unknown sender: {other}")),
        }
    }
}

/// One turn within a chat. The `audio` and `image` fields hold local file
/// references; they are persisted as strings but the files themselves are
/// transient and may no longer exist after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender: Sender,
    pub text: Option<String>,
    pub audio: Option<String>,
    pub image: Option<String>,
    pub timestamp: i64,
}

/// Insert shape for a message. The repository assigns `id` and `timestamp`.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub chat_id: i64,
    pub sender: Sender,
    pub text: Option<String>,
    pub audio: Option<String>,
    pub image: Option<String>,
}

impl MessageDraft {
    pub fn user_text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender: Sender::Yo,
            text: Some(text.into()),
            audio: None,
            image: None,
        }
    }

    pub fn user_audio(chat_id: i64, audio: impl Into<String>, transcript: Option<String>) -> Self {
        Self {
            chat_id,
            sender: Sender::Yo,
            text: transcript,
            audio: Some(audio.into()),
            image: None,
        }
    }

    pub fn user_image(chat_id: i64, image: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender: Sender::Yo,
            text: Some(caption.into()),
            audio: None,
            image: Some(image.into()),
        }
    }

    pub fn bot_text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender: Sender::Bot,
            text: Some(text.into()),
            audio: None,
            image: None,
        }
    }

    /// A message must carry at least one of text, audio, or image.
    pub fn has_content(&self) -> bool {
        self.text.is_some() || self.audio.is_some() || self.image.is_some()
    }
}

/// Derives a chat title from the first user message: audio and image chats
/// get fixed labels, text chats the first four words with a trailing ellipsis
/// when truncated.
pub fn generate_chat_title(message: &Message) -> String {
    if message.audio.is_some() {
        return "Chat de Audio".to_string();
    }
    if message.image.is_some() {
        return "Chat de Imagen".to_string();
    }
    if let Some(text) = message.text.as_deref() {
        let words: Vec<&str> = text.split_whitespace().take(4).collect();
        if !words.is_empty() {
            let mut title = words.join(" ");
            if words.len() > 3 {
                title.push_str("...");
            }
            return title;
        }
    }
    "Nuevo Chat".to_string()
}
