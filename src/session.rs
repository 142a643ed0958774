use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::chat::{Chat, Message, MessageDraft, Sender, generate_chat_title};
use crate::error::Result;
use crate::provider::{BotReply, ResponseProvider, UserInput};
use crate::settings::Settings;
use crate::speech::SpeechService;
use crate::storage::ChatRepository;

/// In-memory mirror of the active session: the chat list, the active chat,
/// the active chat's messages, and per-chat loading flags. Loading is keyed
/// by chat id so a background chat keeps its flag while another chat is
/// displayed.
#[derive(Default)]
struct SessionState {
    chats: Vec<Chat>,
    current_chat: Option<i64>,
    messages: Vec<Message>,
    loading: HashMap<i64, bool>,
}

/// Coordinates the persistent store, response providers, and speech output.
///
/// All methods take `&self`; sends can be spawned as background tasks and a
/// send started on one chat completes even after the user switches away, with
/// only that chat's loading flag and persisted history affected.
pub struct SessionStore<R: ChatRepository> {
    repo: Arc<R>,
    remote: Arc<dyn ResponseProvider>,
    hardcoded: Arc<dyn ResponseProvider>,
    speech: Arc<SpeechService>,
    settings: RwLock<Settings>,
    state: RwLock<SessionState>,
    recording: Arc<AtomicBool>,
}

impl<R: ChatRepository> SessionStore<R> {
    pub fn new(
        repo: Arc<R>,
        remote: Arc<dyn ResponseProvider>,
        hardcoded: Arc<dyn ResponseProvider>,
        speech: Arc<SpeechService>,
        settings: Settings,
    ) -> Self {
        Self {
            repo,
            remote,
            hardcoded,
            speech,
            settings: RwLock::new(settings),
            state: RwLock::new(SessionState::default()),
            recording: Arc::new(AtomicBool::new(false)),
        }
    }

    // --- snapshots ---

    pub async fn chats(&self) -> Vec<Chat> {
        self.state.read().await.chats.clone()
    }

    pub async fn current_chat(&self) -> Option<Chat> {
        let state = self.state.read().await;
        let id = state.current_chat?;
        state.chats.iter().find(|c| c.id == id).cloned()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.messages.clone()
    }

    pub async fn is_loading(&self, chat_id: i64) -> bool {
        self.state.read().await.loading.get(&chat_id).copied().unwrap_or(false)
    }

    pub fn is_playing_audio(&self) -> bool {
        self.speech.is_playing()
    }

    /// Shared with the audio recorder; true while capture is active.
    pub fn recording_flag(&self) -> Arc<AtomicBool> {
        self.recording.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self.settings.write().await;
        f(&mut settings);
    }

    // --- chat lifecycle ---

    /// Loads the chat list from storage, bootstrapping a default chat when
    /// the store is empty. The first chat becomes current.
    pub async fn initialize_chats(&self) -> Result<()> {
        match self.repo.get_all_chats().await {
            Ok(saved) if saved.is_empty() => {
                self.create_chat(Some("Default Chat")).await?;
            }
            Ok(saved) => {
                let first = saved[0].id;
                {
                    let mut state = self.state.write().await;
                    state.chats = saved;
                    state.current_chat = Some(first);
                }
                self.reload_messages(first).await;
            }
            Err(e) => {
                error!(error = %e, "failed to initialize chats");
                if self.state.read().await.chats.is_empty() {
                    self.create_chat(Some("Error Recovery Chat")).await?;
                }
            }
        }
        Ok(())
    }

    /// Creates a chat, mirrors it, and makes it current with an empty
    /// message view.
    pub async fn create_chat(&self, title: Option<&str>) -> Result<Chat> {
        let chat = self.repo.create_chat(title).await?;
        let mut state = self.state.write().await;
        state.chats.push(chat.clone());
        state.current_chat = Some(chat.id);
        state.messages.clear();
        Ok(chat)
    }

    /// Makes `chat_id` the active chat and reloads its messages from
    /// storage — never from a stale in-memory snapshot, so replies that
    /// landed while the chat was in the background are visible. Unknown ids
    /// fall back to the first chat, or a fresh chat when none remain.
    pub async fn switch_chat(&self, chat_id: i64) -> Result<()> {
        if self.state.read().await.current_chat == Some(chat_id) {
            return Ok(());
        }
        match self.repo.get_chat(chat_id).await {
            Ok(Some(chat)) => {
                self.state.write().await.current_chat = Some(chat.id);
                self.reload_messages(chat.id).await;
            }
            Ok(None) => {
                warn!(chat_id, "chat not found, falling back");
                let fallback = self.state.read().await.chats.first().map(|c| c.id);
                match fallback {
                    Some(id) => {
                        self.state.write().await.current_chat = Some(id);
                        self.reload_messages(id).await;
                    }
                    None => {
                        self.create_chat(Some("Fallback Chat")).await?;
                    }
                }
            }
            Err(e) => error!(chat_id, error = %e, "failed to switch chat"),
        }
        Ok(())
    }

    /// Renames a chat and refreshes the mirror with the stored record.
    pub async fn update_chat_title(&self, chat_id: i64, new_title: &str) {
        let existing = {
            let state = self.state.read().await;
            state.chats.iter().find(|c| c.id == chat_id).cloned()
        };
        let Some(existing) = existing else {
            warn!(chat_id, "chat not found for title update");
            return;
        };
        let renamed = Chat { title: new_title.to_string(), ..existing };
        match self.repo.update_chat(&renamed).await {
            Ok(saved) => {
                let mut state = self.state.write().await;
                if let Some(chat) = state.chats.iter_mut().find(|c| c.id == saved.id) {
                    *chat = saved;
                }
            }
            Err(e) => error!(chat_id, error = %e, "failed to update chat title"),
        }
    }

    /// Deletes a chat (messages cascade first in storage). Deleting the
    /// active chat selects the first remaining chat, or creates a fresh
    /// default so the store never ends up empty.
    pub async fn delete_chat(&self, chat_id: i64) -> Result<()> {
        if let Err(e) = self.repo.delete_chat(chat_id).await {
            error!(chat_id, error = %e, "failed to delete chat");
            return Ok(());
        }
        let next = {
            let mut state = self.state.write().await;
            state.chats.retain(|c| c.id != chat_id);
            state.loading.remove(&chat_id);
            if state.current_chat == Some(chat_id) {
                state.current_chat = state.chats.first().map(|c| c.id);
                state.messages.clear();
                state.current_chat
            } else {
                return Ok(());
            }
        };
        match next {
            Some(id) => self.reload_messages(id).await,
            None => {
                self.create_chat(Some("Default Chat After Deletion")).await?;
            }
        }
        Ok(())
    }

    /// Deletes every chat, then unconditionally creates one fresh default.
    pub async fn delete_all_chats(&self) -> Result<()> {
        let ids: Vec<i64> = self.state.read().await.chats.iter().map(|c| c.id).collect();
        for id in ids {
            if let Err(e) = self.repo.delete_chat(id).await {
                error!(chat_id = id, error = %e, "failed to delete chat");
            }
        }
        {
            let mut state = self.state.write().await;
            state.chats.clear();
            state.current_chat = None;
            state.messages.clear();
            state.loading.clear();
        }
        self.create_chat(Some("Default Chat After All Deleted")).await?;
        Ok(())
    }

    /// Clears a chat's messages without deleting the chat.
    pub async fn clear_messages(&self, chat_id: i64) {
        if let Err(e) = self.repo.clear_messages_for_chat(chat_id).await {
            error!(chat_id, error = %e, "failed to clear messages");
            return;
        }
        let mut state = self.state.write().await;
        if state.current_chat == Some(chat_id) {
            state.messages.clear();
        }
    }

    // --- sending ---

    /// Sends a text message on the active chat. Blank input or no active
    /// chat is a no-op.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let Some(chat_id) = self.state.read().await.current_chat else {
            return Ok(());
        };
        self.run_send(
            chat_id,
            MessageDraft::user_text(chat_id, text),
            UserInput::Text(text.to_string()),
            "Error al obtener respuesta.",
        )
        .await
    }

    /// Sends a recorded audio message with an optional live transcript. The
    /// persisted message keeps a transient reference to the local WAV file.
    pub async fn send_audio_message(
        &self,
        audio_path: &str,
        transcript: Option<String>,
    ) -> Result<()> {
        let Some(chat_id) = self.state.read().await.current_chat else {
            return Ok(());
        };
        let transcript = transcript.filter(|t| !t.trim().is_empty());
        let wav = match tokio::fs::read(audio_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(audio_path, error = %e, "could not read recording, sending reference only");
                Vec::new()
            }
        };
        self.run_send(
            chat_id,
            MessageDraft::user_audio(chat_id, audio_path, transcript.clone()),
            UserInput::Audio { wav, transcript },
            "Error al procesar el audio.",
        )
        .await
    }

    /// Sends an image message. The persisted message keeps a transient
    /// reference to the local file.
    pub async fn send_image_message(&self, image_path: &str) -> Result<()> {
        let Some(chat_id) = self.state.read().await.current_chat else {
            return Ok(());
        };
        let bytes = match tokio::fs::read(image_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(image_path, error = %e, "could not read image, sending reference only");
                Vec::new()
            }
        };
        let filename = Path::new(image_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.png".to_string());
        self.run_send(
            chat_id,
            MessageDraft::user_image(chat_id, image_path, "Imagen enviada:"),
            UserInput::Image { bytes, filename },
            "Error al procesar la imagen.",
        )
        .await
    }

    /// The send protocol: persist the user message, flag the chat as
    /// loading, ask the provider, persist exactly one bot message (reply or
    /// fallback), clear the flag, then optionally speak. Provider and speech
    /// failures never escape.
    async fn run_send(
        &self,
        chat_id: i64,
        user_draft: MessageDraft,
        input: UserInput,
        error_reply: &str,
    ) -> Result<()> {
        if self.add_message(user_draft).await.is_none() {
            return Ok(());
        }
        self.set_loading(chat_id, true).await;

        let use_hardcoded = self.settings.read().await.use_hardcoded_responses;
        let provider: &dyn ResponseProvider =
            if use_hardcoded { self.hardcoded.as_ref() } else { self.remote.as_ref() };

        let reply = match provider.respond(input).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(chat_id, error = %e, "provider failed, substituting error reply");
                BotReply { text: error_reply.to_string(), speakable: true }
            }
        };

        self.add_message(MessageDraft::bot_text(chat_id, reply.text.clone())).await;
        self.set_loading(chat_id, false).await;

        let settings = self.settings.read().await.clone();
        if settings.audio_responses && reply.speakable && !reply.text.is_empty() {
            if let Err(e) = self.speech.speak(&reply.text, settings.tts_engine).await {
                warn!(chat_id, error = %e, "speech output failed");
            }
        }
        Ok(())
    }

    /// Persists a message, appends it to the visible list when its chat is
    /// current, and derives the chat title from the first user message.
    async fn add_message(&self, draft: MessageDraft) -> Option<Message> {
        let chat_id = draft.chat_id;
        let saved = match self.repo.add_message(draft).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(chat_id, error = %e, "failed to persist message");
                return None;
            }
        };
        {
            let mut state = self.state.write().await;
            if state.current_chat == Some(chat_id) {
                state.messages.push(saved.clone());
            }
        }
        if saved.sender == Sender::Yo {
            match self.repo.get_messages_for_chat(chat_id).await {
                Ok(stored) if stored.len() == 1 => {
                    let title = generate_chat_title(&saved);
                    debug!(chat_id, title, "first user message, deriving chat title");
                    self.update_chat_title(chat_id, &title).await;
                }
                Ok(_) => {}
                Err(e) => warn!(chat_id, error = %e, "could not check for first message"),
            }
        }
        Some(saved)
    }

    async fn set_loading(&self, chat_id: i64, loading: bool) {
        self.state.write().await.loading.insert(chat_id, loading);
    }

    async fn reload_messages(&self, chat_id: i64) {
        let messages = match self.repo.get_messages_for_chat(chat_id).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(chat_id, error = %e, "failed to load messages");
                Vec::new()
            }
        };
        let mut state = self.state.write().await;
        if state.current_chat == Some(chat_id) {
            state.messages = messages;
        }
    }
}
