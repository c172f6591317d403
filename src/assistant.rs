//! One utterance in, one reply out.
//!
//! [`Assistant::respond`] is the single dispatch site over [`IntentKind`]:
//! classify, route to the resource manager with prior turns from memory,
//! then record the exchange. Collaborators this crate does not carry (web
//! search, tool execution) fall back to a plain text reply.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::intent::{self, Intent, IntentKind};
use crate::memory::{ConversationMemory, Role, Summarizer};
use crate::resources::ModelResourceManager;

const HELP_TEXT: &str = "I'm your personal assistant. I can chat, and describe images you attach with /image.";
const UNKNOWN_SYSTEM_COMMAND: &str = "I didn't understand that system command.";
const EXIT_WORDS: &[&str] = &[
    "exit", "quit", "stop", "shutdown", "shut down",
    "goodbye", "good bye", "good night", "go to sleep", "turn off",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Say `text`. `intent` is what the utterance was classified as.
    Text { intent: Intent, text: String },
    /// The user asked to end the session.
    Exit,
}

pub struct Assistant<S> {
    manager: Arc<ModelResourceManager>,
    memory: ConversationMemory<S>,
}

impl<S: Summarizer> Assistant<S> {
    pub fn new(manager: Arc<ModelResourceManager>, memory: ConversationMemory<S>) -> Self {
        Self { manager, memory }
    }

    pub fn memory(&self) -> &ConversationMemory<S> {
        &self.memory
    }

    pub fn manager(&self) -> &Arc<ModelResourceManager> {
        &self.manager
    }

    /// Handle one utterance, optionally with an attached JPEG.
    ///
    /// Model replies are appended to memory (user turn, then assistant
    /// turn). System commands are answered locally and not recorded.
    pub async fn respond(&mut self, text: &str, image: Option<&[u8]>) -> Result<Reply, AppError> {
        let intent = match image {
            Some(_) => intent::classify_with_image(text),
            None => intent::classify(text),
        };
        info!(intent = %intent, "classified utterance");

        let reply = match &intent.kind {
            IntentKind::Vision { prompt } => match image {
                Some(image) => match self.manager.get_vision_response(prompt, image).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(error = %e, "vision request failed, falling back to text");
                        self.chat(text).await?
                    }
                },
                None => {
                    debug!("vision intent without an image, using text model");
                    self.chat(text).await?
                }
            },
            IntentKind::Search { query } => {
                debug!(%query, "no search backend, answering from the text model");
                self.chat(query).await?
            }
            IntentKind::Tool => self.chat(text).await?,
            IntentKind::System => {
                return Ok(match system_command(text) {
                    Some(reply) => Reply::Text { intent, text: reply.to_string() },
                    None => Reply::Exit,
                });
            }
            IntentKind::Chat => self.chat(text).await?,
        };

        self.memory.add_turn(Role::User, text).await?;
        self.memory.add_turn(Role::Assistant, &reply).await?;
        debug!(chars = reply.len(), tokens = self.memory.total_tokens(), "reply recorded");

        Ok(Reply::Text { intent, text: reply })
    }

    async fn chat(&self, text: &str) -> Result<String, AppError> {
        let history = self.memory.history();
        Ok(self.manager.get_text_response(text, &history).await?)
    }
}

/// `None` means exit.
fn system_command(text: &str) -> Option<&'static str> {
    let lower = text.trim().to_lowercase();
    if EXIT_WORDS.iter().any(|w| lower.contains(w)) {
        None
    } else if lower.contains("status") || lower.contains("help") {
        Some(HELP_TEXT)
    } else {
        Some(UNKNOWN_SYSTEM_COMMAND)
    }
}
