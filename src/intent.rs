//! Fast keyword-based intent classifier.
//!
//! Every utterance is routed by plain phrase and keyword matching: no model
//! call, no I/O, microseconds per call. Anything that does not match falls
//! through to [`IntentKind::Chat`], which never triggers a side effect.
//!
//! Tiers are checked in a fixed order (vision, search, tool, system) and the
//! first match wins, so an utterance that reads as both "take a photo" and
//! "search for" is a vision request.

use std::fmt;

/// Confidence for a multi-word phrase match.
const PHRASE_CONFIDENCE: f32 = 0.9;
/// Vision phrases are the most explicit requests we see.
const VISION_PHRASE_CONFIDENCE: f32 = 0.95;
const VISION_WORD_CONFIDENCE: f32 = 0.85;
const TOOL_WORD_CONFIDENCE: f32 = 0.8;
const SYSTEM_WORD_CONFIDENCE: f32 = 0.9;
const DEFAULT_CONFIDENCE: f32 = 0.7;

const VISION_PHRASES: &[&str] = &[
    "take a photo", "take photo", "take a picture", "take picture",
    "click a photo", "click photo", "click a picture", "click picture",
    "click an image", "click image", "snap a photo", "snap photo",
    "capture image", "capture photo", "capture a photo",
    "what do you see", "what can you see", "describe what you see",
    "look at this", "look at that", "show me what",
    "open camera", "use camera", "use the camera",
    "scan this", "scan that", "read this label", "read this text",
    "what does this look like", "what does that look like",
    "what is this", "what is that",
    "what am i holding", "what's in front of me",
    "describe this", "describe that", "analyze this image",
    "identify this", "identify that",
];
const VISION_WORDS: &[&str] = &["camera", "photograph", "snapshot", "selfie", "webcam"];

const SEARCH_PHRASES: &[&str] = &[
    "search for", "search about", "look up", "find out about",
    "google", "what is the latest", "latest news", "recent news",
    "current price", "price of", "stock price",
    "weather in", "weather today", "weather tomorrow", "weather forecast",
    "is it going to rain", "will it rain", "is it raining",
    "how much does", "how much is", "how much are",
    "news about", "news on", "headlines",
    "who won", "score of", "results of", "match result",
    "what happened in", "what's happening",
    "release date", "when does", "when will",
    "reviews of", "review for", "rating of",
    "directions to", "how to get to", "route to",
    "translate", "definition of", "define ",
    "recipe for", "how to make", "how to cook",
    "convert ", "exchange rate",
];

const TOOL_PHRASES: &[&str] = &[
    // memory: save
    "remember that", "remember my", "remember this", "remember me",
    "save this", "save that", "note this", "note that", "note down",
    "don't forget", "do not forget", "keep in mind",
    "my name is", "my birthday is", "my favorite", "i like",
    "i prefer", "i live in", "i work at", "i am from",
    // memory: recall
    "what did i tell you", "what do you know about",
    "what do you remember", "do you remember",
    "what's my", "what is my",
    // memory: list / delete
    "list memories", "show memories", "show what you remember",
    "what do you know", "everything you know",
    "delete memory", "forget about", "forget that", "forget my",
    // tasks: create
    "create a task", "create task", "add a task", "add task",
    "add a todo", "add todo", "add to do", "add to my list",
    "remind me to", "remind me about",
    "i need to", "i have to", "i should",
    "put on my list", "add to list",
    // tasks: list
    "list my tasks", "show my tasks", "what are my tasks",
    "my todos", "my to-dos", "my to dos", "my task list",
    "pending tasks", "open tasks", "what do i need to do",
    // tasks: complete / delete
    "complete task", "finish task", "mark as done", "mark done",
    "task is done", "task done", "done with", "finished with",
    "delete task", "remove task", "cancel task",
    // time
    "what time is it", "current time", "what's the time",
    "today's date", "what day is it", "what is today",
    "what's today", "what date is it",
    // location
    "where am i", "my location", "what's my location",
    "what city am i in", "which city",
];
const TOOL_WORDS: &[&str] = &["birthday", "schedule", "appointment", "deadline"];

const SYSTEM_PHRASES: &[&str] = &[
    "stop listening", "shut down", "shut it down",
    "show status", "system status", "help me with settings",
    "turn off", "go to sleep", "good night", "goodbye", "good bye",
    "i want to stop", "stop the assistant", "close the app",
];
const SYSTEM_WORDS: &[&str] = &["exit", "quit", "shutdown"];

// ── Intent ───────────────────────────────────────────────────────────────────

/// Where an utterance should be routed.
///
/// Vision and search carry the text the downstream handler should use as its
/// prompt / query (today the full utterance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentKind {
    Vision { prompt: String },
    Search { query: String },
    Tool,
    System,
    Chat,
}

/// Result of [`classify`].
///
/// `confidence` is a fixed per-match-type constant (phrase > keyword >
/// default), not a calibrated probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub kind: IntentKind,
    pub confidence: f32,
    /// Which phrase or keyword triggered the result, or `"default"`.
    pub reason: String,
}

impl Intent {
    fn new(kind: IntentKind, confidence: f32, reason: String) -> Self {
        Self { kind, confidence, reason }
    }

    /// Stable lower-case label: `vision`, `search`, `tool`, `system`, `chat`.
    pub fn label(&self) -> &'static str {
        match self.kind {
            IntentKind::Vision { .. } => "vision",
            IntentKind::Search { .. } => "search",
            IntentKind::Tool => "tool",
            IntentKind::System => "system",
            IntentKind::Chat => "chat",
        }
    }

    /// `true` for intents whose handlers act on the world (camera, tasks, shutdown).
    pub fn is_side_effecting(&self) -> bool {
        matches!(
            self.kind,
            IntentKind::Vision { .. } | IntentKind::Tool | IntentKind::System
        )
    }

    pub fn is_default(&self) -> bool {
        self.kind == IntentKind::Chat && self.reason == "default"
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2}, {})", self.label(), self.confidence, self.reason)
    }
}

// ── classify ─────────────────────────────────────────────────────────────────

/// Classify `text` into an [`Intent`]. Never fails; defaults to chat.
pub fn classify(text: &str) -> Intent {
    let lower = text.trim().to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    if let Some(kw) = first_phrase(&lower, VISION_PHRASES) {
        return Intent::new(vision(text), VISION_PHRASE_CONFIDENCE, matched(kw));
    }
    if let Some(w) = first_word(&words, VISION_WORDS) {
        return Intent::new(vision(text), VISION_WORD_CONFIDENCE, keyword(w));
    }

    if let Some(kw) = first_phrase(&lower, SEARCH_PHRASES) {
        let kind = IntentKind::Search { query: text.to_string() };
        return Intent::new(kind, PHRASE_CONFIDENCE, matched(kw));
    }

    if let Some(kw) = first_phrase(&lower, TOOL_PHRASES) {
        return Intent::new(IntentKind::Tool, PHRASE_CONFIDENCE, matched(kw));
    }
    if let Some(w) = first_word(&words, TOOL_WORDS) {
        return Intent::new(IntentKind::Tool, TOOL_WORD_CONFIDENCE, keyword(w));
    }

    if let Some(kw) = first_phrase(&lower, SYSTEM_PHRASES) {
        return Intent::new(IntentKind::System, PHRASE_CONFIDENCE, matched(kw));
    }
    if let Some(w) = first_word(&words, SYSTEM_WORDS) {
        return Intent::new(IntentKind::System, SYSTEM_WORD_CONFIDENCE, keyword(w));
    }

    Intent::new(IntentKind::Chat, DEFAULT_CONFIDENCE, "default".to_string())
}

/// Like [`classify`], but an attached image turns a plain chat utterance
/// into a vision request ("what colour is it?" plus a photo). Explicit
/// search, tool and system intents are kept.
pub fn classify_with_image(text: &str) -> Intent {
    let intent = classify(text);
    if intent.kind == IntentKind::Chat {
        return Intent::new(vision(text), VISION_WORD_CONFIDENCE, "attached image".to_string());
    }
    intent
}

fn vision(text: &str) -> IntentKind {
    IntentKind::Vision { prompt: text.to_string() }
}

fn first_phrase(lower: &str, phrases: &[&'static str]) -> Option<&'static str> {
    phrases.iter().copied().find(|p| lower.contains(p))
}

/// Exact token membership. The declared set order decides which word is
/// reported when several match.
fn first_word(words: &[&str], set: &[&'static str]) -> Option<&'static str> {
    set.iter().copied().find(|w| words.contains(w))
}

fn matched(phrase: &str) -> String {
    format!("matched '{phrase}'")
}

fn keyword(word: &str) -> String {
    format!("keyword '{word}'")
}
