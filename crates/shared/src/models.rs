//! Announcement data model.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;
use crate::languages::is_supported_language;

/// Longest announcement text accepted, counted in characters after trimming.
pub const MAX_TEXT_CHARS: usize = 500;

// --- Priority ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    Warning,
    Emergency,
}

impl Priority {
    /// Decode a priority received over the wire. Anything unrecognised is
    /// treated as `Normal`.
    pub fn from_wire(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::Warning => "warning",
            Priority::Emergency => "emergency",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Priority::Normal => "Normal",
            Priority::Warning => "Warning",
            Priority::Emergency => "Emergency",
        }
    }

    /// Emergencies interrupt whatever the receiver is doing.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Priority::Emergency)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Priority::Normal),
            "warning" => Ok(Priority::Warning),
            "emergency" => Ok(Priority::Emergency),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(raw.as_str().map(Priority::from_wire).unwrap_or_default())
    }
}

// --- Announcement ---

/// One broadcast unit. Values are never mutated after creation; every new
/// broadcast is a new `Announcement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    text: String,
    #[serde(default)]
    priority: Priority,
    languages: Vec<String>,
    timestamp: i64,
    #[serde(default)]
    audio_url: Option<String>,
}

impl Announcement {
    /// Build a validated announcement stamped with the current time.
    ///
    /// Text is trimmed and repeated language codes are collapsed, keeping the
    /// order they were first given in.
    pub fn new<I, S>(
        text: impl AsRef<str>,
        priority: Priority,
        languages: I,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut codes: Vec<String> = Vec::new();
        for code in languages {
            let code = code.into();
            if !codes.contains(&code) {
                codes.push(code);
            }
        }

        let announcement = Self {
            text: text.as_ref().trim().to_string(),
            priority,
            languages: codes,
            timestamp: Utc::now().timestamp_millis(),
            audio_url: None,
        };
        announcement.validate()?;
        Ok(announcement)
    }

    /// Attach a pre-recorded audio reference.
    pub fn with_audio_url(self, audio_url: impl Into<String>) -> Self {
        Self {
            audio_url: Some(audio_url.into()),
            ..self
        }
    }

    /// Restamp with an explicit epoch-millisecond timestamp.
    pub fn with_timestamp(self, timestamp: i64) -> Self {
        Self { timestamp, ..self }
    }

    /// Check the content rules an operator must satisfy before sending.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let len = text.chars().count();
        if len > MAX_TEXT_CHARS {
            return Err(ValidationError::TextTooLong {
                len,
                max: MAX_TEXT_CHARS,
            });
        }

        if self.languages.is_empty() {
            return Err(ValidationError::NoLanguages);
        }
        for (i, code) in self.languages.iter().enumerate() {
            if !is_supported_language(code) {
                return Err(ValidationError::UnknownLanguage(code.clone()));
            }
            if self.languages[..i].contains(code) {
                return Err(ValidationError::DuplicateLanguage(code.clone()));
            }
        }
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn audio_url(&self) -> Option<&str> {
        self.audio_url.as_deref()
    }

    /// The first `max_chars` characters, with `...` appended when cut short.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}...", head)
        } else {
            head
        }
    }
}
