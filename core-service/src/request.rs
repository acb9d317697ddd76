//! Synthesis requests and the wire shape of the voice-design endpoint.

use core_runtime::config::CoreConfig;
use serde::{Deserialize, Serialize};

/// What the caller wants spoken.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SynthesisRequest {
    pub text: String,
    /// Free-form voice description; the configured default when `None` or blank.
    pub voice_description: Option<String>,
    /// Language code; the configured default when `None`.
    pub language: Option<String>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn voice(mut self, description: impl Into<String>) -> Self {
        self.voice_description = Some(description.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Body sent to the service, with defaults filled in from `config`.
    pub(crate) fn payload<'a>(&'a self, config: &'a CoreConfig) -> DesignPayload<'a> {
        let voice_description = self
            .voice_description
            .as_deref()
            .map(str::trim)
            .filter(|description| !description.is_empty())
            .unwrap_or(&config.voice_description);

        DesignPayload {
            text: self.text.trim(),
            voice_description,
            language: self.language.as_deref().unwrap_or(&config.language),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct DesignPayload<'a> {
    pub text: &'a str,
    pub voice_description: &'a str,
    pub language: &'a str,
}

/// Error document returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Message for a rejected request: the body's `detail` when it has one.
pub(crate) fn rejection_message(status: u16, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.detail);

    match detail {
        Some(serde_json::Value::String(detail)) if !detail.is_empty() => detail,
        Some(serde_json::Value::Null | serde_json::Value::String(_)) | None => {
            format!("Server error: {}", status)
        }
        // validation errors come back as a list of objects
        Some(other) => other.to_string(),
    }
}
