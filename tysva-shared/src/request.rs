use crate::ChatMessage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Body of `POST /chat`. Exactly one of `file` and `prompt` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub voice_enabled: bool,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("'prompt' and 'file' fields are both set to None. Please set one of the two to a non-null value.")]
    NoInput,
    #[error("'prompt' and 'file' fields are both set to a non-null value. Please set one of the two to a null value.")]
    BothInputs,
    #[error("{0} is not a file!")]
    NotAFile(String),
}

impl GenerationRequest {
    pub fn from_prompt(prompt: impl Into<String>, voice_enabled: bool, chat_history: Vec<ChatMessage>) -> Self {
        Self {
            file: None,
            prompt: Some(prompt.into()),
            voice_enabled,
            chat_history,
        }
    }

    pub fn from_file(file: impl Into<String>, voice_enabled: bool, chat_history: Vec<ChatMessage>) -> Self {
        Self {
            file: Some(file.into()),
            prompt: None,
            voice_enabled,
            chat_history,
        }
    }

    /// The file check runs first, so a bad path is reported even when a
    /// prompt is also present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(file) = &self.file {
            if !Path::new(file).is_file() {
                return Err(ValidationError::NotAFile(file.clone()));
            }
        }

        match (&self.file, &self.prompt) {
            (None, None) => Err(ValidationError::NoInput),
            (Some(_), Some(_)) => Err(ValidationError::BothInputs),
            _ => Ok(()),
        }
    }
}
