use crate::agent::AgentRuntime;
use crate::error::AppError;
use crate::speech::{save_audio, SpeechProvider};
use crate::synthesizer::Summarize;
use crate::trace;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tysva_shared::{ChatMessage, ChatResponse, GenerationRequest};

pub const NO_INPUT: &str = "There is no input provided";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub response: String,
    pub process: String,
    pub audio_file: Option<PathBuf>,
}

impl From<GenerationResult> for ChatResponse {
    fn from(result: GenerationResult) -> Self {
        ChatResponse {
            response: result.response,
            process: result.process,
            audio_file: result.audio_file.map(|p| p.to_string_lossy().into_owned()),
        }
    }
}

/// Turns one request into an answer, a trace and optionally a spoken
/// summary.
pub struct Generator {
    agent: Arc<dyn AgentRuntime>,
    synthesizer: Arc<dyn Summarize>,
    speech: Arc<dyn SpeechProvider>,
    audio_dir: PathBuf,
}

impl Generator {
    pub fn new(
        agent: Arc<dyn AgentRuntime>,
        synthesizer: Arc<dyn Summarize>,
        speech: Arc<dyn SpeechProvider>,
        audio_dir: PathBuf,
    ) -> Self {
        Self {
            agent,
            synthesizer,
            speech,
            audio_dir,
        }
    }

    pub fn audio_dir(&self) -> &PathBuf {
        &self.audio_dir
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, AppError> {
        let GenerationRequest {
            file,
            prompt,
            voice_enabled,
            chat_history,
        } = request;

        let prompt = match (prompt, file) {
            (Some(prompt), file) => {
                if file.is_some() {
                    warn!("Both prompt and file were provided; answering the prompt");
                }
                prompt
            }
            (None, Some(file)) => {
                let audio = tokio::fs::read(&file).await?;
                info!("Read {} bytes from {}", audio.len(), file);
                self.speech.transcribe(audio).await?
            }
            (None, None) => {
                return Ok(GenerationResult {
                    response: NO_INPUT.to_string(),
                    process: NO_INPUT.to_string(),
                    audio_file: None,
                })
            }
        };

        let (response, process) = self.answer(prompt, chat_history).await?;

        let audio_file = if voice_enabled {
            Some(self.speak(&process, &response).await?)
        } else {
            None
        };

        Ok(GenerationResult {
            response,
            process,
            audio_file,
        })
    }

    async fn answer(&self, prompt: String, history: Vec<ChatMessage>) -> Result<(String, String), AppError> {
        let mut run = self.agent.run(prompt, history);
        let process = trace::collect(&mut run.events).await;
        let response = run.finish().await?;
        Ok((response, process))
    }

    async fn speak(&self, process: &str, response: &str) -> Result<PathBuf, AppError> {
        let synthesis = self.synthesizer.summarize(process, response).await?;
        let text = synthesis.spoken_text(process.is_empty());
        let audio = self.speech.synthesize(&text).await?;
        Ok(save_audio(audio, &self.audio_dir).await?)
    }
}
