use crate::error::SynthesisError;
use crate::llm::{ChatBackend, PromptMessage};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

const SYSTEM_PROMPT: &str = "You are an AI assistant that performs summarization of text contents regarding AI \
agentic processes and response, for people who are not able to read. Keep in mind, then, that you summarization \
must be suitable for a spoken conversation. Reply with a JSON object with exactly two string fields: \
\"process_synthesis\" (synthesis of the agentic process) and \"response_synthesis\" (synthesis of the final response).";

const USER_PROMPT: &str = "Could please summarize your agentic process (the first message you sent me) and the \
final response (second message)?";

/// Spoken-friendly summaries of a trace and its final answer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Synthesis {
    pub process_synthesis: String,
    pub response_synthesis: String,
}

impl Synthesis {
    pub fn parse(text: &str) -> Result<Self, SynthesisError> {
        Ok(serde_json::from_str(text.trim())?)
    }

    /// Text handed to text-to-speech. Without a trace there is no process to
    /// talk about.
    pub fn spoken_text(&self, trace_is_empty: bool) -> String {
        if trace_is_empty {
            self.response_synthesis.clone()
        } else {
            format!(
                "The agentic process that we followed was:\n\n{}\n\nThis brought to the following final result:\n\n{}",
                self.process_synthesis, self.response_synthesis
            )
        }
    }
}

#[async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, process: &str, response: &str) -> Result<Synthesis, SynthesisError>;
}

pub struct Synthesizer {
    llm: Arc<dyn ChatBackend>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn ChatBackend>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Summarize for Synthesizer {
    async fn summarize(&self, process: &str, response: &str) -> Result<Synthesis, SynthesisError> {
        let messages = vec![
            PromptMessage::System(SYSTEM_PROMPT.to_string()),
            PromptMessage::Assistant {
                content: process.to_string(),
                tool_calls: Vec::new(),
            },
            PromptMessage::Assistant {
                content: response.to_string(),
                tool_calls: Vec::new(),
            },
            PromptMessage::User(USER_PROMPT.to_string()),
        ];

        let text = self.llm.complete(messages, true).await?;
        let synthesis = Synthesis::parse(&text)?;
        info!(
            "Synthesized {} + {} chars for speech",
            synthesis.process_synthesis.len(),
            synthesis.response_synthesis.len()
        );
        Ok(synthesis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedBackend;

    #[tokio::test]
    async fn parses_model_json() {
        let backend = Arc::new(ScriptedBackend::with_completions(vec![
            r#"{"process_synthesis":"I searched the docs.","response_synthesis":"Use a tag field."}"#,
        ]));
        let synth = Synthesizer::new(backend.clone());
        let out = synth.summarize("trace", "answer").await.unwrap();
        assert_eq!(out.process_synthesis, "I searched the docs.");
        assert_eq!(out.response_synthesis, "Use a tag field.");

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts[0].len(), 4);
        assert_eq!(
            prompts[0][1],
            PromptMessage::Assistant {
                content: "trace".into(),
                tool_calls: vec![]
            }
        );
    }

    #[tokio::test]
    async fn malformed_output_is_fatal() {
        let backend = Arc::new(ScriptedBackend::with_completions(vec![r#"{"summary":"oops"}"#]));
        let synth = Synthesizer::new(backend);
        let err = synth.summarize("", "answer").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Parse(_)));
    }

    #[test]
    fn spoken_text_skips_empty_process() {
        let s = Synthesis {
            process_synthesis: "p".into(),
            response_synthesis: "r".into(),
        };
        assert_eq!(s.spoken_text(true), "r");
        assert_eq!(
            s.spoken_text(false),
            "The agentic process that we followed was:\n\np\n\nThis brought to the following final result:\n\nr"
        );
    }
}
