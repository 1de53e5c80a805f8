use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;
use tysva_shared::{ErrorResponse, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set (checked the environment and /run/secrets/{1})")]
    Missing(&'static str, &'static str),
    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OpenAI-compatible API error: {0}")]
    Api(#[from] async_openai::error::OpenAIError),
    #[error("model stream failed: {0}")]
    Stream(String),
    #[error("model returned no content")]
    Empty,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("qdrant error: {0}")]
    Qdrant(#[from] qdrant_client::QdrantError),
    #[error("embedding error: {0}")]
    Embedding(#[from] LlmError),
    #[error("expected {expected} embeddings, got {actual}")]
    EmbeddingCount { expected: usize, actual: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: &'static str, message: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("search API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("tool {tool} failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: ToolError,
    },
    #[error("agent did not produce an answer within {0} steps")]
    StepLimit(usize),
    #[error("agent task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("could not parse synthesis from model output: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("speech API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that can fail a `/chat` request.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{}", .0.body_text())]
    Body(#[from] JsonRejection),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Speech(#[from] SpeechError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Body(rejection) => rejection.status(),
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
