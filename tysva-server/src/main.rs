mod agent;
mod config;
mod error;
mod generator;
mod index;
mod ingest;
mod llm;
mod speech;
mod synthesizer;
mod tools;
mod trace;

use agent::Agent;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, Subcommand};
use config::Config;
use error::AppError;
use generator::Generator;
use index::{DocIndex, Embedder};
use llm::{ChatBackend, LlmService};
use speech::ElevenLabs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use synthesizer::Synthesizer;
use tools::{DeepSearch, DocsSearch, ToolSet};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tysva_shared::{ChatResponse, GenerationRequest};

#[derive(Parser)]
#[command(name = "tysva-server", about = "TypeScript voice assistant backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the chat API (default)
    Serve {
        #[arg(long, default_value = "127.0.0.1:7999")]
        bind: SocketAddr,
    },
    /// Embed a documentation directory into the vector index
    Ingest {
        #[arg(long, default_value = "ts-docs")]
        docs_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Some(Command::Ingest { docs_dir }) => {
            let embedder = Embedder::new(&config.embedding);
            let index = DocIndex::connect(&config.index)?;
            let count = ingest::ingest(&docs_dir, &embedder, &index, config.embedding.dim).await?;
            info!("Indexed {} chunks", count);
            Ok(())
        }
        Some(Command::Serve { bind }) => serve(config, bind).await,
        None => serve(config, SocketAddr::from(([127, 0, 0, 1], 7999))).await,
    }
}

async fn serve(config: Config, addr: SocketAddr) -> anyhow::Result<()> {
    let llm: Arc<dyn ChatBackend> = Arc::new(LlmService::new(&config.llm));
    let embedder = Arc::new(Embedder::new(&config.embedding));
    let index = Arc::new(DocIndex::connect(&config.index)?);
    let http = reqwest::Client::new();

    if let Some(docs_dir) = &config.docs_dir {
        if index.exists().await? {
            info!("Collection {} already exists, skipping ingestion", index.collection());
        } else {
            ingest::ingest(docs_dir, &embedder, &index, config.embedding.dim).await?;
        }
    } else {
        warn!("DOCS_DIR not set; documentation search relies on an existing collection");
    }

    let tools = ToolSet::new()
        .with(Arc::new(DeepSearch::new(http.clone(), config.linkup_api_key.clone())))
        .with(Arc::new(DocsSearch::new(
            llm.clone(),
            embedder,
            index,
            config.index.top_k,
        )));

    let generator = Arc::new(Generator::new(
        Arc::new(Agent::new(llm.clone(), tools, config.agent_max_steps)),
        Arc::new(Synthesizer::new(llm)),
        Arc::new(ElevenLabs::new(http, config.speech.clone())),
        config.audio_dir.clone(),
    ));

    let app = router(generator);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(generator: Arc<Generator>) -> Router {
    let audio = ServeDir::new(generator.audio_dir());
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .nest_service("/audio", audio)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(generator)
}

async fn health() -> &'static str {
    "OK"
}

async fn chat(
    State(generator): State<Arc<Generator>>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = body?;
    request.validate()?;
    info!(
        "Chat request: prompt={} file={} voice={} history={}",
        request.prompt.is_some(),
        request.file.is_some(),
        request.voice_enabled,
        request.chat_history.len()
    );

    let result = generator.generate(request).await?;
    Ok(Json(result.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentEvent, AgentRun, AgentRuntime};
    use crate::error::{AgentError, SynthesisError};
    use crate::speech::testing::FakeSpeech;
    use crate::synthesizer::{Summarize, Synthesis};
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use tysva_shared::ErrorResponse;

    struct EchoAgent;

    impl AgentRuntime for EchoAgent {
        fn run(&self, prompt: String, _history: Vec<tysva_shared::ChatMessage>) -> AgentRun {
            let (tx, rx) = mpsc::channel(1);
            let answer = tokio::spawn(async move {
                let _ = tx
                    .send(AgentEvent::ToolCallResult {
                        tool_name: "documentation_search_tool".into(),
                        output: "ok".into(),
                    })
                    .await;
                Ok::<_, AgentError>(format!("answer to {prompt}"))
            });
            AgentRun { events: rx, answer }
        }
    }

    struct NoopSummarizer;

    #[async_trait]
    impl Summarize for NoopSummarizer {
        async fn summarize(&self, _p: &str, r: &str) -> Result<Synthesis, SynthesisError> {
            Ok(Synthesis {
                process_synthesis: String::new(),
                response_synthesis: r.to_string(),
            })
        }
    }

    fn app(audio_dir: PathBuf) -> Router {
        router(Arc::new(Generator::new(
            Arc::new(EchoAgent),
            Arc::new(NoopSummarizer),
            Arc::new(FakeSpeech::new("spoken")),
            audio_dir,
        )))
    }

    async fn post_chat(app: Router, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::post("/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path().to_path_buf())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_answers_a_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_chat(
            app(dir.path().to_path_buf()),
            serde_json::json!({
                "file": null,
                "prompt": "What is a discriminated union?",
                "voice_enabled": false,
                "chat_history": [{"role": "user", "content": "hi"}]
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let res: ChatResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(res.response, "answer to What is a discriminated union?");
        assert_eq!(res.process, "Tool call result for **documentation_search_tool**: ok\n");
        assert_eq!(res.audio_file, None);
    }

    #[tokio::test]
    async fn chat_with_voice_returns_artifact_path() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_chat(
            app(dir.path().to_path_buf()),
            serde_json::json!({"file": null, "prompt": "q", "voice_enabled": true, "chat_history": []}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let res: ChatResponse = serde_json::from_slice(&body).unwrap();
        let path = PathBuf::from(res.audio_file.unwrap());
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn chat_rejects_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_chat(
            app(dir.path().to_path_buf()),
            serde_json::json!({"file": null, "prompt": null, "voice_enabled": false, "chat_history": []}),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.detail.contains("both set to None"));
    }

    #[tokio::test]
    async fn chat_rejects_both_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp3");
        std::fs::write(&clip, b"x").unwrap();
        let (status, _) = post_chat(
            app(dir.path().join("audio")),
            serde_json::json!({"file": clip, "prompt": "q", "voice_enabled": false, "chat_history": []}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn chat_rejects_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_chat(
            app(dir.path().to_path_buf()),
            serde_json::json!({"file": "/no/such/clip.mp3", "prompt": null, "voice_enabled": false, "chat_history": []}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.detail, "/no/such/clip.mp3 is not a file!");
    }

    #[tokio::test]
    async fn malformed_body_gets_detail() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path().to_path_buf())
            .oneshot(
                Request::post("/chat")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"prompt\": "))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let err: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!err.detail.is_empty());
    }

    #[tokio::test]
    async fn mistyped_field_gets_detail() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_chat(
            app(dir.path().to_path_buf()),
            serde_json::json!({"prompt": "q", "voice_enabled": "yes"}),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.detail.contains("voice_enabled"));
    }

    #[tokio::test]
    async fn generated_audio_is_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.mp3"), b"ID3").unwrap();
        let response = app(dir.path().to_path_buf())
            .oneshot(Request::get("/audio/abc.mp3").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
