use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tysva_shared::{ChatResponse, ErrorResponse, GenerationRequest};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Waiting,
    Error(String),
}

pub enum ClientEvent {
    Response(ChatResponse),
    Failed(String),
}

pub struct BackendClient {
    tx: mpsc::UnboundedSender<GenerationRequest>,
    base_url: String,
}

impl BackendClient {
    pub fn new(
        base_url: String,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<ClientEvent>,
        mpsc::UnboundedReceiver<ConnectionStatus>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<GenerationRequest>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (status_tx, status_rx) = mpsc::unbounded_channel::<ConnectionStatus>();

        let client = Self {
            tx,
            base_url: base_url.clone(),
        };

        tokio::spawn(async move {
            let http = reqwest::Client::new();
            let mut health = tokio::time::interval(HEALTH_INTERVAL);

            loop {
                tokio::select! {
                    Some(request) = rx.recv() => {
                        let _ = status_tx.send(ConnectionStatus::Waiting);
                        info!(
                            "Sending request: prompt={} file={:?} history={}",
                            request.prompt.is_some(),
                            request.file,
                            request.chat_history.len()
                        );
                        let event = match post_chat(&http, &base_url, &request).await {
                            Ok(response) => {
                                debug!("Received response ({} chars)", response.response.len());
                                let _ = status_tx.send(ConnectionStatus::Connected);
                                ClientEvent::Response(response)
                            }
                            Err(e) => {
                                error!("Chat request failed: {}", e);
                                let _ = status_tx.send(ConnectionStatus::Error(e.to_string()));
                                ClientEvent::Failed(e.to_string())
                            }
                        };
                        if event_tx.send(event).is_err() {
                            warn!("UI went away, stopping client");
                            break;
                        }
                    }
                    _ = health.tick() => {
                        let status = match http.get(format!("{}/health", base_url)).send().await {
                            Ok(resp) if resp.status().is_success() => ConnectionStatus::Connected,
                            Ok(resp) => ConnectionStatus::Error(format!("health check returned {}", resp.status())),
                            Err(e) => {
                                debug!("Health check failed: {}", e);
                                ConnectionStatus::Disconnected
                            }
                        };
                        if status_tx.send(status).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        (client, event_rx, status_rx)
    }

    pub fn send(&self, request: GenerationRequest) -> Result<()> {
        self.tx.send(request)?;
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

async fn post_chat(http: &reqwest::Client, base_url: &str, request: &GenerationRequest) -> Result<ChatResponse> {
    let resp = http.post(format!("{}/chat", base_url)).json(request).send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        anyhow::bail!(error_message(status.as_u16(), &body));
    }
    Ok(serde_json::from_str(&body)?)
}

/// Prefers the server's `detail` field, falling back to the raw body.
pub fn error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => format!("Server error {}: {}", status, err.detail),
        Err(_) if body.is_empty() => format!("Server error {}", status),
        Err(_) => format!("Server error {}: {}", status, body),
    }
}

/// URL under which the server exposes a generated audio file.
pub fn audio_url(base_url: &str, audio_file: &str) -> String {
    let name = Path::new(audio_file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| audio_file.to_string());
    format!("{}/audio/{}", base_url.trim_end_matches('/'), name)
}
