//! Speech-to-text and text-to-speech through ElevenLabs.

use crate::config::SpeechConfig;
use crate::error::SpeechError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

const BASE_URL: &str = "https://api.elevenlabs.io";
const XI_API_KEY_HEADER: &str = "xi-api-key";
const AUDIO_EXTENSION: &str = "mp3";

pub type AudioStream = BoxStream<'static, Result<Bytes, SpeechError>>;

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, SpeechError>;

    async fn synthesize(&self, text: &str) -> Result<AudioStream, SpeechError>;
}

pub struct ElevenLabs {
    http: reqwest::Client,
    config: SpeechConfig,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: String,
}

#[derive(Debug, Serialize)]
struct TtsBody<'a> {
    text: &'a str,
    model_id: &'a str,
}

impl ElevenLabs {
    pub fn new(http: reqwest::Client, config: SpeechConfig) -> Self {
        Self {
            http,
            config,
            base_url: BASE_URL.to_string(),
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SpeechError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        error!("ElevenLabs returned {}: {}", status, body);
        Err(SpeechError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabs {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, SpeechError> {
        info!("Transcribing {} bytes with {}", audio.len(), self.config.stt_model);
        let form = Form::new()
            .text("model_id", self.config.stt_model.clone())
            .text("tag_audio_events", "true")
            .text("diarize", "true")
            .text("language_code", self.config.language.clone())
            .part("file", Part::bytes(audio).file_name("audio"));

        let resp = self
            .http
            .post(format!("{}/v1/speech-to-text", self.base_url))
            .header(XI_API_KEY_HEADER, &self.config.api_key)
            .multipart(form)
            .send()
            .await?;

        let transcription: Transcription = Self::check(resp).await?.json().await?;
        info!("Transcription: {}", transcription.text);
        Ok(transcription.text)
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, SpeechError> {
        info!("Synthesizing {} chars with voice {}", text.len(), self.config.voice_id);
        let resp = self
            .http
            .post(format!(
                "{}/v1/text-to-speech/{}/stream",
                self.base_url, self.config.voice_id
            ))
            .query(&[("output_format", self.config.output_format.as_str())])
            .header(XI_API_KEY_HEADER, &self.config.api_key)
            .json(&TtsBody {
                text,
                model_id: &self.config.tts_model,
            })
            .send()
            .await?;

        let stream = Self::check(resp).await?.bytes_stream().map_err(SpeechError::from);
        Ok(stream.boxed())
    }
}

/// Writes a synthesized stream to a fresh `<uuid>.mp3` under `dir` and
/// returns its path. Empty chunks are skipped. A stream that fails partway
/// leaves no file behind.
pub async fn save_audio(audio: AudioStream, dir: &Path) -> Result<PathBuf, SpeechError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.{}", uuid::Uuid::new_v4(), AUDIO_EXTENSION));

    match write_stream(audio, &path).await {
        Ok(written) => {
            info!("Wrote {} bytes of audio to {}", written, path.display());
            Ok(path)
        }
        Err(e) => {
            error!("Audio stream failed, removing {}: {}", path.display(), e);
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!("Could not remove {}: {}", path.display(), rm);
            }
            Err(e)
        }
    }
}

async fn write_stream(mut audio: AudioStream, path: &Path) -> Result<usize, SpeechError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0usize;
    while let Some(chunk) = audio.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        file.write_all(&chunk).await?;
        written += chunk.len();
    }
    file.flush().await?;
    Ok(written)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn stream(chunks: Vec<Result<Bytes, SpeechError>>) -> AudioStream {
        futures_util::stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn saves_non_empty_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_audio(
            stream(vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::new()), Ok(Bytes::from_static(b"cd"))]),
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(path.extension().unwrap(), "mp3");
        assert_eq!(std::fs::read(&path).unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("audio").join("out");
        let path = save_audio(stream(vec![Ok(Bytes::from_static(b"x"))]), &nested).await.unwrap();
        assert!(path.starts_with(&nested));
    }

    #[tokio::test]
    async fn each_call_gets_a_new_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = save_audio(stream(vec![]), dir.path()).await.unwrap();
        let b = save_audio(stream(vec![]), dir.path()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_audio(
            stream(vec![
                Ok(Bytes::from_static(b"x")),
                Err(SpeechError::Api {
                    status: 500,
                    body: "boom".into(),
                }),
            ]),
            dir.path(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SpeechError::Api { status: 500, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
