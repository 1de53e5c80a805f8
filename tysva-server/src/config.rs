use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{error, info};

const SECRETS_DIR: &str = "/run/secrets";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub dim: u64,
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub url: String,
    pub collection: String,
    pub top_k: u64,
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub api_key: String,
    pub voice_id: String,
    pub tts_model: String,
    pub stt_model: String,
    pub output_format: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub speech: SpeechConfig,
    pub linkup_api_key: String,
    pub audio_dir: PathBuf,
    pub agent_max_steps: usize,
    pub docs_dir: Option<PathBuf>,
}

impl Config {
    /// Reads the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), |file| {
            std::fs::read_to_string(PathBuf::from(SECRETS_DIR).join(file)).ok()
        })
    }

    fn from_lookup<E, S>(env: E, secret: S) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
        S: Fn(&str) -> Option<String>,
    {
        let key = |name: &'static str, file: &'static str| -> Result<String, ConfigError> {
            match env(name).or_else(|| secret(file)) {
                Some(value) if !value.trim().is_empty() => {
                    info!("{} loaded", name);
                    Ok(value.trim().to_string())
                }
                _ => {
                    error!("{} not found. Set it in your .env file or as a secret", name);
                    Err(ConfigError::Missing(name, file))
                }
            }
        };
        let or = |name: &str, default: &str| env(name).unwrap_or_else(|| default.to_string());

        let llm = LlmConfig {
            api_key: key("GROQ_API_KEY", "groq_key")?,
            api_base: or("LLM_API_BASE", "https://api.groq.com/openai/v1"),
            model: or("LLM_MODEL", "llama-3.3-70b-versatile"),
        };

        let embedding = EmbeddingConfig {
            api_key: or("EMBEDDING_API_KEY", ""),
            api_base: or("EMBEDDING_API_BASE", "http://localhost:8080/v1"),
            model: or("EMBEDDING_MODEL", "sentence-transformers/all-MiniLM-L6-v2"),
            dim: parse(&env, "EMBEDDING_DIM", 384)?,
        };

        let index = IndexConfig {
            url: or("QDRANT_URL", "http://localhost:6333"),
            collection: or("QDRANT_COLLECTION", "ts_docs"),
            top_k: parse(&env, "RETRIEVAL_TOP_K", 2)?,
        };

        let speech = SpeechConfig {
            api_key: key("ELEVENLABS_API_KEY", "elevenlabs_key")?,
            voice_id: or("ELEVENLABS_VOICE_ID", "NHRgOEwqx5WZNClv5sat"),
            tts_model: or("ELEVENLABS_TTS_MODEL", "eleven_turbo_v2_5"),
            stt_model: or("ELEVENLABS_STT_MODEL", "scribe_v1"),
            output_format: or("ELEVENLABS_OUTPUT_FORMAT", "mp3_22050_32"),
            language: or("STT_LANGUAGE", "eng"),
        };

        let agent_max_steps: usize = parse(&env, "AGENT_MAX_STEPS", 8)?;
        if agent_max_steps == 0 {
            return Err(ConfigError::Invalid {
                name: "AGENT_MAX_STEPS",
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            llm,
            embedding,
            index,
            speech,
            linkup_api_key: key("LINKUP_API_KEY", "linkup_key")?,
            audio_dir: PathBuf::from(or("AUDIO_DIR", "audio")),
            agent_max_steps,
            docs_dir: env("DOCS_DIR").map(PathBuf::from),
        })
    }
}

fn parse<E, T>(env: &E, name: &'static str, default: T) -> Result<T, ConfigError>
where
    E: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
