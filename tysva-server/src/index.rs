//! Documentation vector index.
//!
//! Dense embeddings come from an OpenAI-compatible `/embeddings` endpoint and
//! are stored in a Qdrant collection with the chunk text in the payload.

use crate::config::{EmbeddingConfig, IndexConfig};
use crate::error::{IndexError, LlmError};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use qdrant_client::{
    qdrant::{
        value::Kind, CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder,
        UpsertPointsBuilder, VectorParamsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;
use tracing::{debug, info};

const TEXT_KEY: &str = "text";
const SOURCE_KEY: &str = "file_path";

pub struct Embedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl Embedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        info!("Initializing embedder with model: {} ({})", config.model, config.api_base);
        let openai = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());
        Self {
            client: Client::with_config(openai),
            model: config.model.clone(),
        }
    }

    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, IndexError> {
        let expected = texts.len();
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(texts)
            .build()
            .map_err(LlmError::from)?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(LlmError::from)?;

        let mut data = response.data;
        if data.len() != expected {
            return Err(IndexError::EmbeddingCount {
                expected,
                actual: data.len(),
            });
        }
        data.sort_by_key(|e| e.index);
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

/// A retrieved chunk of documentation.
#[derive(Debug, Clone)]
pub struct Passage {
    pub text: String,
    pub source: Option<String>,
    pub score: f32,
}

/// A chunk ready to be written to the index.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
}

pub struct DocIndex {
    client: Qdrant,
    collection: String,
}

impl DocIndex {
    pub fn connect(config: &IndexConfig) -> Result<Self, IndexError> {
        info!("Connecting to Qdrant at {} (collection {})", config.url, config.collection);
        let client = Qdrant::from_url(&config.url).build()?;
        Ok(Self {
            client,
            collection: config.collection.clone(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn exists(&self) -> Result<bool, IndexError> {
        Ok(self.client.collection_exists(&self.collection).await?)
    }

    pub async fn ensure_collection(&self, dim: u64) -> Result<(), IndexError> {
        if self.exists().await? {
            return Ok(());
        }
        info!("Creating collection {} ({} dims, cosine)", self.collection, dim);
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dim, Distance::Cosine)),
            )
            .await?;
        Ok(())
    }

    pub async fn upsert(&self, chunks: &[Chunk], embeddings: Vec<Vec<f32>>) -> Result<(), IndexError> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::EmbeddingCount {
                expected: chunks.len(),
                actual: embeddings.len(),
            });
        }

        let points: Vec<PointStruct> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, vector)| {
                let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
                payload.insert(TEXT_KEY.to_string(), chunk.text.clone().into());
                payload.insert(SOURCE_KEY.to_string(), chunk.source.clone().into());
                PointStruct::new(chunk.id.clone(), vector, payload)
            })
            .collect();

        debug!("Upserting {} points into {}", points.len(), self.collection);
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;
        Ok(())
    }

    pub async fn search(&self, vector: Vec<f32>, top_k: u64) -> Result<Vec<Passage>, IndexError> {
        let results = self
            .client
            .search_points(SearchPointsBuilder::new(&self.collection, vector, top_k).with_payload(true))
            .await?;

        let passages = results
            .result
            .into_iter()
            .map(|point| {
                let mut text = String::new();
                let mut source = None;
                for (key, value) in point.payload {
                    if let Some(Kind::StringValue(s)) = value.kind {
                        match key.as_str() {
                            TEXT_KEY => text = s,
                            SOURCE_KEY => source = Some(s),
                            _ => {}
                        }
                    }
                }
                Passage {
                    text,
                    source,
                    score: point.score,
                }
            })
            .collect();

        Ok(passages)
    }
}

/// Element-wise mean of equally sized vectors.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    if vectors.iter().any(|v| v.len() != first.len()) {
        return None;
    }
    let n = vectors.len() as f32;
    let mut mean = vec![0.0; first.len()];
    for vector in vectors {
        for (acc, x) in mean.iter_mut().zip(vector) {
            *acc += x;
        }
    }
    mean.iter_mut().for_each(|x| *x /= n);
    Some(mean)
}
