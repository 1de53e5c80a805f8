use super::{query_argument, query_parameters, Tool};
use crate::error::{IndexError, ToolError};
use crate::index::{mean_vector, DocIndex, Embedder, Passage};
use crate::llm::{ChatBackend, PromptMessage};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const HYDE_PROMPT: &str = "Please write a passage to answer the question\n\
Try to include as many key details as possible.\n\n\n{query}\n\n\nPassage:";

const QA_PROMPT: &str = "Context information is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query}\n\
Answer: ";

/// Retrieval over the indexed TypeScript documentation using hypothetical
/// document embeddings (HyDE).
pub struct DocsSearch {
    llm: Arc<dyn ChatBackend>,
    embedder: Arc<Embedder>,
    index: Arc<DocIndex>,
    top_k: u64,
}

impl DocsSearch {
    pub fn new(llm: Arc<dyn ChatBackend>, embedder: Arc<Embedder>, index: Arc<DocIndex>, top_k: u64) -> Self {
        Self {
            llm,
            embedder,
            index,
            top_k,
        }
    }

    async fn hypothetical_passage(&self, query: &str) -> Result<String, ToolError> {
        let prompt = HYDE_PROMPT.replace("{query}", query);
        Ok(self.llm.complete(vec![PromptMessage::User(prompt)], false).await?)
    }
}

#[async_trait]
impl Tool for DocsSearch {
    fn name(&self) -> &'static str {
        "documentation_search_tool"
    }

    fn description(&self) -> &'static str {
        "Useful to search for specific information within a database containing TypeScript documentation."
    }

    fn parameters(&self) -> Value {
        query_parameters()
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let query = query_argument(self.name(), &arguments)?;
        info!("Documentation search: {}", query);

        let passage = self.hypothetical_passage(&query).await?;
        debug!("Hypothetical passage ({} chars)", passage.len());

        let vectors = self.embedder.embed(vec![passage, query.clone()]).await?;
        let vector = mean_vector(&vectors).ok_or(IndexError::EmbeddingCount {
            expected: 2,
            actual: vectors.len(),
        })?;

        let passages = self.index.search(vector, self.top_k).await?;
        info!("Retrieved {} passage(s) from {}", passages.len(), self.index.collection());

        let prompt = answer_prompt(&query, &passages);
        Ok(self.llm.complete(vec![PromptMessage::User(prompt)], false).await?)
    }
}

fn answer_prompt(query: &str, passages: &[Passage]) -> String {
    let context = passages
        .iter()
        .map(|p| match &p.source {
            Some(source) => format!("file_path: {}\n\n{}", source, p.text),
            None => p.text.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    QA_PROMPT.replace("{context}", &context).replace("{query}", query)
}
