use super::{query_argument, query_parameters, Tool};
use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

const LINKUP_SEARCH_URL: &str = "https://api.linkup.so/v1/search";

/// Web search through Linkup in "deep" mode, returning an answer with its
/// sources.
pub struct DeepSearch {
    http: reqwest::Client,
    api_key: String,
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    q: &'a str,
    depth: &'a str,
    output_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct SourcedAnswer {
    answer: String,
    #[serde(default)]
    sources: Vec<Source>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
}

impl DeepSearch {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            url: LINKUP_SEARCH_URL.to_string(),
        }
    }
}

#[async_trait]
impl Tool for DeepSearch {
    fn name(&self) -> &'static str {
        "deepsearch_tool"
    }

    fn description(&self) -> &'static str {
        "Useful to search for precise information in the depths of the web when you need to answer \
         advanced and/or complicated questions by the user about Typescript (especially debugging and errors)."
    }

    fn parameters(&self) -> Value {
        query_parameters()
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let query = query_argument(self.name(), &arguments)?;
        info!("Deep search: {}", query);

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&SearchRequest {
                q: &query,
                depth: "deep",
                output_type: "sourcedAnswer",
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!("Linkup search failed with {}: {}", status, body);
            return Err(ToolError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let answer: SourcedAnswer = resp.json().await?;
        info!("Deep search returned {} source(s)", answer.sources.len());
        Ok(format_sourced_answer(&answer.answer, &answer.sources))
    }
}

/// Renders the answer below a collapsible markdown bibliography.
pub fn format_sourced_answer(answer: &str, sources: &[Source]) -> String {
    let bibliography = sources
        .iter()
        .map(|s| format!("- [{}]({})", s.name, s.url))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<details>\n\t<summary><b>Sources</b></summary>\n\n{bibliography}\n\n</details>\n\n{answer}")
}
