use crate::config::LlmConfig;
use crate::error::LlmError;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs,
        CreateChatCompletionStreamResponse,
        FinishReason, FunctionCall, FunctionObject, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tysva_shared::{ChatMessage, MessageRole};

/// A message as the model sees it, including the tool-calling turns that
/// never reach the client.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptMessage {
    System(String),
    User(String),
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

impl From<&ChatMessage> for PromptMessage {
    fn from(msg: &ChatMessage) -> Self {
        match msg.role {
            MessageRole::System => PromptMessage::System(msg.content.clone()),
            MessageRole::User => PromptMessage::User(msg.content.clone()),
            MessageRole::Assistant => PromptMessage::Assistant {
                content: msg.content.clone(),
                tool_calls: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text { delta: String, done: bool },
    ToolCall(ToolCall),
    Failed { message: String },
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Streams one model turn. The receiver always ends with
    /// `Text { done: true }` or `Failed`.
    async fn stream_chat(
        &self,
        messages: Vec<PromptMessage>,
        tools: Vec<ToolSpec>,
    ) -> Result<mpsc::UnboundedReceiver<StreamChunk>, LlmError>;

    /// Single non-streaming completion. With `json_mode` the model is asked
    /// for a JSON object.
    async fn complete(&self, messages: Vec<PromptMessage>, json_mode: bool) -> Result<String, LlmError>;
}

pub struct LlmService {
    client: Client<OpenAIConfig>,
    model: String,
}

impl LlmService {
    pub fn new(config: &LlmConfig) -> Self {
        info!("Initializing LLM service with model: {} ({})", config.model, config.api_base);
        let openai = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());
        let client = Client::with_config(openai);
        Self {
            client,
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl ChatBackend for LlmService {
    async fn stream_chat(
        &self,
        messages: Vec<PromptMessage>,
        tools: Vec<ToolSpec>,
    ) -> Result<mpsc::UnboundedReceiver<StreamChunk>, LlmError> {
        let messages = messages
            .into_iter()
            .map(convert_to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(messages).stream(true);
        if !tools.is_empty() {
            builder.tools(tools.into_iter().map(convert_tool).collect::<Vec<_>>());
        }
        let request = builder.build()?;

        if let Ok(request_json) = serde_json::to_string_pretty(&request) {
            debug!("Chat completion payload:\n{}", request_json);
        }

        let stream = match self.client.chat().create_stream(request).await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to create model stream: {:?}", e);
                return Err(LlmError::Api(e));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_stream(stream, tx));
        Ok(rx)
    }

    async fn complete(&self, messages: Vec<PromptMessage>, json_mode: bool) -> Result<String, LlmError> {
        let messages = messages
            .into_iter()
            .map(convert_to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(messages);
        if json_mode {
            builder.response_format(ResponseFormat::JsonObject);
        }
        let request = builder.build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            error!("Chat completion failed: {:?}", e);
            LlmError::Api(e)
        })?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::Empty)
    }
}

/// Tool call fragments arrive keyed by index; names and ids come once,
/// arguments are split across deltas.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<ToolCall>,
}

impl ToolCallAccumulator {
    pub fn merge(&mut self, index: usize, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) {
        while self.calls.len() <= index {
            self.calls.push(ToolCall {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
        }
        let call = &mut self.calls[index];
        if let Some(id) = id {
            call.id = id.to_string();
        }
        if let Some(name) = name {
            call.name = name.to_string();
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order. Slots that never received a name are
    /// dropped.
    pub fn take(&mut self) -> Vec<ToolCall> {
        self.calls.drain(..).filter(|call| !call.name.is_empty()).collect()
    }
}

/// Pumps one model stream into the chunk channel. Tool calls are flushed
/// when the model reports `tool_calls` as finish reason, and again when the
/// stream ends, since some OpenAI-compatible backends finish with `stop`.
async fn forward_stream<S>(mut stream: S, tx: mpsc::UnboundedSender<StreamChunk>)
where
    S: Stream<Item = Result<CreateChatCompletionStreamResponse, OpenAIError>> + Unpin,
{
    let mut tool_calls = ToolCallAccumulator::default();

    while let Some(result) = stream.next().await {
        match result {
            Ok(response) => {
                let Some(choice) = response.choices.first() else {
                    continue;
                };

                if let Some(delta) = &choice.delta.content {
                    let chunk = StreamChunk::Text {
                        delta: delta.clone(),
                        done: false,
                    };
                    if tx.send(chunk).is_err() {
                        error!("Failed to send chunk to channel");
                        return;
                    }
                }

                if let Some(delta_tool_calls) = &choice.delta.tool_calls {
                    for delta_tool in delta_tool_calls {
                        let function = delta_tool.function.as_ref();
                        tool_calls.merge(
                            delta_tool.index as usize,
                            delta_tool.id.as_deref(),
                            function.and_then(|f| f.name.as_deref()),
                            function.and_then(|f| f.arguments.as_deref()),
                        );
                    }
                }

                if choice.finish_reason == Some(FinishReason::ToolCalls)
                    && !send_tool_calls(&tx, tool_calls.take())
                {
                    return;
                }
            }
            Err(e) => {
                error!("Model stream error: {:?}", e);
                let message = match &e {
                    OpenAIError::ApiError(api_err) => format!(
                        "API Error: {} (Code: {:?}, Type: {:?})",
                        api_err.message, api_err.code, api_err.r#type
                    ),
                    _ => e.to_string(),
                };
                let _ = tx.send(StreamChunk::Failed { message });
                return;
            }
        }
    }

    if !tool_calls.is_empty() {
        warn!("Stream ended without a tool_calls finish reason; flushing pending tool calls");
        if !send_tool_calls(&tx, tool_calls.take()) {
            return;
        }
    }

    let done_chunk = StreamChunk::Text {
        delta: String::new(),
        done: true,
    };
    if tx.send(done_chunk).is_err() {
        error!("Failed to send done chunk");
    }
}

fn send_tool_calls(tx: &mpsc::UnboundedSender<StreamChunk>, calls: Vec<ToolCall>) -> bool {
    info!("Model requested {} tool call(s)", calls.len());
    for tool_call in calls {
        debug!("  {} ({}): {}", tool_call.name, tool_call.id, tool_call.arguments);
        if tx.send(StreamChunk::ToolCall(tool_call)).is_err() {
            error!("Failed to send tool call chunk");
            return false;
        }
    }
    true
}

/// Drains one streamed turn into its text and tool calls.
pub async fn collect_turn(
    rx: &mut mpsc::UnboundedReceiver<StreamChunk>,
) -> Result<(String, Vec<ToolCall>), LlmError> {
    let mut text = String::new();
    let mut calls = Vec::new();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::Text { delta, done } => {
                text.push_str(&delta);
                if done {
                    break;
                }
            }
            StreamChunk::ToolCall(call) => calls.push(call),
            StreamChunk::Failed { message } => return Err(LlmError::Stream(message)),
        }
    }
    Ok((text, calls))
}

fn convert_tool(spec: ToolSpec) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: spec.name,
            description: Some(spec.description),
            parameters: Some(spec.parameters),
            strict: None,
        },
    }
}

fn convert_to_openai_message(msg: PromptMessage) -> Result<ChatCompletionRequestMessage, LlmError> {
    let message = match msg {
        PromptMessage::System(content) => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()?,
        ),
        PromptMessage::User(content) => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()?,
        ),
        PromptMessage::Assistant { content, tool_calls } => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();

            // Tool-call turns usually carry no text
            if !content.is_empty() {
                builder.content(content);
            }

            if !tool_calls.is_empty() {
                let calls: Vec<ChatCompletionMessageToolCall> = tool_calls
                    .into_iter()
                    .map(|tc| ChatCompletionMessageToolCall {
                        id: tc.id,
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: tc.name,
                            arguments: tc.arguments,
                        },
                    })
                    .collect();
                builder.tool_calls(calls);
            }

            ChatCompletionRequestMessage::Assistant(builder.build()?)
        }
        PromptMessage::Tool { call_id, content } => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .content(content)
                .tool_call_id(call_id)
                .build()?,
        ),
    };
    Ok(message)
}
