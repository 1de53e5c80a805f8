use crate::error::AgentError;
use crate::llm::{collect_turn, ChatBackend, PromptMessage};
use crate::tools::ToolSet;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tysva_shared::ChatMessage;

pub const SYSTEM_PROMPT: &str = "\
You are an AI assistant with deep expertise in the programming language TypeScript.

Before you help a user, make sure that you know the context in which the user is working, the situation in which they are, so that you have all the relevant information to provide precise and on-point answers for their questions.

Available to you are two tools:
- 'deepsearch_tool' tool: it takes a query (str) as an input and returns an answer. It is useful to search for precise information in the depths of the web when you need to answer advanced and/or complicated questions by the user about Typescript (especially debugging and errors).
- 'documentation_search_tool' tool: it takes a query (str) as an input and returns an answer. It is useful to search for specific information within a database containing TypeScript documentation.

IMPORTANT INSTRUCTIONS:
1. If the questions are easy and basic, you don't have to use tools, you can base yourself off the knowledge you have of TypeScript
2. You must politely dismiss all the requests that do not concern TypeScript
";

const EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ToolCall { tool_name: String, arguments: Value },
    ToolCallResult { tool_name: String, output: String },
}

/// A running agent: progress events stream out while the answer is pending.
pub struct AgentRun {
    pub events: mpsc::Receiver<AgentEvent>,
    pub answer: JoinHandle<Result<String, AgentError>>,
}

impl AgentRun {
    /// Waits for the final answer. Call after the events have been drained.
    pub async fn finish(self) -> Result<String, AgentError> {
        self.answer
            .await
            .map_err(|e| AgentError::Aborted(e.to_string()))?
    }
}

pub trait AgentRuntime: Send + Sync {
    fn run(&self, prompt: String, history: Vec<ChatMessage>) -> AgentRun;
}

pub struct Agent {
    llm: Arc<dyn ChatBackend>,
    tools: ToolSet,
    system_prompt: String,
    max_steps: usize,
}

impl Agent {
    pub fn new(llm: Arc<dyn ChatBackend>, tools: ToolSet, max_steps: usize) -> Self {
        Self {
            llm,
            tools,
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_steps,
        }
    }
}

impl AgentRuntime for Agent {
    fn run(&self, prompt: String, history: Vec<ChatMessage>) -> AgentRun {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::System(self.system_prompt.clone()));
        messages.extend(history.iter().map(PromptMessage::from));
        messages.push(PromptMessage::User(prompt));

        let answer = tokio::spawn(run_loop(
            self.llm.clone(),
            self.tools.clone(),
            messages,
            self.max_steps,
            tx,
        ));

        AgentRun { events: rx, answer }
    }
}

async fn run_loop(
    llm: Arc<dyn ChatBackend>,
    tools: ToolSet,
    mut messages: Vec<PromptMessage>,
    max_steps: usize,
    events: mpsc::Sender<AgentEvent>,
) -> Result<String, AgentError> {
    let specs = tools.specs();

    for step in 1..=max_steps {
        debug!("Agent step {} with {} messages", step, messages.len());
        let mut rx = llm.stream_chat(messages.clone(), specs.clone()).await?;
        let (text, calls) = collect_turn(&mut rx).await?;

        if calls.is_empty() {
            info!("Agent answered after {} step(s)", step);
            return Ok(text);
        }

        messages.push(PromptMessage::Assistant {
            content: text,
            tool_calls: calls.clone(),
        });

        for call in calls {
            let arguments = parse_arguments(&call.arguments);
            emit(
                &events,
                AgentEvent::ToolCall {
                    tool_name: call.name.clone(),
                    arguments: arguments.clone(),
                },
            )
            .await;

            let output = tools
                .call(&call.name, arguments)
                .await
                .map_err(|source| AgentError::Tool {
                    tool: call.name.clone(),
                    source,
                })?;

            emit(
                &events,
                AgentEvent::ToolCallResult {
                    tool_name: call.name.clone(),
                    output: output.clone(),
                },
            )
            .await;

            messages.push(PromptMessage::Tool {
                call_id: call.id,
                content: output,
            });
        }
    }

    warn!("Agent hit the step limit ({})", max_steps);
    Err(AgentError::StepLimit(max_steps))
}

/// A dropped receiver only means nobody is watching the trace; the run
/// still completes.
async fn emit(events: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    if events.send(event).await.is_err() {
        debug!("Trace receiver dropped");
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{answer, call, done, ScriptedBackend};
    use crate::tools::testing::EchoTool;
    use crate::trace;
    use serde_json::json;
    use tysva_shared::MessageRole;

    fn agent(backend: Arc<ScriptedBackend>, max_steps: usize) -> Agent {
        let tools = ToolSet::new()
            .with(Arc::new(EchoTool::new("documentation_search_tool")))
            .with(Arc::new(EchoTool::new("deepsearch_tool")));
        Agent::new(backend, tools, max_steps)
    }

    #[tokio::test]
    async fn direct_answer_has_no_events() {
        let backend = Arc::new(ScriptedBackend::with_turns(vec![answer(
            "A discriminated union is a union with a shared literal tag.",
        )]));
        let mut run = agent(backend.clone(), 4).run("What is a discriminated union?".into(), vec![]);

        let process = trace::collect(&mut run.events).await;
        let response = run.finish().await.unwrap();

        assert_eq!(process, "");
        assert!(response.starts_with("A discriminated union"));
    }

    #[tokio::test]
    async fn tool_calls_are_emitted_in_order_and_fed_back() {
        let backend = Arc::new(ScriptedBackend::with_turns(vec![
            vec![
                call("c1", "documentation_search_tool", r#"{"query":"unions"}"#),
                call("c2", "deepsearch_tool", r#"{"query":"TS2322"}"#),
                done(),
            ],
            answer("done"),
        ]));
        let docs = Arc::new(EchoTool::new("documentation_search_tool"));
        let deep = Arc::new(EchoTool::new("deepsearch_tool"));
        let tools = ToolSet::new().with(docs.clone()).with(deep.clone());
        let mut run = Agent::new(backend.clone(), tools, 4).run("q".into(), vec![]);

        let mut events = Vec::new();
        while let Some(event) = run.events.recv().await {
            events.push(event);
        }
        assert_eq!(run.finish().await.unwrap(), "done");

        assert_eq!(
            events,
            vec![
                AgentEvent::ToolCall {
                    tool_name: "documentation_search_tool".into(),
                    arguments: json!({"query": "unions"}),
                },
                AgentEvent::ToolCallResult {
                    tool_name: "documentation_search_tool".into(),
                    output: "documentation_search_tool says unions".into(),
                },
                AgentEvent::ToolCall {
                    tool_name: "deepsearch_tool".into(),
                    arguments: json!({"query": "TS2322"}),
                },
                AgentEvent::ToolCallResult {
                    tool_name: "deepsearch_tool".into(),
                    output: "deepsearch_tool says TS2322".into(),
                },
            ]
        );

        assert_eq!(*docs.calls.lock().unwrap(), vec![json!({"query": "unions"})]);
        assert_eq!(*deep.calls.lock().unwrap(), vec![json!({"query": "TS2322"})]);

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        let second = &prompts[1];
        assert!(matches!(&second[second.len() - 3], PromptMessage::Assistant { tool_calls, .. } if tool_calls.len() == 2));
        assert_eq!(
            second.last(),
            Some(&PromptMessage::Tool {
                call_id: "c2".into(),
                content: "deepsearch_tool says TS2322".into()
            })
        );
    }

    #[tokio::test]
    async fn history_sits_between_system_prompt_and_question() {
        let backend = Arc::new(ScriptedBackend::with_turns(vec![answer("ok")]));
        let history = vec![
            ChatMessage::new(MessageRole::User, "earlier"),
            ChatMessage::new(MessageRole::Assistant, "reply"),
        ];
        let run = agent(backend.clone(), 2).run("now".into(), history);
        run.finish().await.unwrap();

        let prompts = backend.prompts.lock().unwrap();
        let first = &prompts[0];
        assert!(matches!(&first[0], PromptMessage::System(s) if s.contains("TypeScript")));
        assert_eq!(first[1], PromptMessage::User("earlier".into()));
        assert_eq!(first[3], PromptMessage::User("now".into()));
    }

    #[tokio::test]
    async fn unknown_tool_fails_the_run() {
        let backend = Arc::new(ScriptedBackend::with_turns(vec![vec![
            call("c1", "rm_rf", "{}"),
            done(),
        ]]));
        let mut run = agent(backend, 4).run("q".into(), vec![]);
        let _ = trace::collect(&mut run.events).await;
        let err = run.finish().await.unwrap_err();
        assert!(matches!(err, AgentError::Tool { tool, .. } if tool == "rm_rf"));
    }

    #[tokio::test]
    async fn step_limit_is_enforced() {
        let looping = || vec![call("c", "deepsearch_tool", r#"{"query":"again"}"#), done()];
        let backend = Arc::new(ScriptedBackend::with_turns(vec![looping(), looping()]));
        let mut run = agent(backend, 2).run("q".into(), vec![]);
        let _ = trace::collect(&mut run.events).await;
        assert!(matches!(run.finish().await, Err(AgentError::StepLimit(2))));
    }

    #[test]
    fn arguments_fall_back_gracefully() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments(r#"{"query":"x"}"#), json!({"query": "x"}));
        assert_eq!(parse_arguments("not json"), json!("not json"));
    }
}
