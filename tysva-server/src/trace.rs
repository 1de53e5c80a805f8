//! Human-readable trace of the tool calls made while answering a request.

use crate::agent::AgentEvent;
use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Value};
use tokio::sync::mpsc;

pub fn render_event(event: &AgentEvent, out: &mut String) {
    match event {
        AgentEvent::ToolCall { tool_name, arguments } => {
            out.push_str("Calling tool **");
            out.push_str(tool_name);
            out.push_str("** with arguments:\n```json\n");
            out.push_str(&pretty(arguments));
            out.push_str("\n```\n");
        }
        AgentEvent::ToolCallResult { tool_name, output } => {
            out.push_str("Tool call result for **");
            out.push_str(tool_name);
            out.push_str("**: ");
            out.push_str(output);
            out.push('\n');
        }
    }
}

pub fn render<'a>(events: impl IntoIterator<Item = &'a AgentEvent>) -> String {
    events.into_iter().fold(String::new(), |mut out, event| {
        render_event(event, &mut out);
        out
    })
}

/// Drains the channel in arrival order until every sender is gone.
pub async fn collect(events: &mut mpsc::Receiver<AgentEvent>) -> String {
    let mut out = String::new();
    while let Some(event) = events.recv().await {
        render_event(&event, &mut out);
    }
    out
}

fn pretty(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    match value.serialize(&mut ser) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn events() -> Vec<AgentEvent> {
        vec![
            AgentEvent::ToolCall {
                tool_name: "documentation_search_tool".into(),
                arguments: json!({"query": "discriminated union", "limit": 2}),
            },
            AgentEvent::ToolCallResult {
                tool_name: "documentation_search_tool".into(),
                output: "A union with a common literal field.".into(),
            },
        ]
    }

    #[test]
    fn renders_call_and_result() {
        let out = render(&events());
        assert_eq!(
            out,
            "Calling tool **documentation_search_tool** with arguments:\n```json\n{\n    \"query\": \"discriminated union\",\n    \"limit\": 2\n}\n```\n\
             Tool call result for **documentation_search_tool**: A union with a common literal field.\n"
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let events = events();
        let first = render(&events);
        for _ in 0..5 {
            assert_eq!(render(&events), first);
        }
    }

    #[test]
    fn empty_arguments_render_as_empty_object() {
        let out = render(&[AgentEvent::ToolCall {
            tool_name: "t".into(),
            arguments: json!({}),
        }]);
        assert!(out.contains("```json\n{}\n```"));
    }

    #[test]
    fn no_events_is_empty_trace() {
        assert_eq!(render(&[]), "");
    }

    #[tokio::test]
    async fn collect_preserves_arrival_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let producer = tokio::spawn(async move {
            for i in 0..10 {
                let event = AgentEvent::ToolCallResult {
                    tool_name: format!("t{i}"),
                    output: i.to_string(),
                };
                tx.send(event).await.unwrap();
            }
        });
        let out = collect(&mut rx).await;
        producer.await.unwrap();

        let expected: String = (0..10)
            .map(|i| format!("Tool call result for **t{i}**: {i}\n"))
            .collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn collect_matches_render() {
        let events = events();
        let (tx, mut rx) = mpsc::channel(8);
        for event in events.clone() {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        assert_eq!(collect(&mut rx).await, render(&events));
    }
}
