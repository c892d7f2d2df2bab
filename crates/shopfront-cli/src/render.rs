//! Terminal rendering of agent events.

use serde_json::Value;

use shopfront_core::types::StreamEvent;

const RESULT_PREVIEW_CHARS: usize = 200;

/// Where a rendered line goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stdout,
    Stderr,
}

/// Rendered output for one event. `newline` is false for text deltas, which
/// are printed as they stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub target: Target,
    pub text: String,
    pub newline: bool,
}

fn preview(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= RESULT_PREVIEW_CHARS {
        return text;
    }
    let cut: String = text.chars().take(RESULT_PREVIEW_CHARS).collect();
    format!("{cut}…")
}

pub fn render(event: &StreamEvent) -> Rendered {
    match event {
        StreamEvent::Text { content } => Rendered {
            target: Target::Stdout,
            text: content.clone(),
            newline: false,
        },
        StreamEvent::ToolCall {
            name, arguments, ..
        } => Rendered {
            target: Target::Stdout,
            text: format!("\n[tool] {name} {arguments}"),
            newline: true,
        },
        StreamEvent::ToolResult { name, result, .. } => {
            let label = if result.get("error").is_some() {
                "failed"
            } else {
                "result"
            };
            Rendered {
                target: Target::Stdout,
                text: format!("[{label}] {name}: {}", preview(result)),
                newline: true,
            }
        }
        StreamEvent::Complete => Rendered {
            target: Target::Stdout,
            text: String::new(),
            newline: true,
        },
        StreamEvent::Error { message } => Rendered {
            target: Target::Stderr,
            text: format!("\nerror: {message}"),
            newline: true,
        },
    }
}
